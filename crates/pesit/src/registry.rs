//! Partner and virtual-file registries (§4.4, §9): read-mostly tables the
//! session snapshots at CONNECT time so the hot path never takes a
//! cross-session lock.

use std::collections::HashMap;
use std::sync::Arc;

use crate::session::AccessType;

#[derive(Debug, Clone)]
pub struct PartnerEntry {
    pub id: String,
    pub password: Option<String>,
    pub enabled: bool,
    pub allowed_access: AllowedAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowedAccess {
    ReadOnly,
    WriteOnly,
    Both,
}

impl AllowedAccess {
    pub fn permits(self, access: AccessType) -> bool {
        matches!((self, access), (AllowedAccess::Both, _) | (AllowedAccess::ReadOnly, AccessType::Read) | (AllowedAccess::WriteOnly, AccessType::Write))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    ReceiveOnly,
    SendOnly,
    Both,
}

impl TransferDirection {
    fn allows_receive(self) -> bool {
        matches!(self, TransferDirection::ReceiveOnly | TransferDirection::Both)
    }

    fn allows_send(self) -> bool {
        matches!(self, TransferDirection::SendOnly | TransferDirection::Both)
    }
}

#[derive(Debug, Clone)]
pub struct VirtualFileEntry {
    pub virtual_name: String,
    pub directory: std::path::PathBuf,
    pub filename_pattern: String,
    pub direction: TransferDirection,
    pub enabled: bool,
    /// Empty means "any partner".
    pub partner_acl: Vec<String>,
}

impl VirtualFileEntry {
    fn partner_allowed(&self, partner_id: &str) -> bool {
        self.partner_acl.is_empty() || self.partner_acl.iter().any(|p| p == partner_id)
    }
}

/// A read-mostly, cheaply-cloned snapshot taken at CONNECT time (§9:
/// "Arena/index for the registry caches").
#[derive(Clone, Default)]
pub struct Registry {
    partners: Arc<HashMap<String, PartnerEntry>>,
    virtual_files: Arc<HashMap<String, VirtualFileEntry>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionError {
    UnknownVirtualFile,
    DirectionOrAclMismatch,
}

impl Registry {
    pub fn new(partners: HashMap<String, PartnerEntry>, virtual_files: HashMap<String, VirtualFileEntry>) -> Self {
        Self { partners: Arc::new(partners), virtual_files: Arc::new(virtual_files) }
    }

    pub fn partner(&self, id: &str) -> Option<&PartnerEntry> {
        self.partners.get(id)
    }

    /// Resolves a virtual filename for an incoming CREATE (peer wants to
    /// send us a file, i.e. we receive).
    pub fn resolve_for_receive(&self, virtual_name: &str, partner_id: &str) -> Result<&VirtualFileEntry, ResolutionError> {
        let entry = self.virtual_files.get(virtual_name).ok_or(ResolutionError::UnknownVirtualFile)?;
        if !entry.enabled || !entry.direction.allows_receive() || !entry.partner_allowed(partner_id) {
            return Err(ResolutionError::DirectionOrAclMismatch);
        }
        Ok(entry)
    }

    /// Resolves a virtual filename for an incoming SELECT (peer wants us to
    /// send them a file, i.e. we send).
    pub fn resolve_for_send(&self, virtual_name: &str, partner_id: &str) -> Result<&VirtualFileEntry, ResolutionError> {
        let entry = self.virtual_files.get(virtual_name).ok_or(ResolutionError::UnknownVirtualFile)?;
        if !entry.enabled || !entry.direction.allows_send() || !entry.partner_allowed(partner_id) {
            return Err(ResolutionError::DirectionOrAclMismatch);
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(direction: TransferDirection, acl: Vec<&str>) -> VirtualFileEntry {
        VirtualFileEntry {
            virtual_name: "FILE".into(),
            directory: "/recv".into(),
            filename_pattern: "{VIRTUAL}_{TRANSFER_ID}".into(),
            direction,
            enabled: true,
            partner_acl: acl.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn unknown_virtual_file_is_rejected() {
        let registry = Registry::default();
        assert_eq!(registry.resolve_for_receive("NOPE", "BANKA"), Err(ResolutionError::UnknownVirtualFile));
    }

    #[test]
    fn direction_mismatch_is_rejected() {
        let mut files = HashMap::new();
        files.insert("FILE".to_string(), entry(TransferDirection::SendOnly, vec![]));
        let registry = Registry::new(HashMap::new(), files);
        assert_eq!(registry.resolve_for_receive("FILE", "BANKA"), Err(ResolutionError::DirectionOrAclMismatch));
    }

    #[test]
    fn acl_restricts_to_listed_partners() {
        let mut files = HashMap::new();
        files.insert("FILE".to_string(), entry(TransferDirection::ReceiveOnly, vec!["BANKA"]));
        let registry = Registry::new(HashMap::new(), files);
        assert!(registry.resolve_for_receive("FILE", "BANKA").is_ok());
        assert_eq!(registry.resolve_for_receive("FILE", "BANKB"), Err(ResolutionError::DirectionOrAclMismatch));
    }
}
