//! Optional TOML registry of partners and virtual files (§4.4), loaded
//! alongside the server config. Kept separate from [`pesit::Registry`]
//! itself, which is a read-mostly `Arc` snapshot rather than a serde target.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use pesit::registry::{AllowedAccess, TransferDirection, VirtualFileEntry};
use pesit::{PartnerEntry, Registry};

#[derive(Debug, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    partners: HashMap<String, PartnerFile>,
    #[serde(default)]
    virtual_files: HashMap<String, VirtualFileFile>,
}

#[derive(Debug, Deserialize)]
struct PartnerFile {
    password: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    access: AccessFile,
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
enum AccessFile {
    ReadOnly,
    WriteOnly,
    #[default]
    Both,
}

impl From<AccessFile> for AllowedAccess {
    fn from(value: AccessFile) -> Self {
        match value {
            AccessFile::ReadOnly => AllowedAccess::ReadOnly,
            AccessFile::WriteOnly => AllowedAccess::WriteOnly,
            AccessFile::Both => AllowedAccess::Both,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VirtualFileFile {
    directory: PathBuf,
    #[serde(default = "default_pattern")]
    filename_pattern: String,
    #[serde(default)]
    direction: DirectionFile,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    partners: Vec<String>,
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
enum DirectionFile {
    ReceiveOnly,
    SendOnly,
    #[default]
    Both,
}

impl From<DirectionFile> for TransferDirection {
    fn from(value: DirectionFile) -> Self {
        match value {
            DirectionFile::ReceiveOnly => TransferDirection::ReceiveOnly,
            DirectionFile::SendOnly => TransferDirection::SendOnly,
            DirectionFile::Both => TransferDirection::Both,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_pattern() -> String {
    "{VIRTUAL}_{TRANSFER_ID}".to_string()
}

/// Loads `path`, if given, into a live [`Registry`]. Absent a file, the
/// server runs with an empty registry: in non-strict mode every CREATE
/// falls back to the default receive directory (§4.4); in strict mode
/// every CREATE/SELECT is rejected, which is rarely what an operator wants
/// without also supplying a registry.
pub fn load(path: Option<&std::path::Path>) -> Result<Registry, pesit::PesitError> {
    let Some(path) = path else {
        return Ok(Registry::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| pesit::PesitError::Config(format!("reading {}: {e}", path.display())))?;
    let file: RegistryFile = toml::from_str(&text)
        .map_err(|e| pesit::PesitError::Config(format!("parsing {}: {e}", path.display())))?;

    let partners = file
        .partners
        .into_iter()
        .map(|(id, p)| {
            let entry = PartnerEntry { id: id.clone(), password: p.password, enabled: p.enabled, allowed_access: p.access.into() };
            (id, entry)
        })
        .collect();

    let virtual_files = file
        .virtual_files
        .into_iter()
        .map(|(name, v)| {
            let entry = VirtualFileEntry {
                virtual_name: name.clone(),
                directory: v.directory,
                filename_pattern: v.filename_pattern,
                direction: v.direction.into(),
                enabled: v.enabled,
                partner_acl: v.partners,
            };
            (name, entry)
        })
        .collect();

    Ok(Registry::new(partners, virtual_files))
}
