//! File-selection and lifecycle (§4.4): CREATE/SELECT/OPEN/CLOSE/DESELECT.

use std::path::PathBuf;

use pesit_msg::{pgi, pi, Fpdu, FpduType, Parameter, ParameterArea, ParameterGroup};
use pesit_types::{DiagnosticCode, TransferId};

use crate::error::PesitError;
use crate::registry::{Registry, ResolutionError};
use crate::session::AccessType;
use crate::storage::{default_path, expand_placeholders, StorageConnector};
use crate::transfer::TransferContext;

pub struct LifecycleContext<'a> {
    pub registry: &'a Registry,
    pub storage: &'a dyn StorageConnector,
    pub strict_file_check: bool,
    pub configured_max_entity_size: u32,
    pub server_connection_id: u8,
    /// Where CREATE lands files with no matching registry entry, when
    /// `strict_file_check` is false.
    pub default_receive_dir: PathBuf,
}

fn selection_failed(code: DiagnosticCode) -> PesitError {
    PesitError::SelectionFailed { diagnostic: code }
}

/// CREATE: peer intends to send us a file (we become the receiver).
pub async fn handle_create(
    fpdu: &Fpdu,
    partner_id: &str,
    transfer_id: TransferId,
    ctx: &LifecycleContext<'_>,
) -> Result<(Fpdu, TransferContext), PesitError> {
    let params = fpdu.params().ok_or_else(|| selection_failed(DiagnosticCode::PROTOCOL_ERROR))?;

    let file_id = params.find_group(pgi::FILE_IDENTIFICATION);
    let virtual_name = file_id.and_then(|g| g.find(pi::FILENAME)).map(Parameter::as_str).unwrap_or_default();
    let peer_max_entity = params.find(pi::MAX_ENTITY_SIZE).and_then(Parameter::as_u32).unwrap_or(ctx.configured_max_entity_size);
    let restart_flag = params.find(pi::RESTART_FLAG).and_then(Parameter::as_u8).unwrap_or(0) != 0;
    let restart_point = if restart_flag { params.find(pi::RESTART_POINT).and_then(Parameter::as_u32).unwrap_or(0) } else { 0 };

    let logical = params.find_group(pgi::LOGICAL_ATTRIBUTES);
    let record_length = logical.and_then(|g| g.find(pi::ARTICLE_LENGTH)).and_then(Parameter::as_u16).unwrap_or(512) as u32;

    let now = time::OffsetDateTime::now_utc();
    let physical_path: PathBuf = match ctx.registry.resolve_for_receive(&virtual_name, partner_id) {
        Ok(entry) => {
            let filename = expand_placeholders(&entry.filename_pattern, partner_id, &virtual_name, u32::from(transfer_id), now);
            entry.directory.join(filename)
        }
        Err(ResolutionError::UnknownVirtualFile) if !ctx.strict_file_check => {
            default_path(&ctx.default_receive_dir, &virtual_name, now.unix_timestamp_nanos() as u128 / 1_000_000)
        }
        Err(ResolutionError::UnknownVirtualFile) => return Err(selection_failed(DiagnosticCode::FILE_NOT_FOUND)),
        Err(ResolutionError::DirectionOrAclMismatch) => return Err(selection_failed(DiagnosticCode::ACCESS_OR_ACL_MISMATCH)),
    };

    ctx.storage
        .ensure_parent_dirs(&physical_path)
        .await
        .map_err(|e| selection_failed(e.diagnostic().unwrap_or(DiagnosticCode::ACCESS_DENIED)))?;

    let negotiated_max = ctx.configured_max_entity_size.min(peer_max_entity);

    let mut ack_params = ParameterArea::default();
    ack_params.push(Parameter::u32(pi::MAX_ENTITY_SIZE, negotiated_max));
    let response = Fpdu::with_params(FpduType::ACK_CREATE, fpdu.id_src, ctx.server_connection_id, ack_params);

    let transfer = TransferContext::new_write(transfer_id, virtual_name, physical_path, record_length, negotiated_max, None, restart_point);

    Ok((response, transfer))
}

/// SELECT: peer asks us to send them a file (we become the sender).
pub async fn handle_select(
    fpdu: &Fpdu,
    partner_id: &str,
    transfer_id: TransferId,
    ctx: &LifecycleContext<'_>,
) -> Result<(Fpdu, TransferContext), PesitError> {
    let params = fpdu.params().ok_or_else(|| selection_failed(DiagnosticCode::PROTOCOL_ERROR))?;
    let file_id = params.find_group(pgi::FILE_IDENTIFICATION);
    let virtual_name = file_id.and_then(|g| g.find(pi::FILENAME)).map(Parameter::as_str).unwrap_or_default();

    let entry = ctx.registry.resolve_for_send(&virtual_name, partner_id).map_err(|e| match e {
        ResolutionError::UnknownVirtualFile => selection_failed(DiagnosticCode::FILE_NOT_FOUND),
        ResolutionError::DirectionOrAclMismatch => selection_failed(DiagnosticCode::ACCESS_OR_ACL_MISMATCH),
    })?;

    let now = time::OffsetDateTime::now_utc();
    let filename = expand_placeholders(&entry.filename_pattern, partner_id, &virtual_name, u32::from(transfer_id), now);
    let physical_path = entry.directory.join(filename);

    if !ctx.storage.exists(&physical_path).await || !ctx.storage.is_readable(&physical_path).await {
        return Err(selection_failed(DiagnosticCode::FILE_NOT_FOUND));
    }
    let size = ctx.storage.size(&physical_path).await.map_err(|_| selection_failed(DiagnosticCode::ACCESS_DENIED))?;

    let mut logical = ParameterGroup::new(pgi::PHYSICAL_ATTRIBUTES, Vec::new());
    let size_kb = ((size + 1023) / 1024) as u32;
    logical.params.push(Parameter::u32(pi::FILE_SIZE_RESERVATION, size_kb));

    let mut ack_params = ParameterArea::default();
    ack_params.push_group(logical);
    let response = Fpdu::with_params(FpduType::ACK_SELECT, fpdu.id_src, ctx.server_connection_id, ack_params);

    let record_length = params
        .find_group(pgi::LOGICAL_ATTRIBUTES)
        .and_then(|g| g.find(pi::ARTICLE_LENGTH))
        .and_then(Parameter::as_u16)
        .unwrap_or(512) as u32;
    let restart_point = params.find(pi::RESTART_POINT).and_then(Parameter::as_u32).unwrap_or(0);

    let transfer = TransferContext::new_read(transfer_id, virtual_name, physical_path, record_length, ctx.configured_max_entity_size, restart_point);
    Ok((response, transfer))
}

/// OPEN: in write mode, opens the output stream now so subsequent DTFs
/// stream straight to disk (§9: avoid whole-file buffering).
pub async fn handle_open(
    fpdu: &Fpdu,
    transfer: &mut TransferContext,
    ctx: &LifecycleContext<'_>,
) -> Result<Fpdu, PesitError> {
    if transfer.direction == AccessType::Write {
        let append = transfer.restart_point > 0;
        let writer = ctx.storage.open_write(&transfer.physical_path, append).await?;
        transfer.writer = Some(writer);
    }
    Ok(Fpdu::empty(FpduType::ACK_OPEN, fpdu.id_src, ctx.server_connection_id))
}

/// CLOSE: flushes and releases any open stream.
pub async fn handle_close(fpdu: &Fpdu, transfer: &mut TransferContext, server_connection_id: u8) -> Result<Fpdu, PesitError> {
    if let Some(writer) = transfer.writer.as_mut() {
        writer.flush().await?;
    }
    transfer.writer = None;
    transfer.reader = None;
    Ok(Fpdu::empty(FpduType::ACK_CLOSE, fpdu.id_src, server_connection_id))
}

/// DESELECT: disposes the `TransferContext` (caller drops it after this).
pub fn handle_deselect(fpdu: &Fpdu, server_connection_id: u8) -> Fpdu {
    Fpdu::empty(FpduType::ACK_DESELECT, fpdu.id_src, server_connection_id)
}
