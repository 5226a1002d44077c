//! Data-transfer engine (§4.5): the hottest path. Receive (TDE) handlers
//! react to each incoming FPDU; send (TDL) planning is pulled one step at a
//! time by the caller driving the wire, so sync-point round-trips stay
//! outside this module (§9: "Codec as a free function", same spirit
//! applied to the transfer loop — the wire write/read itself is not ours).

use pesit_msg::{pi, Body, Fpdu, FpduType, Parameter, ParameterArea};
use pesit_types::{DiagnosticCode, TransferId};

use crate::error::PesitError;
use crate::session::SessionContext;
use crate::storage::StorageConnector;
use crate::tracker::{track, TransferTracker};
use crate::transfer::TransferContext;
use crate::validators::{validate_article_length, validate_entity_size, validate_restart_point};

/// Bytes of framing overhead subtracted from `max_entity_size` before
/// dividing into articles (§8 S5: `(4096 - 6) / (2 + 506) = 8`).
pub const ENTITY_HEADER_OVERHEAD: u32 = 6;

fn data_plane_violation(code: DiagnosticCode) -> PesitError {
    PesitError::DataPlaneViolation { diagnostic: code }
}

/// How many `record_length`-sized articles fit in one multi-article DTF
/// payload, given the 2-byte per-article length prefix (§4.5.2, §8 S5).
/// Never zero: a `max_entity_size` too small even for one article means the
/// caller must segment that article across DTFDA/DTFMA/DTFFA instead (§8
/// boundary: PI_25 = 1 degrades to single-article entities).
pub fn articles_per_entity(max_entity_size: u32, record_length: u32) -> u32 {
    let denom = 2 + record_length;
    if denom == 0 {
        return 1;
    }
    (max_entity_size.saturating_sub(ENTITY_HEADER_OVERHEAD) / denom).max(1)
}

/// Whether a single article of `record_length` bytes needs to be segmented
/// across multiple DTFDA/DTFMA/DTFFA frames rather than carried whole in a
/// DTF (§4.5.2: "if a single article must be segmented across entities").
pub fn requires_segmentation(max_entity_size: u32, record_length: u32) -> bool {
    record_length > max_entity_size
}

// ---------------------------------------------------------------------
// Receive side (TDE sub-machine): reactive per-FPDU handlers.
// ---------------------------------------------------------------------

/// WRITE: acknowledges; the output stream is already open from OPEN.
pub fn handle_write(fpdu: &Fpdu, server_connection_id: u8) -> Fpdu {
    Fpdu::empty(FpduType::ACK_WRITE, fpdu.id_src, server_connection_id)
}

/// DTF / DTFDA / DTFMA / DTFFA: validate and append to the open output
/// stream. No response (§8 S2: "no response to DTF").
pub async fn handle_dtf(fpdu: &Fpdu, transfer: &mut TransferContext) -> Result<(), PesitError> {
    let writer = transfer.writer.as_mut().ok_or_else(|| data_plane_violation(DiagnosticCode::PROTOCOL_ERROR))?;

    match fpdu.fpdu_type {
        FpduType::DTF => {
            let articles = match &fpdu.body {
                Body::Articles(a) => a,
                _ => return Err(data_plane_violation(DiagnosticCode::PROTOCOL_ERROR)),
            };
            if articles.len() != fpdu.id_src as usize {
                return Err(data_plane_violation(DiagnosticCode::PROTOCOL_ERROR));
            }
            let mut payload_len = 0usize;
            for article in articles {
                validate_article_length(article, transfer.record_length).map_err(data_plane_violation)?;
                payload_len += article.len() + 2;
            }
            validate_entity_size(payload_len, transfer.max_entity_size).map_err(data_plane_violation)?;

            for article in articles {
                writer.write_chunk(article).await?;
                transfer.hash_update(article);
                transfer.bytes_transferred += article.len() as u64;
                transfer.bytes_since_last_sync += article.len() as u64;
                transfer.records_transferred += 1;
            }
        }
        FpduType::DTFDA | FpduType::DTFMA | FpduType::DTFFA => {
            let fragment = match &fpdu.body {
                Body::RawFragment(d) => d,
                _ => return Err(data_plane_violation(DiagnosticCode::PROTOCOL_ERROR)),
            };
            writer.write_chunk(fragment).await?;
            transfer.hash_update(fragment);
            transfer.bytes_transferred += fragment.len() as u64;
            transfer.bytes_since_last_sync += fragment.len() as u64;
            if fpdu.fpdu_type == FpduType::DTFFA {
                transfer.records_transferred += 1;
            }
        }
        _ => return Err(data_plane_violation(DiagnosticCode::PROTOCOL_ERROR)),
    }
    Ok(())
}

/// SYN: flush, persist the checkpoint via the tracker, reset the
/// bytes-since-last-sync counter, and echo the sync-point number.
pub async fn handle_syn(
    fpdu: &Fpdu,
    transfer: &mut TransferContext,
    transfer_id: TransferId,
    tracker: &dyn TransferTracker,
    server_connection_id: u8,
) -> Result<Fpdu, PesitError> {
    let params = fpdu.params().ok_or_else(|| data_plane_violation(DiagnosticCode::PROTOCOL_ERROR))?;
    let sync_num = params.find(pi::SYNC_POINT_NUMBER).and_then(Parameter::as_u32).ok_or_else(|| data_plane_violation(DiagnosticCode::INVALID_DATA_WITHOUT_SYNC))?;

    if let Some(writer) = transfer.writer.as_mut() {
        writer.flush().await?;
    }
    transfer.current_sync_point = sync_num;
    let bytes = transfer.bytes_transferred;
    track("record_sync", || tracker.record_sync(transfer_id, bytes, sync_num)).await;
    transfer.bytes_since_last_sync = 0;

    let mut out = ParameterArea::default();
    out.push(Parameter::u32(pi::SYNC_POINT_NUMBER, sync_num));
    Ok(Fpdu::with_params(FpduType::ACK_SYN, fpdu.id_src, server_connection_id, out))
}

/// DTF_END: closes the data segment. No response; the FSM drives the
/// TDE02B -> TDE07 transition.
pub async fn handle_dtf_end(transfer: &mut TransferContext) -> Result<(), PesitError> {
    if let Some(writer) = transfer.writer.as_mut() {
        writer.flush().await?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdtOutcome {
    /// PI_19 == 4: resync requested; the last committed checkpoint remains
    /// valid and the transfer may resume from it.
    RestartPending,
    Interrupted,
}

/// IDT: peer-initiated interruption. Flushes the stream and reports whether
/// this is resumable (resync) or a hard interruption.
pub async fn handle_idt(fpdu: &Fpdu, transfer: &mut TransferContext, server_connection_id: u8) -> Result<(Fpdu, IdtOutcome), PesitError> {
    let reason = fpdu.params().and_then(|p| p.find(pi::END_OF_TRANSFER_REASON)).and_then(Parameter::as_u8).unwrap_or(0);
    if let Some(writer) = transfer.writer.as_mut() {
        writer.flush().await?;
    }
    let outcome = if reason == 4 { IdtOutcome::RestartPending } else { IdtOutcome::Interrupted };
    Ok((Fpdu::empty(FpduType::ACK_IDT, fpdu.id_src, server_connection_id), outcome))
}

/// TRANS_END (receive side, expected in TDE07): acknowledges and marks the
/// transfer complete via the tracker.
pub async fn handle_trans_end_receive(
    fpdu: &Fpdu,
    transfer: &TransferContext,
    transfer_id: TransferId,
    tracker: &dyn TransferTracker,
    server_connection_id: u8,
) -> Fpdu {
    let checksum = transfer.checksum_hex();
    track("complete", || tracker.complete(transfer_id, Some(checksum.clone()))).await;
    let mut params = ParameterArea::default();
    params.push(Parameter::u32(pi::FILE_SIZE_RESERVATION, transfer.bytes_transferred as u32));
    Fpdu::with_params(FpduType::ACK_TRANS_END, fpdu.id_src, server_connection_id, params)
}

// ---------------------------------------------------------------------
// Send side (TDL sub-machine): READ triggers a pull-driven entity stream.
// ---------------------------------------------------------------------

/// READ: honors a restart checkpoint by opening the source at
/// `resume_offset` (the byte offset the tracker recorded for that
/// checkpoint — §4.5.2 "kept in the TransferRecord").
pub async fn handle_read(
    fpdu: &Fpdu,
    transfer: &mut TransferContext,
    storage: &dyn StorageConnector,
    resume_offset: u64,
    server_connection_id: u8,
) -> Result<Fpdu, PesitError> {
    if let Some(reservation_kb) = transfer.file_size_reservation_kb {
        validate_restart_point(resume_offset, u64::from(reservation_kb) * 1024).map_err(data_plane_violation)?;
    }
    let reader = storage.open_read(&transfer.physical_path, resume_offset).await?;
    transfer.reader = Some(reader);
    transfer.bytes_transferred = resume_offset;
    transfer.restart_point = fpdu.params().and_then(|p| p.find(pi::RESTART_POINT)).and_then(Parameter::as_u32).unwrap_or(0);
    Ok(Fpdu::empty(FpduType::ACK_READ, fpdu.id_src, server_connection_id))
}

/// One step of the send loop: either data frames to write with no response
/// expected, a SYN the caller must write and then await a matching
/// ACK_SYN for (via [`confirm_sync`]), or the terminal DTF_END.
pub enum SendStep {
    Data(Vec<Fpdu>),
    Sync(Fpdu),
    End(Fpdu),
}

/// Produces the next [`SendStep`], reading from `transfer.reader` and
/// consulting the negotiated sync interval (§4.5.2: "before sending an
/// entity whose inclusion would push bytes_since_last_sync beyond the
/// negotiated interval, send SYN").
pub async fn next_send_step(transfer: &mut TransferContext, session: &SessionContext) -> Result<SendStep, PesitError> {
    if session.sync_points_enabled && transfer.bytes_since_last_sync > 0 && transfer.bytes_since_last_sync >= session.sync_interval_bytes {
        let sync_num = transfer.next_sync_point();
        let mut params = ParameterArea::default();
        params.push(Parameter::u32(pi::SYNC_POINT_NUMBER, u32::from(sync_num)));
        let fpdu = Fpdu::with_params(FpduType::SYN, session.peer_connection_id.0, session.server_connection_id.0, params);
        return Ok(SendStep::Sync(fpdu));
    }

    let reader = transfer.reader.as_mut().ok_or_else(|| data_plane_violation(DiagnosticCode::PROTOCOL_ERROR))?;

    if requires_segmentation(transfer.max_entity_size, transfer.record_length) {
        let article = reader.read_chunk(transfer.record_length as usize).await?;
        if article.is_empty() {
            return Ok(SendStep::End(Fpdu::empty(FpduType::DTF_END, session.peer_connection_id.0, session.server_connection_id.0)));
        }
        transfer.bytes_transferred += article.len() as u64;
        transfer.bytes_since_last_sync += article.len() as u64;
        transfer.records_transferred += 1;
        return Ok(SendStep::Data(segment_article(&article, transfer.max_entity_size, session)));
    }

    let per_entity = articles_per_entity(transfer.max_entity_size, transfer.record_length);
    let mut articles = Vec::new();
    for _ in 0..per_entity {
        let chunk = reader.read_chunk(transfer.record_length as usize).await?;
        if chunk.is_empty() {
            break;
        }
        transfer.bytes_transferred += chunk.len() as u64;
        transfer.bytes_since_last_sync += chunk.len() as u64;
        transfer.records_transferred += 1;
        articles.push(chunk);
    }

    if articles.is_empty() {
        return Ok(SendStep::End(Fpdu::empty(FpduType::DTF_END, session.peer_connection_id.0, session.server_connection_id.0)));
    }

    let count = articles.len() as u8;
    let fpdu = Fpdu { fpdu_type: FpduType::DTF, id_dst: session.peer_connection_id.0, id_src: count, body: Body::Articles(articles) };
    Ok(SendStep::Data(vec![fpdu]))
}

fn segment_article(article: &[u8], max_entity_size: u32, session: &SessionContext) -> Vec<Fpdu> {
    let chunk_size = (max_entity_size.max(1)) as usize;
    let chunks: Vec<&[u8]> = article.chunks(chunk_size).collect();
    let last = chunks.len().saturating_sub(1);
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let fpdu_type = if i == last {
                FpduType::DTFFA
            } else if i == 0 {
                FpduType::DTFDA
            } else {
                FpduType::DTFMA
            };
            Fpdu { fpdu_type, id_dst: session.peer_connection_id.0, id_src: session.server_connection_id.0, body: Body::RawFragment(chunk.to_vec()) }
        })
        .collect()
}

/// Confirms a peer's ACK_SYN matches the sync point we just requested, and
/// resets the sync byte counter. A mismatch means the peer echoed the wrong
/// number or we raced a retransmit — both are protocol violations.
pub fn confirm_sync(fpdu: &Fpdu, transfer: &mut TransferContext) -> Result<(), PesitError> {
    let params = fpdu.params().ok_or_else(|| data_plane_violation(DiagnosticCode::PROTOCOL_ERROR))?;
    let acked = params.find(pi::SYNC_POINT_NUMBER).and_then(Parameter::as_u32).ok_or_else(|| data_plane_violation(DiagnosticCode::PROTOCOL_ERROR))?;
    if acked != transfer.current_sync_point {
        return Err(data_plane_violation(DiagnosticCode::PROTOCOL_ERROR));
    }
    transfer.bytes_since_last_sync = 0;
    Ok(())
}
