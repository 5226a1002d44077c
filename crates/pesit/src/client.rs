//! Client driver (§4.5.3, C7): orchestrates CONNECT and the send/receive
//! FPDU sequences over a single [`FramedTransport`], including PI_25
//! downward entity-size renegotiation and receive-side restart.
//!
//! Unlike the server dispatcher, a client session is a single straight-line
//! sequence the caller drives explicitly — there is no admission loop, and
//! every suspension point is a plain `.await` in [`send_file`]/[`receive_file`].
//! Both still report into the same `TransferTracker` (C8) the server
//! dispatcher does, so a transfer initiated from either side of a
//! connection leaves the same durable record behind (§4.7).

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use pesit_msg::{pgi, pi, Fpdu, FpduType, Parameter, ParameterArea, ParameterGroup};
use pesit_transport::{FramedTransport, TransportConfig, TransportError};
use pesit_types::{ConnectionId, DiagnosticCode, TransferId};

use crate::config::ClientConfig;
use crate::error::PesitError;
use crate::negotiation::{self, ClientNegotiation};
use crate::session::AccessType;
use crate::storage::StorageConnector;
use crate::tracker::{track, TransferTracker};
use crate::transfer::TransferContext;
use crate::transfer_engine::{self, SendStep};

/// Overhead the entity-size negotiation subtracts before fitting articles
/// (mirrors `transfer_engine::ENTITY_HEADER_OVERHEAD`).
const HEADER_OVERHEAD: u32 = 6;
/// The client's own connection id; Hors-SIT sessions are 1:1, so a fixed
/// id is sufficient (the server echoes it back as `id_dst`).
const CLIENT_CONNECTION_ID: ConnectionId = ConnectionId(1);

pub struct TransferOutcome {
    pub bytes_transferred: u64,
    pub records_transferred: u64,
}

/// Dials `addr`, completes the EBCDIC pre-connection handshake, and
/// negotiates CONNECT/ACONNECT (§4.3).
async fn connect_and_negotiate(
    addr: &str,
    transport_cfg: &TransportConfig,
    client_cfg: &ClientConfig,
    requester_name: &str,
    server_name: &str,
    password: Option<&str>,
    access: AccessType,
) -> Result<(FramedTransport, ClientNegotiation), PesitError> {
    let mut transport = pesit_transport::connect(addr, transport_cfg, false).await?;
    let connect = negotiation::build_connect(
        requester_name,
        server_name,
        password,
        client_cfg.protocol_version,
        access,
        true,
        true,
        CLIENT_CONNECTION_ID,
    );
    transport.write_frame(&pesit_msg::encode(&connect, transport.ebcdic())).await?;

    let reply = read_reply(&mut transport, client_cfg.read_timeout()).await?;
    match negotiation::handle_connect_reply(&reply) {
        Ok(negotiated) => Ok((transport, negotiated)),
        Err(diagnostic) => Err(PesitError::NegotiationRejected { diagnostic }),
    }
}

async fn read_reply(transport: &mut FramedTransport, read_timeout: Duration) -> Result<Fpdu, PesitError> {
    let frame = timeout(read_timeout, transport.read_frame())
        .await
        .map_err(|_| PesitError::Timeout("reply frame"))??
        .ok_or(PesitError::Timeout("reply frame"))?;
    Ok(pesit_msg::parse(&frame, transport.ebcdic())?)
}

fn expect(fpdu: &Fpdu, expected: FpduType) -> Result<(), PesitError> {
    if fpdu.fpdu_type != expected {
        return Err(PesitError::UnexpectedFpdu { state: crate::state::ServerState::Error, fpdu_type: fpdu.fpdu_type });
    }
    Ok(())
}

fn response_diagnostic(fpdu: &Fpdu) -> Option<DiagnosticCode> {
    let params = fpdu.params()?;
    let bytes = params.find(pi::DIAGNOSTIC)?.as_bytes();
    if bytes.len() < 3 {
        return None;
    }
    let mut arr = [0u8; 3];
    arr.copy_from_slice(&bytes[..3]);
    let code = DiagnosticCode::from_bytes(arr);
    if code.is_ok() {
        None
    } else {
        Some(code)
    }
}

/// Mints (or, on a degraded tracker, fakes) a `TransferId` for a new
/// client-initiated transfer, the same fallback `dispatcher::track_create`
/// uses server-side (§4.7: a tracker outage must never block a transfer).
async fn track_create(
    tracker: &dyn TransferTracker,
    server_id: &str,
    partner_id: &str,
    virtual_name: &str,
    direction: AccessType,
    remote_addr: SocketAddr,
) -> TransferId {
    match tracker.create(0, server_id, partner_id, virtual_name, direction, remote_addr).await {
        Ok(id) => id,
        Err(e) => {
            log::warn!("transfer tracker create failed (degraded durability): {e}");
            TransferId::from(0)
        }
    }
}

/// §4.5.3 send: CONNECT, CREATE with downward PI_25 renegotiation on
/// rejection, OPEN, WRITE, the full data stream, then the graceful
/// teardown sequence.
#[allow(clippy::too_many_arguments)]
pub async fn send_file(
    addr: &str,
    transport_cfg: &TransportConfig,
    client_cfg: &ClientConfig,
    requester_name: &str,
    server_name: &str,
    password: Option<&str>,
    virtual_name: &str,
    local_path: &Path,
    record_length: u32,
    storage: &dyn StorageConnector,
    tracker: &dyn TransferTracker,
    initial_max_entity_size: u32,
) -> Result<TransferOutcome, PesitError> {
    let (mut transport, negotiated) =
        connect_and_negotiate(addr, transport_cfg, client_cfg, requester_name, server_name, password, AccessType::Write).await?;
    let remote_addr = transport.peer_addr();
    let transfer_id = track_create(tracker, server_name, requester_name, virtual_name, AccessType::Write, remote_addr).await;

    match send_streaming(&mut transport, client_cfg, &negotiated, virtual_name, local_path, record_length, storage, tracker, transfer_id, initial_max_entity_size).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            track("fail", || tracker.fail(transfer_id, e.diagnostic().unwrap_or(DiagnosticCode::PROTOCOL_ERROR), "send aborted")).await;
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn send_streaming(
    transport: &mut FramedTransport,
    client_cfg: &ClientConfig,
    negotiated: &ClientNegotiation,
    virtual_name: &str,
    local_path: &Path,
    record_length: u32,
    storage: &dyn StorageConnector,
    tracker: &dyn TransferTracker,
    transfer_id: TransferId,
    initial_max_entity_size: u32,
) -> Result<TransferOutcome, PesitError> {
    let server_connection_id = negotiated.server_connection_id;
    let mut max_entity_size = initial_max_entity_size.min(negotiated.max_entity_size);
    let floor = record_length + HEADER_OVERHEAD;

    let (ack_create, used_max_entity_size) = loop {
        let mut file_id = ParameterGroup::new(pgi::FILE_IDENTIFICATION, Vec::new());
        file_id.params.push(Parameter::str(pi::FILENAME, virtual_name));
        let mut area = ParameterArea::default();
        area.push_group(file_id);
        area.push(Parameter::u32(pi::MAX_ENTITY_SIZE, max_entity_size));
        let create = Fpdu::with_params(FpduType::CREATE, u8::from(server_connection_id), u8::from(CLIENT_CONNECTION_ID), area);
        transport.write_frame(&pesit_msg::encode(&create, transport.ebcdic())).await?;

        let reply = read_reply(transport, client_cfg.read_timeout()).await?;
        match response_diagnostic(&reply) {
            Some(diagnostic) if max_entity_size > floor => {
                log::warn!("CREATE rejected with {diagnostic}, halving PI_25 from {max_entity_size}");
                max_entity_size = (max_entity_size / 2).max(floor);
                continue;
            }
            Some(diagnostic) => return Err(PesitError::SelectionFailed { diagnostic }),
            None => {
                expect(&reply, FpduType::ACK_CREATE)?;
                let negotiated_max = reply.params().and_then(|p| p.find(pi::MAX_ENTITY_SIZE)).and_then(Parameter::as_u32).unwrap_or(max_entity_size);
                break (reply, negotiated_max);
            }
        }
    };
    let _ = ack_create;

    let size = storage.size(local_path).await.ok();
    track("start", || tracker.start(transfer_id, size, &local_path.to_string_lossy())).await;

    let open = Fpdu::empty(FpduType::OPEN, u8::from(server_connection_id), u8::from(CLIENT_CONNECTION_ID));
    transport.write_frame(&pesit_msg::encode(&open, transport.ebcdic())).await?;
    expect(&read_reply(transport, client_cfg.read_timeout()).await?, FpduType::ACK_OPEN)?;

    let write = Fpdu::empty(FpduType::WRITE, u8::from(server_connection_id), u8::from(CLIENT_CONNECTION_ID));
    transport.write_frame(&pesit_msg::encode(&write, transport.ebcdic())).await?;
    expect(&read_reply(transport, client_cfg.read_timeout()).await?, FpduType::ACK_WRITE)?;

    let reader = storage.open_read(local_path, 0).await?;
    let mut transfer = TransferContext::new_read(transfer_id, virtual_name.to_string(), local_path.to_path_buf(), record_length, used_max_entity_size, 0);
    transfer.reader = Some(reader);

    let pseudo_session = local_send_session(server_connection_id, negotiated.sync_interval_bytes, negotiated.resync_enabled);
    loop {
        let step = transfer_engine::next_send_step(&mut transfer, &pseudo_session).await?;
        match step {
            SendStep::Data(fpdus) => {
                for fpdu in &fpdus {
                    transport.write_frame(&pesit_msg::encode(fpdu, transport.ebcdic())).await?;
                }
            }
            SendStep::Sync(syn) => {
                transport.write_frame(&pesit_msg::encode(&syn, transport.ebcdic())).await?;
                let ack = read_reply(transport, client_cfg.read_timeout()).await?;
                expect(&ack, FpduType::ACK_SYN)?;
                transfer_engine::confirm_sync(&ack, &mut transfer)?;
                let bytes = transfer.bytes_transferred;
                let sync_num = transfer.current_sync_point;
                track("record_sync", || tracker.record_sync(transfer_id, bytes, sync_num)).await;
            }
            SendStep::End(end) => {
                transport.write_frame(&pesit_msg::encode(&end, transport.ebcdic())).await?;
                break;
            }
        }
    }

    let trans_end = Fpdu::empty(FpduType::TRANS_END, u8::from(server_connection_id), u8::from(CLIENT_CONNECTION_ID));
    transport.write_frame(&pesit_msg::encode(&trans_end, transport.ebcdic())).await?;
    expect(&read_reply(transport, client_cfg.read_timeout()).await?, FpduType::ACK_TRANS_END)?;
    // No running hash is kept on the sending side (§9: only the receiver
    // verifies content against a checksum), so nothing meaningful to pass.
    track("complete", || tracker.complete(transfer_id, None)).await;

    let close = Fpdu::empty(FpduType::CLOSE, u8::from(server_connection_id), u8::from(CLIENT_CONNECTION_ID));
    transport.write_frame(&pesit_msg::encode(&close, transport.ebcdic())).await?;
    expect(&read_reply(transport, client_cfg.read_timeout()).await?, FpduType::ACK_CLOSE)?;

    teardown(transport, server_connection_id, client_cfg).await?;

    Ok(TransferOutcome { bytes_transferred: transfer.bytes_transferred, records_transferred: transfer.records_transferred })
}

/// §4.5.3 receive, with the IDT/resync restart loop: each resumed attempt
/// chains onto the prior one via `TransferTracker::retry` (§4.7, §8
/// invariant 3), and the local file is truncated back to whatever that
/// chain's last acknowledged checkpoint was.
#[allow(clippy::too_many_arguments)]
pub async fn receive_file(
    addr: &str,
    transport_cfg: &TransportConfig,
    client_cfg: &ClientConfig,
    requester_name: &str,
    server_name: &str,
    password: Option<&str>,
    virtual_name: &str,
    local_path: &Path,
    storage: &dyn StorageConnector,
    tracker: &dyn TransferTracker,
) -> Result<TransferOutcome, PesitError> {
    let mut transfer_id = track_create(tracker, server_name, requester_name, virtual_name, AccessType::Read, "0.0.0.0:0".parse().unwrap()).await;
    let mut restart_point: u32 = 0;
    let mut record_length: u32 = 512;

    loop {
        match receive_once(
            addr,
            transport_cfg,
            client_cfg,
            requester_name,
            server_name,
            password,
            virtual_name,
            local_path,
            storage,
            tracker,
            transfer_id,
            restart_point,
            record_length,
        )
        .await
        {
            Ok(outcome) => return Ok(outcome),
            Err(ReceiveInterrupted::Resumable { record_length: rl }) => {
                let checkpoint_offset = tracker.get(transfer_id).await.map(|r| r.last_sync_point_offset).unwrap_or(0);
                let next_id = match tracker.retry(transfer_id).await {
                    Ok(id) => id,
                    Err(e) => {
                        log::warn!("receive retry for {virtual_name} exhausted: {e}");
                        track("fail", || tracker.fail(transfer_id, DiagnosticCode::PROTOCOL_ERROR, "retry budget exhausted")).await;
                        return Err(PesitError::Timeout("receive retry budget exhausted"));
                    }
                };
                log::warn!("receive of {virtual_name} interrupted, resuming from checkpoint at byte {checkpoint_offset}");
                let mut writer = storage.open_write(local_path, true).await?;
                writer.truncate(checkpoint_offset).await?;
                restart_point = (checkpoint_offset / u64::from(rl.max(1))) as u32;
                record_length = rl;
                transfer_id = next_id;
                sleep(client_cfg.retry_delay()).await;
            }
            Err(ReceiveInterrupted::Fatal(e)) => {
                track("fail", || tracker.fail(transfer_id, e.diagnostic().unwrap_or(DiagnosticCode::PROTOCOL_ERROR), "receive aborted")).await;
                return Err(e);
            }
        }
    }
}

enum ReceiveInterrupted {
    Resumable { record_length: u32 },
    Fatal(PesitError),
}

impl From<PesitError> for ReceiveInterrupted {
    fn from(e: PesitError) -> Self {
        ReceiveInterrupted::Fatal(e)
    }
}

impl From<TransportError> for ReceiveInterrupted {
    fn from(e: TransportError) -> Self {
        ReceiveInterrupted::Fatal(e.into())
    }
}

impl From<pesit_msg::ParseError> for ReceiveInterrupted {
    fn from(e: pesit_msg::ParseError) -> Self {
        ReceiveInterrupted::Fatal(e.into())
    }
}

#[allow(clippy::too_many_arguments)]
async fn receive_once(
    addr: &str,
    transport_cfg: &TransportConfig,
    client_cfg: &ClientConfig,
    requester_name: &str,
    server_name: &str,
    password: Option<&str>,
    virtual_name: &str,
    local_path: &Path,
    storage: &dyn StorageConnector,
    tracker: &dyn TransferTracker,
    transfer_id: TransferId,
    restart_point: u32,
    record_length_hint: u32,
) -> Result<TransferOutcome, ReceiveInterrupted> {
    let (mut transport, negotiated) =
        connect_and_negotiate(addr, transport_cfg, client_cfg, requester_name, server_name, password, AccessType::Read).await?;
    let server_connection_id = negotiated.server_connection_id;

    let mut file_id = ParameterGroup::new(pgi::FILE_IDENTIFICATION, Vec::new());
    file_id.params.push(Parameter::str(pi::FILENAME, virtual_name));
    let mut area = ParameterArea::default();
    area.push_group(file_id);
    area.push(Parameter::u32(pi::RESTART_POINT, restart_point));
    let select = Fpdu::with_params(FpduType::SELECT, u8::from(server_connection_id), u8::from(CLIENT_CONNECTION_ID), area);
    transport.write_frame(&pesit_msg::encode(&select, transport.ebcdic())).await?;

    let ack_select = read_reply(&mut transport, client_cfg.read_timeout()).await?;
    if let Some(diagnostic) = response_diagnostic(&ack_select) {
        return Err(PesitError::SelectionFailed { diagnostic }.into());
    }
    expect(&ack_select, FpduType::ACK_SELECT)?;
    let record_length = ack_select
        .params()
        .and_then(|p| p.find_group(pgi::LOGICAL_ATTRIBUTES))
        .and_then(|g| g.find(pi::ARTICLE_LENGTH))
        .and_then(Parameter::as_u16)
        .map(u32::from)
        .unwrap_or(record_length_hint);

    let size = ack_select
        .params()
        .and_then(|p| p.find_group(pgi::PHYSICAL_ATTRIBUTES))
        .and_then(|g| g.find(pi::FILE_SIZE_RESERVATION))
        .and_then(Parameter::as_u32)
        .map(|kb| u64::from(kb) * 1024);
    track("start", || tracker.start(transfer_id, size, &local_path.to_string_lossy())).await;

    let open = Fpdu::empty(FpduType::OPEN, u8::from(server_connection_id), u8::from(CLIENT_CONNECTION_ID));
    transport.write_frame(&pesit_msg::encode(&open, transport.ebcdic())).await?;
    expect(&read_reply(&mut transport, client_cfg.read_timeout()).await?, FpduType::ACK_OPEN)?;

    let mut area = ParameterArea::default();
    area.push(Parameter::u32(pi::RESTART_POINT, restart_point));
    let read = Fpdu::with_params(FpduType::READ, u8::from(server_connection_id), u8::from(CLIENT_CONNECTION_ID), area);
    transport.write_frame(&pesit_msg::encode(&read, transport.ebcdic())).await?;
    expect(&read_reply(&mut transport, client_cfg.read_timeout()).await?, FpduType::ACK_READ)?;

    let append = restart_point > 0;
    let writer = storage.open_write(local_path, append).await?;
    let mut transfer = TransferContext::new_write(
        transfer_id,
        virtual_name.to_string(),
        local_path.to_path_buf(),
        record_length,
        negotiated.max_entity_size,
        None,
        restart_point,
    );
    transfer.writer = Some(writer);
    transfer.current_sync_point = restart_point;

    loop {
        let frame = timeout(client_cfg.read_timeout(), transport.read_frame())
            .await
            .map_err(|_| PesitError::Timeout("data frame"))??
            .ok_or(PesitError::Timeout("data frame"))?;
        let fpdu = pesit_msg::parse(&frame, transport.ebcdic())?;

        match fpdu.fpdu_type {
            FpduType::DTF | FpduType::DTFDA | FpduType::DTFMA | FpduType::DTFFA => {
                transfer_engine::handle_dtf(&fpdu, &mut transfer).await?;
                track("progress", || tracker.progress(transfer_id, transfer.bytes_transferred)).await;
            }
            FpduType::SYN => {
                let ack_syn = transfer_engine::handle_syn(&fpdu, &mut transfer, transfer_id, tracker, u8::from(CLIENT_CONNECTION_ID)).await?;
                transport.write_frame(&pesit_msg::encode(&ack_syn, transport.ebcdic())).await?;
            }
            FpduType::IDT => {
                let reason = fpdu.params().and_then(|p| p.find(pi::END_OF_TRANSFER_REASON)).and_then(Parameter::as_u8).unwrap_or(0);
                if let Some(writer) = transfer.writer.as_mut() {
                    writer.flush().await?;
                }
                let ack_idt = Fpdu::empty(FpduType::ACK_IDT, u8::from(server_connection_id), u8::from(CLIENT_CONNECTION_ID));
                transport.write_frame(&pesit_msg::encode(&ack_idt, transport.ebcdic())).await?;
                if reason == 4 {
                    track("interrupt", || tracker.interrupt(transfer_id, "resync requested")).await;
                    return Err(ReceiveInterrupted::Resumable { record_length });
                }
                return Err(PesitError::PeerAbort(DiagnosticCode::PROTOCOL_ERROR).into());
            }
            FpduType::DTF_END => {
                transfer_engine::handle_dtf_end(&mut transfer).await?;
                break;
            }
            other => return Err(PesitError::UnexpectedFpdu { state: crate::state::ServerState::Error, fpdu_type: other }.into()),
        }
    }

    let trans_end = Fpdu::empty(FpduType::TRANS_END, u8::from(server_connection_id), u8::from(CLIENT_CONNECTION_ID));
    transport.write_frame(&pesit_msg::encode(&trans_end, transport.ebcdic())).await?;
    expect(&read_reply(&mut transport, client_cfg.read_timeout()).await?, FpduType::ACK_TRANS_END)?;
    track("complete", || tracker.complete(transfer_id, Some(transfer.checksum_hex()))).await;

    let close = Fpdu::empty(FpduType::CLOSE, u8::from(server_connection_id), u8::from(CLIENT_CONNECTION_ID));
    transport.write_frame(&pesit_msg::encode(&close, transport.ebcdic())).await?;
    expect(&read_reply(&mut transport, client_cfg.read_timeout()).await?, FpduType::ACK_CLOSE)?;

    teardown(&mut transport, server_connection_id, client_cfg).await?;

    Ok(TransferOutcome { bytes_transferred: transfer.bytes_transferred, records_transferred: transfer.records_transferred })
}

async fn teardown(transport: &mut FramedTransport, server_connection_id: ConnectionId, client_cfg: &ClientConfig) -> Result<(), PesitError> {
    let deselect = Fpdu::empty(FpduType::DESELECT, u8::from(server_connection_id), u8::from(CLIENT_CONNECTION_ID));
    transport.write_frame(&pesit_msg::encode(&deselect, transport.ebcdic())).await?;
    expect(&read_reply(transport, client_cfg.read_timeout()).await?, FpduType::ACK_DESELECT)?;

    let release = Fpdu::empty(FpduType::RELEASE, u8::from(server_connection_id), u8::from(CLIENT_CONNECTION_ID));
    transport.write_frame(&pesit_msg::encode(&release, transport.ebcdic())).await?;
    expect(&read_reply(transport, client_cfg.read_timeout()).await?, FpduType::RELCONF)?;
    Ok(())
}

/// A stand-in `SessionContext` carrying only the fields
/// `transfer_engine::next_send_step` reads, so the client driver does not
/// need a full server-side session to reuse the send-loop logic.
fn local_send_session(server_connection_id: ConnectionId, sync_interval_bytes: Option<u64>, resync_enabled: bool) -> crate::session::SessionContext {
    let mut session = crate::session::SessionContext::new(0, "0.0.0.0:0".parse().unwrap());
    session.server_connection_id = CLIENT_CONNECTION_ID;
    session.peer_connection_id = server_connection_id;
    session.sync_points_enabled = sync_interval_bytes.is_some();
    session.sync_interval_bytes = sync_interval_bytes.unwrap_or(u64::MAX);
    session.resync_enabled = resync_enabled;
    session
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_diagnostic_reads_ok_as_none() {
        let mut area = ParameterArea::default();
        area.push(Parameter::new(pi::DIAGNOSTIC, DiagnosticCode::OK.to_bytes().to_vec()));
        let fpdu = Fpdu::with_params(FpduType::ACK_CREATE, 1, 2, area);
        assert!(response_diagnostic(&fpdu).is_none());
    }

    #[test]
    fn response_diagnostic_reads_error_code() {
        let mut area = ParameterArea::default();
        area.push(Parameter::new(pi::DIAGNOSTIC, DiagnosticCode::FILE_NOT_FOUND.to_bytes().to_vec()));
        let fpdu = Fpdu::with_params(FpduType::RCONNECT, 1, 2, area);
        assert_eq!(response_diagnostic(&fpdu), Some(DiagnosticCode::FILE_NOT_FOUND));
    }
}
