//! Session dispatcher (§4.6 driving loop, §5, §9): the accept loop (C9) and
//! the per-session task that drives [`crate::fsm::on_fpdu`] against a real
//! [`pesit_transport::FramedTransport`], calling into negotiation,
//! lifecycle, transfer-engine and message-protocol handlers as each FPDU
//! arrives.
//!
//! `fsm::on_fpdu` itself stays a pure, non-I/O function (§4.6); this module
//! is the "session task" the design notes describe as owning every
//! suspension point (frame read/write, storage I/O, tracker calls, the
//! ACK_SYN wait).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use pesit_msg::{pgi, pi, Fpdu, FpduType, Parameter, ParameterArea};
use pesit_transport::{FramedTransport, TransportConfig};
use pesit_types::{DiagnosticCode, TransferId};

use crate::error::PesitError;
use crate::fsm::{self, Action};
use crate::leader::LeaderSignal;
use crate::lifecycle::{self, LifecycleContext};
use crate::message;
use crate::negotiation::{self, ConnectOutcome, NegotiationContext};
use crate::registry::Registry;
use crate::session::{AccessType, SessionContext};
use crate::state::ServerState;
use crate::storage::StorageConnector;
use crate::tracker::{track, TransferTracker};
use crate::transfer_engine::{self, IdtOutcome, SendStep};

/// Everything about this server instance that does not vary per session
/// (§9 "Arena/index for the registry caches": read-mostly, cheaply cloned).
#[derive(Clone)]
pub struct DispatcherConfig {
    pub server_id: String,
    pub supported_version: u8,
    pub max_entity_size: u32,
    pub sync_points_enabled: bool,
    pub sync_interval_kb: u32,
    pub sync_window: u16,
    pub strict_partner_check: bool,
    pub strict_file_check: bool,
    pub default_receive_dir: PathBuf,
    /// Base read timeout; extended proportionally for bulk transfers (§5:
    /// `base + ceil(size/50MB)*60s`, capped at 30 minutes).
    pub read_timeout: Duration,
    pub sync_ack_timeout: Duration,
    pub max_connections: usize,
}

impl DispatcherConfig {
    pub fn from_server_config(cfg: &crate::config::ServerConfig) -> Self {
        Self {
            server_id: cfg.id.clone(),
            supported_version: cfg.protocol_version,
            max_entity_size: cfg.max_entity_size,
            sync_points_enabled: cfg.sync_points_enabled,
            sync_interval_kb: cfg.sync_interval_kb,
            sync_window: 1,
            strict_partner_check: cfg.strict_partner_check,
            strict_file_check: cfg.strict_file_check,
            default_receive_dir: cfg.receive_directory.clone(),
            read_timeout: cfg.read_timeout(),
            sync_ack_timeout: Duration::from_secs(30),
            max_connections: cfg.max_connections,
        }
    }
}

/// §5: `base + ceil(size/50MB)*60s`, capped at 30 minutes. Applied by the
/// caller driving a bulk read/write, not hard-coded into the transport.
pub fn bulk_read_timeout(base: Duration, size_hint: Option<u64>) -> Duration {
    const CHUNK: u64 = 50 * 1024 * 1024;
    const CAP: Duration = Duration::from_secs(30 * 60);
    let extension_units = size_hint.map(|s| s.div_ceil(CHUNK)).unwrap_or(0);
    let extended = base + Duration::from_secs(extension_units * 60);
    extended.min(CAP)
}

/// The server-side accept loop and session multiplexer (C9).
pub struct Dispatcher {
    pub config: DispatcherConfig,
    pub registry: Registry,
    pub storage: Arc<dyn StorageConnector>,
    pub tracker: Arc<dyn TransferTracker>,
    pub leader: Arc<dyn LeaderSignal>,
    next_session_id: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        registry: Registry,
        storage: Arc<dyn StorageConnector>,
        tracker: Arc<dyn TransferTracker>,
        leader: Arc<dyn LeaderSignal>,
    ) -> Self {
        Self { config, registry, storage, tracker, leader, next_session_id: AtomicU64::new(1) }
    }

    /// Binds `addr` and accepts sessions until `shutdown` fires. Admission
    /// is capped at `max_connections` via a semaphore that blocks the
    /// accept loop rather than refusing silently (§5).
    pub async fn serve(
        self: Arc<Self>,
        addr: SocketAddr,
        transport_cfg: TransportConfig,
        shutdown: CancellationToken,
    ) -> Result<(), PesitError> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("pesit server listening on {addr}");
        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    log::info!("dispatcher shutting down, no longer accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer_addr) = accepted?;
                    if !self.leader.am_i_leader().await {
                        log::debug!("not cluster leader, refusing connection from {peer_addr}");
                        drop(stream);
                        continue;
                    }
                    // Blocks briefly rather than dropping silently once at
                    // capacity (§5).
                    let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                    let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
                    let this = self.clone();
                    let transport_cfg = transport_cfg.clone();
                    let session_cancel = shutdown.child_token();
                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = this.run_session(stream, session_id, peer_addr, &transport_cfg, session_cancel).await {
                            log::warn!("session {session_id} ({peer_addr}) ended with error: {e}");
                        }
                    });
                }
            }
        }
    }

    async fn run_session(
        &self,
        stream: TcpStream,
        session_id: u64,
        peer_addr: SocketAddr,
        transport_cfg: &TransportConfig,
        cancel: CancellationToken,
    ) -> Result<(), PesitError> {
        let transport = FramedTransport::accept(stream, transport_cfg).await?;
        let mut session = SessionContext::new(session_id, peer_addr);
        session.ebcdic = transport.ebcdic();
        let mut driver = SessionDriver {
            config: &self.config,
            registry: &self.registry,
            storage: self.storage.as_ref(),
            tracker: self.tracker.as_ref(),
            transport,
            session,
            cancel,
        };
        driver.run().await
    }
}

/// Drives one live connection's FSM. Owned exclusively by its session task
/// (§3: `SessionContext` "owned by exactly one session task").
struct SessionDriver<'a> {
    config: &'a DispatcherConfig,
    registry: &'a Registry,
    storage: &'a dyn StorageConnector,
    tracker: &'a dyn TransferTracker,
    transport: FramedTransport,
    session: SessionContext,
    cancel: CancellationToken,
}

enum Flow {
    Continue,
    Close,
}

impl<'a> SessionDriver<'a> {
    async fn run(&mut self) -> Result<(), PesitError> {
        loop {
            if self.cancel.is_cancelled() {
                self.send_abort(DiagnosticCode::PROTOCOL_ERROR).await.ok();
                return Ok(());
            }

            let read = timeout(self.config.read_timeout, self.transport.read_frame()).await;
            let frame = match read {
                Ok(Ok(Some(bytes))) => bytes,
                Ok(Ok(None)) => return Ok(()), // peer closed cleanly
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    self.fail_current_transfer(DiagnosticCode::PROTOCOL_ERROR).await;
                    return Err(PesitError::Timeout("frame read"));
                }
            };

            let fpdu = match pesit_msg::parse(&frame, self.transport.ebcdic()) {
                Ok(f) => f,
                Err(e) => {
                    log::warn!("session {} codec error: {e}", self.session.session_id);
                    self.send_abort(DiagnosticCode::PROTOCOL_ERROR).await.ok();
                    return Ok(());
                }
            };

            match self.handle(fpdu).await {
                Ok(Flow::Continue) => continue,
                Ok(Flow::Close) => return Ok(()),
                Err(e) => {
                    let diag = e.diagnostic().unwrap_or(DiagnosticCode::PROTOCOL_ERROR);
                    self.fail_current_transfer(diag).await;
                    self.send_abort(diag).await.ok();
                    return Ok(());
                }
            }
        }
    }

    async fn handle(&mut self, fpdu: Fpdu) -> Result<Flow, PesitError> {
        if fpdu.fpdu_type == FpduType::ABORT {
            log::info!("session {} received ABORT from peer", self.session.session_id);
            self.fail_current_transfer(DiagnosticCode::OK).await;
            self.session.state = ServerState::Cn01Repos;
            return Ok(Flow::Close);
        }

        let transition = fsm::on_fpdu(self.session.state, fpdu.fpdu_type);
        if let Action::Abort(diagnostic) = transition.action {
            self.send_abort(diagnostic).await.ok();
            return Ok(Flow::Close);
        }

        match fpdu.fpdu_type {
            FpduType::CONNECT => self.on_connect(&fpdu).await,
            FpduType::RELEASE => self.on_release(&fpdu).await,
            FpduType::CREATE => self.on_create(&fpdu).await,
            FpduType::SELECT => self.on_select(&fpdu).await,
            FpduType::OPEN => self.on_open(&fpdu).await,
            FpduType::CLOSE => self.on_close(&fpdu).await,
            FpduType::DESELECT => self.on_deselect(&fpdu).await,
            FpduType::WRITE => self.on_write(&fpdu).await,
            FpduType::READ => self.on_read(&fpdu).await,
            FpduType::DTF | FpduType::DTFDA | FpduType::DTFMA | FpduType::DTFFA => self.on_dtf(&fpdu).await,
            FpduType::SYN => self.on_syn(&fpdu).await,
            FpduType::DTF_END => self.on_dtf_end(&fpdu).await,
            FpduType::IDT => self.on_idt(&fpdu).await,
            FpduType::TRANS_END => self.on_trans_end(&fpdu).await,
            FpduType::MSG => self.on_msg(&fpdu).await,
            FpduType::MSGDM => self.on_msgdm(&fpdu).await,
            FpduType::MSGMM => self.on_msgmm(&fpdu).await,
            FpduType::MSGFM => self.on_msgfm(&fpdu).await,
            other => {
                log::warn!("session {} has no handler for {other}", self.session.session_id);
                self.send_abort(DiagnosticCode::PROTOCOL_ERROR).await.ok();
                Ok(Flow::Close)
            }
        }
        .map(|()| Flow::Continue)
        .or_else(|e| match e {
            // A rejection that already produced its own wire response
            // (RCONNECT, file-selection ABORT) does not need another one.
            PesitError::NegotiationRejected { .. } => Ok(Flow::Continue),
            other => Err(other),
        })
    }

    fn negotiation_ctx(&self) -> NegotiationContext<'a> {
        NegotiationContext {
            server_id: &self.config.server_id,
            server_connection_id: self.session.server_connection_id,
            supported_version: self.config.supported_version,
            max_entity_size: self.config.max_entity_size,
            sync_points_enabled: self.config.sync_points_enabled,
            sync_interval_kb: self.config.sync_interval_kb,
            sync_window: self.config.sync_window,
            strict_partner_check: self.config.strict_partner_check,
            registry: self.registry,
        }
    }

    async fn on_connect(&mut self, fpdu: &Fpdu) -> Result<(), PesitError> {
        // The server picks its own connection id once per session; reuse it
        // across retries after a rejected CONNECT.
        if self.session.server_connection_id.0 == 0 {
            self.session.server_connection_id = pesit_types::ConnectionId::from(
                (self.session.session_id % 255 + 1) as u8,
            );
        }
        match negotiation::handle_connect(fpdu, &self.negotiation_ctx()) {
            ConnectOutcome::Accepted { response, session } => {
                self.transport.write_frame(&pesit_msg::encode(&response, self.transport.ebcdic())).await?;
                self.session.requester_name = session.requester_name;
                self.session.server_name = session.server_name;
                self.session.peer_connection_id = session.peer_connection_id;
                self.session.negotiated_version = session.negotiated_version;
                self.session.access_type = session.access_type;
                self.session.sync_points_enabled = session.sync_points_enabled;
                self.session.sync_interval_bytes = session.sync_interval_bytes;
                self.session.sync_window = session.sync_window;
                self.session.resync_enabled = session.resync_enabled;
                self.session.crc_enabled = session.crc_enabled;
                self.session.max_entity_size = session.max_entity_size;
                self.session.state = ServerState::Cn03Connected;
                Ok(())
            }
            ConnectOutcome::Rejected { response, diagnostic } => {
                self.transport.write_frame(&pesit_msg::encode(&response, self.transport.ebcdic())).await?;
                Err(PesitError::NegotiationRejected { diagnostic })
            }
        }
    }

    async fn on_release(&mut self, fpdu: &Fpdu) -> Result<(), PesitError> {
        let relconf = Fpdu::empty(FpduType::RELCONF, fpdu.id_src, self.session.server_connection_id.0);
        self.transport.write_frame(&pesit_msg::encode(&relconf, self.transport.ebcdic())).await?;
        self.session.state = ServerState::Cn01Repos;
        Ok(())
    }

    fn lifecycle_ctx(&self) -> LifecycleContext<'a> {
        LifecycleContext {
            registry: self.registry,
            storage: self.storage,
            strict_file_check: self.config.strict_file_check,
            configured_max_entity_size: self.config.max_entity_size,
            server_connection_id: self.session.server_connection_id.0,
            default_receive_dir: self.config.default_receive_dir.clone(),
        }
    }

    async fn on_create(&mut self, fpdu: &Fpdu) -> Result<(), PesitError> {
        let virtual_name = peek_virtual_name(fpdu);
        let partner_id = self.session.requester_name.clone();
        let transfer_id = track_create(
            self.tracker,
            self.session.session_id,
            &self.config.server_id,
            &partner_id,
            &virtual_name,
            AccessType::Write,
            self.session.remote_addr,
        )
        .await;

        match lifecycle::handle_create(fpdu, &partner_id, transfer_id, &self.lifecycle_ctx()).await {
            Ok((response, transfer)) => {
                track("start", || self.tracker.start(transfer_id, None, &transfer.physical_path.to_string_lossy())).await;
                self.session.current_transfer_id = Some(transfer_id);
                self.session.transfer = Some(transfer);
                self.session.state = ServerState::Sf03FileSelected;
                self.transport.write_frame(&pesit_msg::encode(&response, self.transport.ebcdic())).await?;
                Ok(())
            }
            Err(e) => {
                track("fail", || self.tracker.fail(transfer_id, e.diagnostic().unwrap_or(DiagnosticCode::FILE_SELECTION_ERROR), "CREATE rejected")).await;
                Err(e)
            }
        }
    }

    async fn on_select(&mut self, fpdu: &Fpdu) -> Result<(), PesitError> {
        let virtual_name = peek_virtual_name(fpdu);
        let restart_point = peek_restart_point(fpdu);
        let partner_id = self.session.requester_name.clone();

        // A nonzero restart point means this SELECT resumes a prior,
        // interrupted transfer (§4.5.2, §8 invariant 3): resolve that
        // transfer's record and chain onto it via `retry` so the resume
        // offset comes from what was actually acknowledged, not a fresh
        // zeroed record. Falls back to a brand-new transfer if no such
        // record exists (e.g. tracker outage, or a stale restart request).
        let resumed = if restart_point > 0 {
            match self.tracker.find_resumable(&partner_id, &virtual_name).await {
                Some(prior) => match self.tracker.retry(prior.id).await {
                    Ok(id) => Some((id, prior.last_sync_point_offset)),
                    Err(e) => {
                        log::warn!("transfer tracker retry failed (degraded durability): {e}");
                        None
                    }
                },
                None => None,
            }
        } else {
            None
        };

        let (transfer_id, resume_offset) = match resumed {
            Some(resumed) => resumed,
            None => {
                let id = track_create(
                    self.tracker,
                    self.session.session_id,
                    &self.config.server_id,
                    &partner_id,
                    &virtual_name,
                    AccessType::Read,
                    self.session.remote_addr,
                )
                .await;
                (id, 0)
            }
        };

        match lifecycle::handle_select(fpdu, &partner_id, transfer_id, &self.lifecycle_ctx()).await {
            Ok((response, mut transfer)) => {
                transfer.resume_offset = resume_offset;
                let size = self.storage.size(&transfer.physical_path).await.ok();
                track("start", || self.tracker.start(transfer_id, size, &transfer.physical_path.to_string_lossy())).await;
                self.session.current_transfer_id = Some(transfer_id);
                self.session.transfer = Some(transfer);
                self.session.state = ServerState::Sf03FileSelected;
                self.transport.write_frame(&pesit_msg::encode(&response, self.transport.ebcdic())).await?;
                Ok(())
            }
            Err(e) => {
                track("fail", || self.tracker.fail(transfer_id, e.diagnostic().unwrap_or(DiagnosticCode::FILE_SELECTION_ERROR), "SELECT rejected")).await;
                Err(e)
            }
        }
    }

    async fn on_open(&mut self, fpdu: &Fpdu) -> Result<(), PesitError> {
        let ctx = self.lifecycle_ctx();
        let transfer = self.session.transfer.as_mut().ok_or_else(protocol_error)?;
        let response = lifecycle::handle_open(fpdu, transfer, &ctx).await?;
        self.session.state = ServerState::Of02TransferReady;
        self.transport.write_frame(&pesit_msg::encode(&response, self.transport.ebcdic())).await?;
        Ok(())
    }

    async fn on_close(&mut self, fpdu: &Fpdu) -> Result<(), PesitError> {
        let transfer = self.session.transfer.as_mut().ok_or_else(protocol_error)?;
        let response = lifecycle::handle_close(fpdu, transfer, self.session.server_connection_id.0).await?;
        self.session.state = ServerState::Sf03FileSelected;
        self.transport.write_frame(&pesit_msg::encode(&response, self.transport.ebcdic())).await?;
        Ok(())
    }

    async fn on_deselect(&mut self, fpdu: &Fpdu) -> Result<(), PesitError> {
        let response = lifecycle::handle_deselect(fpdu, self.session.server_connection_id.0);
        self.session.transfer = None;
        self.session.current_transfer_id = None;
        self.session.state = ServerState::Cn03Connected;
        self.transport.write_frame(&pesit_msg::encode(&response, self.transport.ebcdic())).await?;
        Ok(())
    }

    async fn on_write(&mut self, fpdu: &Fpdu) -> Result<(), PesitError> {
        let response = transfer_engine::handle_write(fpdu, self.session.server_connection_id.0);
        self.session.state = ServerState::Tde02bReceivingData;
        self.transport.write_frame(&pesit_msg::encode(&response, self.transport.ebcdic())).await?;
        Ok(())
    }

    async fn on_dtf(&mut self, fpdu: &Fpdu) -> Result<(), PesitError> {
        let transfer = self.session.transfer.as_mut().ok_or_else(protocol_error)?;
        transfer_engine::handle_dtf(fpdu, transfer).await?;
        if let Some(id) = self.session.current_transfer_id {
            let bytes = transfer.bytes_transferred;
            track("progress", || self.tracker.progress(id, bytes)).await;
        }
        Ok(())
    }

    async fn on_syn(&mut self, fpdu: &Fpdu) -> Result<(), PesitError> {
        let transfer_id = self.session.current_transfer_id.ok_or_else(protocol_error)?;
        let transfer = self.session.transfer.as_mut().ok_or_else(protocol_error)?;
        let response = transfer_engine::handle_syn(fpdu, transfer, transfer_id, self.tracker, self.session.server_connection_id.0).await?;
        self.transport.write_frame(&pesit_msg::encode(&response, self.transport.ebcdic())).await?;
        Ok(())
    }

    async fn on_dtf_end(&mut self, fpdu: &Fpdu) -> Result<(), PesitError> {
        let _ = fpdu;
        let transfer = self.session.transfer.as_mut().ok_or_else(protocol_error)?;
        transfer_engine::handle_dtf_end(transfer).await?;
        self.session.state = ServerState::Tde07WriteEnd;
        Ok(())
    }

    async fn on_idt(&mut self, fpdu: &Fpdu) -> Result<(), PesitError> {
        let transfer = self.session.transfer.as_mut().ok_or_else(protocol_error)?;
        let (response, outcome) = transfer_engine::handle_idt(fpdu, transfer, self.session.server_connection_id.0).await?;
        if let Some(id) = self.session.current_transfer_id {
            match outcome {
                IdtOutcome::RestartPending => track("interrupt", || self.tracker.interrupt(id, "resync requested")).await,
                IdtOutcome::Interrupted => track("interrupt", || self.tracker.interrupt(id, "peer interruption")).await,
            }
        }
        self.session.state = ServerState::Of02TransferReady;
        self.transport.write_frame(&pesit_msg::encode(&response, self.transport.ebcdic())).await?;
        Ok(())
    }

    async fn on_trans_end(&mut self, fpdu: &Fpdu) -> Result<(), PesitError> {
        let transfer_id = self.session.current_transfer_id.ok_or_else(protocol_error)?;
        let transfer = self.session.transfer.as_ref().ok_or_else(protocol_error)?;
        let response = transfer_engine::handle_trans_end_receive(fpdu, transfer, transfer_id, self.tracker, self.session.server_connection_id.0).await;
        self.session.state = ServerState::Of02TransferReady;
        self.transport.write_frame(&pesit_msg::encode(&response, self.transport.ebcdic())).await?;
        Ok(())
    }

    /// READ: we become the TDL (sending) side. Unlike every other handler,
    /// this one drives an inline send loop rather than waiting for the next
    /// incoming FPDU, since PeSIT puts the sender in control of entity and
    /// sync-point pacing (§4.5.2).
    async fn on_read(&mut self, fpdu: &Fpdu) -> Result<(), PesitError> {
        // Resolved once at SELECT time, from the resumed transfer's own
        // record rather than re-derived here (§4.5.2, §8 invariant 3).
        let resume_offset = self.session.transfer.as_ref().map(|t| t.resume_offset).unwrap_or(0);

        let transfer = self.session.transfer.as_mut().ok_or_else(protocol_error)?;
        let response = transfer_engine::handle_read(fpdu, transfer, self.storage, resume_offset, self.session.server_connection_id.0).await?;
        self.session.state = ServerState::Tdl02bSendingData;
        self.transport.write_frame(&pesit_msg::encode(&response, self.transport.ebcdic())).await?;

        loop {
            if self.cancel.is_cancelled() {
                return Err(PesitError::Cancelled);
            }
            let transfer = self.session.transfer.as_mut().ok_or_else(protocol_error)?;
            let step = transfer_engine::next_send_step(transfer, &self.session).await?;
            match step {
                SendStep::Data(fpdus) => {
                    for out in &fpdus {
                        self.transport.write_frame(&pesit_msg::encode(out, self.transport.ebcdic())).await?;
                    }
                }
                SendStep::Sync(syn) => {
                    self.transport.write_frame(&pesit_msg::encode(&syn, self.transport.ebcdic())).await?;
                    let ack = timeout(self.config.sync_ack_timeout, self.transport.read_frame())
                        .await
                        .map_err(|_| PesitError::Timeout("ACK_SYN"))??
                        .ok_or(PesitError::Timeout("ACK_SYN"))?;
                    let ack_fpdu = pesit_msg::parse(&ack, self.transport.ebcdic())?;
                    if ack_fpdu.fpdu_type != FpduType::ACK_SYN {
                        return Err(PesitError::UnexpectedFpdu { state: self.session.state, fpdu_type: ack_fpdu.fpdu_type });
                    }
                    let transfer = self.session.transfer.as_mut().ok_or_else(protocol_error)?;
                    transfer_engine::confirm_sync(&ack_fpdu, transfer)?;
                    if let Some(id) = self.session.current_transfer_id {
                        let bytes = transfer.bytes_transferred;
                        let sync_num = transfer.current_sync_point;
                        track("record_sync", || self.tracker.record_sync(id, bytes, sync_num)).await;
                    }
                }
                SendStep::End(end) => {
                    self.transport.write_frame(&pesit_msg::encode(&end, self.transport.ebcdic())).await?;
                    self.session.state = ServerState::Tdl07ReadEnd;
                    break;
                }
            }
        }
        Ok(())
    }

    async fn on_msg(&mut self, fpdu: &Fpdu) -> Result<(), PesitError> {
        let (body, response) = message::handle_msg(fpdu, self.session.server_connection_id.0)?;
        log::info!("session {} received MSG: {} byte(s)", self.session.session_id, body.len());
        self.transport.write_frame(&pesit_msg::encode(&response, self.transport.ebcdic())).await?;
        Ok(())
    }

    async fn on_msgdm(&mut self, fpdu: &Fpdu) -> Result<(), PesitError> {
        message::handle_msgdm(fpdu, &mut self.session.message_buffer)?;
        self.session.state = ServerState::MsgReceiving;
        Ok(())
    }

    async fn on_msgmm(&mut self, fpdu: &Fpdu) -> Result<(), PesitError> {
        message::handle_msgmm(fpdu, &mut self.session.message_buffer)?;
        Ok(())
    }

    async fn on_msgfm(&mut self, fpdu: &Fpdu) -> Result<(), PesitError> {
        let (body, response) = message::handle_msgfm(fpdu, &mut self.session.message_buffer, self.session.server_connection_id.0)?;
        log::info!("session {} reassembled message: {} byte(s)", self.session.session_id, body.len());
        self.session.state = ServerState::Cn03Connected;
        self.transport.write_frame(&pesit_msg::encode(&response, self.transport.ebcdic())).await?;
        Ok(())
    }

    async fn send_abort(&mut self, diagnostic: DiagnosticCode) -> Result<(), PesitError> {
        let mut area = ParameterArea::default();
        area.push(Parameter::new(pi::DIAGNOSTIC, diagnostic.to_bytes().to_vec()));
        let abort = Fpdu::with_params(FpduType::ABORT, self.session.peer_connection_id.0, self.session.server_connection_id.0, area);
        self.session.state = ServerState::Error;
        self.transport.write_frame(&pesit_msg::encode(&abort, self.transport.ebcdic())).await
    }

    async fn fail_current_transfer(&mut self, diagnostic: DiagnosticCode) {
        if let Some(id) = self.session.current_transfer_id.take() {
            if diagnostic.is_ok() {
                track("cancel", || self.tracker.cancel(id, "session closed")).await;
            } else {
                track("fail", || self.tracker.fail(id, diagnostic, "session aborted")).await;
            }
        }
        self.session.transfer = None;
    }
}

fn protocol_error() -> PesitError {
    PesitError::DataPlaneViolation { diagnostic: DiagnosticCode::PROTOCOL_ERROR }
}

fn peek_virtual_name(fpdu: &Fpdu) -> String {
    fpdu.params()
        .and_then(|p| p.find_group(pgi::FILE_IDENTIFICATION))
        .and_then(|g| g.find(pi::FILENAME))
        .map(Parameter::as_str)
        .unwrap_or_default()
}

fn peek_restart_point(fpdu: &Fpdu) -> u32 {
    fpdu.params().and_then(|p| p.find(pi::RESTART_POINT)).and_then(Parameter::as_u32).unwrap_or(0)
}

#[allow(clippy::too_many_arguments)]
async fn track_create(
    tracker: &dyn TransferTracker,
    session_id: u64,
    server_id: &str,
    partner_id: &str,
    virtual_name: &str,
    direction: AccessType,
    remote_addr: SocketAddr,
) -> TransferId {
    match tracker.create(session_id, server_id, partner_id, virtual_name, direction, remote_addr).await {
        Ok(id) => id,
        Err(e) => {
            log::warn!("transfer tracker create failed (degraded durability): {e}");
            // A tracker outage must never block a live transfer (§4.7):
            // mint a session-scoped id from the connection id so the rest
            // of the protocol path still has a stable handle to use.
            TransferId::from(session_id as u32)
        }
    }
}
