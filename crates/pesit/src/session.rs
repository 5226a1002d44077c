//! Per-connection session state (§3).

use std::net::SocketAddr;

use pesit_types::{ConnectionId, TransferId};

use crate::state::ServerState;
use crate::transfer::TransferContext;

/// One per live connection; owned exclusively by that session's task.
pub struct SessionContext {
    pub session_id: u64,
    pub remote_addr: SocketAddr,

    /// This server's own connection id, chosen at CONNECT time.
    pub server_connection_id: ConnectionId,
    /// The peer's connection id, echoed from the CONNECT `id_src`.
    pub peer_connection_id: ConnectionId,

    pub requester_name: String,
    pub server_name: String,

    pub negotiated_version: u8,
    pub access_type: AccessType,

    pub sync_points_enabled: bool,
    pub sync_interval_bytes: u64,
    pub sync_window: u16,
    pub resync_enabled: bool,
    pub crc_enabled: bool,
    pub ebcdic: bool,
    pub max_entity_size: u32,

    pub state: ServerState,
    pub transfer: Option<TransferContext>,
    pub current_transfer_id: Option<TransferId>,

    /// MSGDM/MSGMM/MSGFM reassembly buffer (§4.8).
    pub message_buffer: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Read,
    Write,
}

impl AccessType {
    pub fn from_pi22(value: u8) -> Option<Self> {
        match value {
            0 => Some(AccessType::Read),
            1 => Some(AccessType::Write),
            _ => None,
        }
    }

    pub fn to_pi22(self) -> u8 {
        match self {
            AccessType::Read => 0,
            AccessType::Write => 1,
        }
    }
}

impl SessionContext {
    pub fn new(session_id: u64, remote_addr: SocketAddr) -> Self {
        Self {
            session_id,
            remote_addr,
            server_connection_id: ConnectionId::from(0),
            peer_connection_id: ConnectionId::from(0),
            requester_name: String::new(),
            server_name: String::new(),
            negotiated_version: 0,
            access_type: AccessType::Read,
            sync_points_enabled: false,
            sync_interval_bytes: 0,
            sync_window: 0,
            resync_enabled: false,
            crc_enabled: false,
            ebcdic: false,
            max_entity_size: 0,
            state: ServerState::INITIAL,
            transfer: None,
            current_transfer_id: None,
            message_buffer: Vec::new(),
        }
    }
}
