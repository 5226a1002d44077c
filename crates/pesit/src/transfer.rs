//! Per-file transfer state (§3): the live `TransferContext` a session owns
//! while a file is open, and the durable `TransferRecord` C8 persists.

use std::path::PathBuf;

use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use pesit_types::{SyncPointNumber, TransferId};

use crate::session::AccessType;
use crate::storage::{ReadableStream, WritableStream};

/// One per file currently selected/open within a session. Exclusively owns
/// the open stream; dropped (and the stream closed) at DESELECT or session
/// end (§9 "Ownership of streams").
pub struct TransferContext {
    pub transfer_id: TransferId,
    pub virtual_file: String,
    pub physical_path: PathBuf,
    pub direction: AccessType,

    pub record_length: u32,
    pub max_entity_size: u32,
    pub file_size_reservation_kb: Option<u32>,

    pub bytes_transferred: u64,
    pub records_transferred: u64,
    pub current_sync_point: u32,
    pub bytes_since_last_sync: u64,
    pub restart_point: u32,
    pub restart_requested: bool,
    /// Byte offset to open the file at, resolved at SELECT time from the
    /// prior interrupted `TransferRecord`'s `last_sync_point_offset` (§4.5.2,
    /// §8 invariant 3). Zero for a transfer with no restart requested.
    pub resume_offset: u64,

    pub writer: Option<Box<dyn WritableStream>>,
    pub reader: Option<Box<dyn ReadableStream>>,

    /// Running hash of every byte streamed through this transfer so far,
    /// fed incrementally (§9: "avoid in-memory buffering of the whole
    /// file" — hashing needs no buffer, only the running state). Finalized
    /// at TRANS_END into the optional checksum `TransferTracker::complete`
    /// accepts (§4.7, §8 invariant 7: "verified by content hash").
    hasher: Sha256,
}

impl TransferContext {
    pub fn new_write(
        transfer_id: TransferId,
        virtual_file: String,
        physical_path: PathBuf,
        record_length: u32,
        max_entity_size: u32,
        file_size_reservation_kb: Option<u32>,
        restart_point: u32,
    ) -> Self {
        Self {
            transfer_id,
            virtual_file,
            physical_path,
            direction: AccessType::Write,
            record_length,
            max_entity_size,
            file_size_reservation_kb,
            bytes_transferred: 0,
            records_transferred: 0,
            current_sync_point: 0,
            bytes_since_last_sync: 0,
            restart_point,
            restart_requested: restart_point > 0,
            resume_offset: 0,
            writer: None,
            reader: None,
            hasher: Sha256::new(),
        }
    }

    pub fn new_read(
        transfer_id: TransferId,
        virtual_file: String,
        physical_path: PathBuf,
        record_length: u32,
        max_entity_size: u32,
        restart_point: u32,
    ) -> Self {
        Self {
            transfer_id,
            virtual_file,
            physical_path,
            direction: AccessType::Read,
            record_length,
            max_entity_size,
            file_size_reservation_kb: None,
            bytes_transferred: 0,
            records_transferred: 0,
            current_sync_point: 0,
            bytes_since_last_sync: 0,
            restart_point,
            restart_requested: restart_point > 0,
            resume_offset: 0,
            writer: None,
            reader: None,
            hasher: Sha256::new(),
        }
    }

    pub fn next_sync_point(&mut self) -> SyncPointNumber {
        self.current_sync_point += 1;
        SyncPointNumber::from(self.current_sync_point)
    }

    /// Feeds `data` into the running content hash. Called once per article
    /// as it is streamed to (or from) disk, so the digest never requires
    /// holding the whole file in memory.
    pub fn hash_update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Finalizes a clone of the running hash into a lowercase hex digest,
    /// without consuming the live hasher (a transfer may still be checked
    /// again later, e.g. after a sync-point, before it actually completes).
    pub fn checksum_hex(&self) -> String {
        let digest = self.hasher.clone().finalize();
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Initiated,
    InProgress,
    Paused,
    Interrupted,
    RetryPending,
    Completed,
    Failed,
    Cancelled,
}

/// The durable record C8 owns (§3, §4.7). `bytes_transferred`/`last_sync_point`
/// reflect only what has been *acknowledged*; an in-flight, unacknowledged
/// SYN never advances these fields.
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub id: TransferId,
    pub session_id: u64,
    pub partner_id: String,
    pub direction: AccessType,
    pub filename: String,
    pub size: Option<u64>,
    pub bytes_transferred: u64,
    pub status: TransferStatus,
    pub last_sync_point: u32,
    pub last_sync_point_offset: u64,
    pub checksum: Option<String>,
    pub error_code: Option<pesit_types::DiagnosticCode>,
    pub retry_count: u32,
    pub parent_transfer_id: Option<TransferId>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}
