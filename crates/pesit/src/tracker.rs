//! Transfer tracker (§4.7, §8): the durable transfer record, and the
//! default in-memory reference implementation.
//!
//! Every call on this trait from the protocol path goes through
//! [`track`], which logs and swallows failures rather than letting a
//! degraded-durability backend abort a live transfer (§4.7, §7).

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::RwLock;

use async_trait::async_trait;
use time::OffsetDateTime;

use pesit_types::{DiagnosticCode, TransferId};

use crate::session::AccessType;
use crate::transfer::{TransferRecord, TransferStatus};

#[async_trait]
pub trait TransferTracker: Send + Sync {
    async fn create(
        &self,
        session_id: u64,
        server_id: &str,
        partner_id: &str,
        filename: &str,
        direction: AccessType,
        remote_addr: SocketAddr,
    ) -> Result<TransferId, String>;

    async fn start(&self, transfer_id: TransferId, size: Option<u64>, local_path: &str) -> Result<(), String>;
    async fn progress(&self, transfer_id: TransferId, bytes: u64) -> Result<(), String>;
    async fn record_sync(&self, transfer_id: TransferId, bytes_at_sync: u64, sync_point: u32) -> Result<(), String>;
    async fn complete(&self, transfer_id: TransferId, checksum: Option<String>) -> Result<(), String>;
    async fn fail(&self, transfer_id: TransferId, code: DiagnosticCode, message: &str) -> Result<(), String>;
    async fn interrupt(&self, transfer_id: TransferId, reason: &str) -> Result<(), String>;
    async fn cancel(&self, transfer_id: TransferId, reason: &str) -> Result<(), String>;
    async fn retry(&self, transfer_id: TransferId) -> Result<TransferId, String>;
    async fn mark_interrupted_for_node(&self, node_id: &str) -> Result<(), String>;
    async fn get(&self, transfer_id: TransferId) -> Option<TransferRecord>;

    /// Finds the most recent interrupted-or-retry-pending record for this
    /// partner+filename, the resume point a SELECT restart binds to (§4.5.2,
    /// §8 invariant 3).
    async fn find_resumable(&self, partner_id: &str, filename: &str) -> Option<TransferRecord>;
}

/// Calls a tracker operation, logging and swallowing any failure (§4.7:
/// "Exceptions in the tracker never propagate into the protocol path").
pub async fn track<F, Fut>(op_name: &str, op: F)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    if let Err(e) = op().await {
        log::warn!("transfer tracker call '{op_name}' failed (degraded durability): {e}");
    }
}

#[derive(Default)]
struct Inner {
    records: HashMap<TransferId, TransferRecord>,
    next_id: u32,
}

/// Default, test- and single-node-friendly tracker: an `RwLock`-guarded
/// map, never serializing session progress beyond the lock's critical
/// section (§5: "must not serialize session progress").
#[derive(Default)]
pub struct InMemoryTransferTracker {
    inner: RwLock<Inner>,
}

impl InMemoryTransferTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransferTracker for InMemoryTransferTracker {
    async fn create(
        &self,
        session_id: u64,
        _server_id: &str,
        partner_id: &str,
        filename: &str,
        direction: AccessType,
        _remote_addr: SocketAddr,
    ) -> Result<TransferId, String> {
        let mut inner = self.inner.write().map_err(|e| e.to_string())?;
        inner.next_id += 1;
        let id = TransferId::from(inner.next_id);
        let now = now();
        inner.records.insert(
            id,
            TransferRecord {
                id,
                session_id,
                partner_id: partner_id.to_string(),
                direction,
                filename: filename.to_string(),
                size: None,
                bytes_transferred: 0,
                status: TransferStatus::Initiated,
                last_sync_point: 0,
                last_sync_point_offset: 0,
                checksum: None,
                error_code: None,
                retry_count: 0,
                parent_transfer_id: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn start(&self, transfer_id: TransferId, size: Option<u64>, _local_path: &str) -> Result<(), String> {
        self.with_record(transfer_id, |r| {
            r.size = size;
            r.status = TransferStatus::InProgress;
        })
    }

    async fn progress(&self, transfer_id: TransferId, bytes: u64) -> Result<(), String> {
        self.with_record(transfer_id, |r| {
            r.bytes_transferred = bytes;
        })
    }

    async fn record_sync(&self, transfer_id: TransferId, bytes_at_sync: u64, sync_point: u32) -> Result<(), String> {
        self.with_record(transfer_id, |r| {
            r.bytes_transferred = bytes_at_sync;
            r.last_sync_point = sync_point;
            r.last_sync_point_offset = bytes_at_sync;
        })
    }

    async fn complete(&self, transfer_id: TransferId, checksum: Option<String>) -> Result<(), String> {
        self.with_record(transfer_id, |r| {
            r.status = TransferStatus::Completed;
            r.checksum = checksum;
        })
    }

    async fn fail(&self, transfer_id: TransferId, code: DiagnosticCode, _message: &str) -> Result<(), String> {
        self.with_record(transfer_id, |r| {
            r.status = TransferStatus::Failed;
            r.error_code = Some(code);
        })
    }

    async fn interrupt(&self, transfer_id: TransferId, _reason: &str) -> Result<(), String> {
        self.with_record(transfer_id, |r| {
            r.status = TransferStatus::Interrupted;
        })
    }

    async fn cancel(&self, transfer_id: TransferId, _reason: &str) -> Result<(), String> {
        self.with_record(transfer_id, |r| {
            r.status = TransferStatus::Cancelled;
        })
    }

    async fn retry(&self, transfer_id: TransferId) -> Result<TransferId, String> {
        const MAX_RETRIES: u32 = 3;
        let mut inner = self.inner.write().map_err(|e| e.to_string())?;
        let parent = inner.records.get(&transfer_id).ok_or("no such transfer")?.clone();
        if parent.retry_count >= MAX_RETRIES {
            return Err(format!("transfer {transfer_id} exceeded max retry count"));
        }
        inner.next_id += 1;
        let id = TransferId::from(inner.next_id);
        let now = now();
        let mut child = parent.clone();
        child.id = id;
        child.status = TransferStatus::RetryPending;
        child.retry_count = parent.retry_count + 1;
        child.parent_transfer_id = Some(transfer_id);
        child.created_at = now;
        child.updated_at = now;
        inner.records.insert(id, child);
        Ok(id)
    }

    async fn mark_interrupted_for_node(&self, _node_id: &str) -> Result<(), String> {
        let mut inner = self.inner.write().map_err(|e| e.to_string())?;
        for record in inner.records.values_mut() {
            if record.status == TransferStatus::InProgress {
                record.status = TransferStatus::Interrupted;
            }
        }
        Ok(())
    }

    async fn get(&self, transfer_id: TransferId) -> Option<TransferRecord> {
        self.inner.read().ok()?.records.get(&transfer_id).cloned()
    }

    async fn find_resumable(&self, partner_id: &str, filename: &str) -> Option<TransferRecord> {
        self.inner
            .read()
            .ok()?
            .records
            .values()
            .filter(|r| r.partner_id == partner_id && r.filename == filename)
            .filter(|r| matches!(r.status, TransferStatus::Interrupted | TransferStatus::RetryPending))
            .max_by_key(|r| r.id)
            .cloned()
    }
}

impl InMemoryTransferTracker {
    fn with_record(&self, id: TransferId, f: impl FnOnce(&mut TransferRecord)) -> Result<(), String> {
        let mut inner = self.inner.write().map_err(|e| e.to_string())?;
        let record = inner.records.get_mut(&id).ok_or("no such transfer")?;
        f(record);
        record.updated_at = now();
        Ok(())
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_start_progress_complete_round_trip() {
        let tracker = InMemoryTransferTracker::new();
        let id = tracker
            .create(1, "SRV", "BANKA", "FILE.TXT", AccessType::Write, "127.0.0.1:1763".parse().unwrap())
            .await
            .unwrap();
        tracker.start(id, Some(100), "/recv/FILE.TXT").await.unwrap();
        tracker.progress(id, 50).await.unwrap();
        tracker.record_sync(id, 50, 1).await.unwrap();
        tracker.complete(id, Some("deadbeef".to_string())).await.unwrap();

        let record = tracker.get(id).await.unwrap();
        assert_eq!(record.status, TransferStatus::Completed);
        assert_eq!(record.last_sync_point, 1);
        assert_eq!(record.bytes_transferred, 50);
        assert_eq!(record.checksum.as_deref(), Some("deadbeef"));
    }

    #[tokio::test]
    async fn retry_chains_via_parent_pointer_and_caps_at_max() {
        let tracker = InMemoryTransferTracker::new();
        let id = tracker
            .create(1, "SRV", "BANKA", "FILE.TXT", AccessType::Read, "127.0.0.1:1763".parse().unwrap())
            .await
            .unwrap();
        tracker.interrupt(id, "timeout").await.unwrap();

        let r1 = tracker.retry(id).await.unwrap();
        let r2 = tracker.retry(r1).await.unwrap();
        let r3 = tracker.retry(r2).await.unwrap();
        assert!(tracker.retry(r3).await.is_err());

        let record = tracker.get(r3).await.unwrap();
        assert_eq!(record.parent_transfer_id, Some(r2));
        assert_eq!(record.retry_count, 3);
    }

    #[tokio::test]
    async fn find_resumable_picks_latest_interrupted_record_for_partner_and_file() {
        let tracker = InMemoryTransferTracker::new();
        let id = tracker
            .create(1, "SRV", "BANKA", "FILE.TXT", AccessType::Read, "127.0.0.1:1763".parse().unwrap())
            .await
            .unwrap();
        tracker.start(id, Some(1024), "/recv/FILE.TXT").await.unwrap();
        tracker.record_sync(id, 512, 1).await.unwrap();
        tracker.interrupt(id, "timeout").await.unwrap();

        let resumable = tracker.find_resumable("BANKA", "FILE.TXT").await.unwrap();
        assert_eq!(resumable.id, id);
        assert_eq!(resumable.last_sync_point_offset, 512);

        assert!(tracker.find_resumable("OTHER", "FILE.TXT").await.is_none());

        tracker.complete(id, None).await.unwrap();
        assert!(tracker.find_resumable("BANKA", "FILE.TXT").await.is_none());
    }

    #[tokio::test]
    async fn mark_interrupted_for_node_flips_in_progress_only() {
        let tracker = InMemoryTransferTracker::new();
        let id = tracker
            .create(1, "SRV", "BANKA", "FILE.TXT", AccessType::Write, "127.0.0.1:1763".parse().unwrap())
            .await
            .unwrap();
        tracker.start(id, None, "/recv/FILE.TXT").await.unwrap();
        tracker.mark_interrupted_for_node("node-1").await.unwrap();
        assert_eq!(tracker.get(id).await.unwrap().status, TransferStatus::Interrupted);
    }
}
