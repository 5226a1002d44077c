//! Cluster leader signal (§6): C9 consults this before accepting a
//! connection; non-leader instances accept nothing. No other coupling to
//! the clustering layer.

use async_trait::async_trait;

#[async_trait]
pub trait LeaderSignal: Send + Sync {
    async fn am_i_leader(&self) -> bool;
}

/// Single-node reference implementation: always the leader.
#[derive(Debug, Clone, Default)]
pub struct AlwaysLeader;

#[async_trait]
impl LeaderSignal for AlwaysLeader {
    async fn am_i_leader(&self) -> bool {
        true
    }
}
