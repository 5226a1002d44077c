//! Server FSM states (§3, §4.6).

/// The server side's state, one per live session. Names follow the PeSIT
/// phase-prefix convention (`CN`=connection, `SF`=selection, `OF`=open,
/// `TDE`=receiving, `TDL`=sending).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    Cn01Repos,
    Cn02bConnectPending,
    Cn03Connected,
    Cn04bReleasePending,

    Sf01bCreatePending,
    Sf02bSelectPending,
    Sf03FileSelected,
    Sf04bDeselectPending,

    Of01bOpenPending,
    Of02TransferReady,
    Of03bClosePending,

    Tde01bWritePending,
    Tde02bReceivingData,
    Tde03bResyncPending,
    Tde07WriteEnd,
    Tde08bTransEndPending,

    Tdl01bReadPending,
    Tdl02bSendingData,
    Tdl07ReadEnd,
    Tdl08bTransEndPending,

    MsgReceiving,

    Error,
}

impl ServerState {
    pub const INITIAL: ServerState = ServerState::Cn01Repos;

    /// Whether a `TransferContext` must exist for a session in this state
    /// (§3 invariant: `TransferContext` exists iff state in this set).
    pub fn requires_transfer_context(self) -> bool {
        matches!(
            self,
            ServerState::Sf03FileSelected
                | ServerState::Of01bOpenPending
                | ServerState::Of02TransferReady
                | ServerState::Of03bClosePending
                | ServerState::Tde01bWritePending
                | ServerState::Tde02bReceivingData
                | ServerState::Tde03bResyncPending
                | ServerState::Tde07WriteEnd
                | ServerState::Tde08bTransEndPending
                | ServerState::Tdl01bReadPending
                | ServerState::Tdl02bSendingData
                | ServerState::Tdl07ReadEnd
                | ServerState::Tdl08bTransEndPending
        )
    }
}
