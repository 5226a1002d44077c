//! Server FSM dispatch (§4.6): a total, synchronous, non-I/O function from
//! `(ServerState, FpduType)` to an [`Action`]. All I/O (storage, tracker,
//! the wire itself) happens in the session task that drives this table —
//! `on_fpdu` only says what is admitted and which state the happy path
//! lands in; the session task overrides the target state when a handler in
//! `negotiation`/`lifecycle`/`transfer_engine` reports rejection (§9:
//! "State machine as a tagged variant").
//!
//! The `*Pending` states in [`crate::state::ServerState`] mark the instant
//! between receiving a request and emitting its acknowledgement. This
//! engine handles that pair synchronously within one call, so `on_fpdu`
//! never targets a `*Pending` state as output — they are accepted as
//! *input* (for totality) but fall through to the same admission rules as
//! the stable state they precede.

use pesit_msg::FpduType;
use pesit_types::DiagnosticCode;

use crate::state::ServerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// A response FPDU is expected; the session continues.
    Reply,
    /// A response FPDU is expected; the session then closes the socket.
    ReplyAndClose,
    /// No response is sent for this FPDU type.
    NoReply,
    /// Reject with this diagnostic; the caller sends ABORT and closes.
    Abort(DiagnosticCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next_state: ServerState,
    pub action: Action,
}

fn t(next_state: ServerState, action: Action) -> Transition {
    Transition { next_state, action }
}

fn protocol_error(state: ServerState) -> Transition {
    t(state, Action::Abort(DiagnosticCode::PROTOCOL_ERROR))
}

/// Total dispatch table (§4.6, §8 property 2). Every `(state, type)` pair
/// not explicitly admitted falls through to `ABORT(D3-311)` and the
/// `Error` state, as required.
pub fn on_fpdu(state: ServerState, fpdu_type: FpduType) -> Transition {
    use FpduType::*;
    use ServerState::*;

    // ABORT is admitted in every state (§4.3) and always returns to the
    // idle connected-less state; any in-flight transfer is the caller's
    // responsibility to cancel via the tracker.
    if fpdu_type == ABORT {
        return t(Cn01Repos, Action::NoReply);
    }

    match (state, fpdu_type) {
        (Cn01Repos | Cn02bConnectPending, CONNECT) => t(Cn03Connected, Action::Reply),

        (Cn03Connected, CREATE) => t(Sf03FileSelected, Action::Reply),
        (Cn03Connected, SELECT) => t(Sf03FileSelected, Action::Reply),
        (Cn03Connected, RELEASE) => t(Cn01Repos, Action::ReplyAndClose),
        (Cn03Connected, MSG) => t(Cn03Connected, Action::Reply),
        (Cn03Connected, MSGDM) => t(MsgReceiving, Action::NoReply),
        (Cn04bReleasePending, RELEASE) => t(Cn01Repos, Action::ReplyAndClose),

        (MsgReceiving, MSGMM) => t(MsgReceiving, Action::NoReply),
        (MsgReceiving, MSGFM) => t(Cn03Connected, Action::Reply),

        (Sf03FileSelected | Sf01bCreatePending | Sf02bSelectPending, OPEN) => t(Of02TransferReady, Action::Reply),
        (Sf03FileSelected | Sf04bDeselectPending, DESELECT) => t(Cn03Connected, Action::Reply),

        (Of02TransferReady | Of01bOpenPending, WRITE) => t(Tde02bReceivingData, Action::Reply),
        (Of02TransferReady | Of01bOpenPending, READ) => t(Tdl02bSendingData, Action::Reply),
        (Of02TransferReady | Of03bClosePending, CLOSE) => t(Sf03FileSelected, Action::Reply),

        (Tde01bWritePending | Tde02bReceivingData, DTF | DTFDA | DTFMA | DTFFA) => t(Tde02bReceivingData, Action::NoReply),
        (Tde02bReceivingData | Tde03bResyncPending, SYN) => t(Tde02bReceivingData, Action::Reply),
        (Tde02bReceivingData, IDT) => t(Of02TransferReady, Action::Reply),
        (Tde02bReceivingData, DTF_END) => t(Tde07WriteEnd, Action::NoReply),
        (Tde07WriteEnd | Tde08bTransEndPending, TRANS_END) => t(Of02TransferReady, Action::Reply),

        (Tdl01bReadPending | Tdl02bSendingData, ACK_SYN) => t(Tdl02bSendingData, Action::NoReply),
        (Tdl02bSendingData, IDT) => t(Of02TransferReady, Action::Reply),
        (Tdl07ReadEnd | Tdl08bTransEndPending, TRANS_END) => t(Of02TransferReady, Action::Reply),

        (Error, _) => protocol_error(Error),
        (_, _) => protocol_error(Error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [ServerState; 22] = [
        ServerState::Cn01Repos,
        ServerState::Cn02bConnectPending,
        ServerState::Cn03Connected,
        ServerState::Cn04bReleasePending,
        ServerState::Sf01bCreatePending,
        ServerState::Sf02bSelectPending,
        ServerState::Sf03FileSelected,
        ServerState::Sf04bDeselectPending,
        ServerState::Of01bOpenPending,
        ServerState::Of02TransferReady,
        ServerState::Of03bClosePending,
        ServerState::Tde01bWritePending,
        ServerState::Tde02bReceivingData,
        ServerState::Tde03bResyncPending,
        ServerState::Tde07WriteEnd,
        ServerState::Tde08bTransEndPending,
        ServerState::Tdl01bReadPending,
        ServerState::Tdl02bSendingData,
        ServerState::Tdl07ReadEnd,
        ServerState::Tdl08bTransEndPending,
        ServerState::MsgReceiving,
        ServerState::Error,
    ];

    const ALL_TYPES: [FpduType; 36] = [
        FpduType::CONNECT,
        FpduType::ACONNECT,
        FpduType::RCONNECT,
        FpduType::RELEASE,
        FpduType::RELCONF,
        FpduType::ABORT,
        FpduType::CREATE,
        FpduType::ACK_CREATE,
        FpduType::SELECT,
        FpduType::ACK_SELECT,
        FpduType::DESELECT,
        FpduType::ACK_DESELECT,
        FpduType::OPEN,
        FpduType::ACK_OPEN,
        FpduType::CLOSE,
        FpduType::ACK_CLOSE,
        FpduType::WRITE,
        FpduType::ACK_WRITE,
        FpduType::READ,
        FpduType::ACK_READ,
        FpduType::DTF,
        FpduType::DTFDA,
        FpduType::DTFMA,
        FpduType::DTFFA,
        FpduType::DTF_END,
        FpduType::SYN,
        FpduType::ACK_SYN,
        FpduType::IDT,
        FpduType::ACK_IDT,
        FpduType::MSG,
        FpduType::ACK_MSG,
        FpduType::MSGDM,
        FpduType::MSGMM,
        FpduType::MSGFM,
        FpduType::TRANS_END,
        FpduType::ACK_TRANS_END,
    ];

    /// §8 property 2: `on_fpdu` must be total and never panic for any
    /// `(state, type)` pair.
    #[test]
    fn dispatch_is_total() {
        for state in ALL_STATES {
            for fpdu_type in ALL_TYPES {
                let _ = on_fpdu(state, fpdu_type);
            }
        }
    }

    #[test]
    fn abort_is_admitted_in_every_state() {
        for state in ALL_STATES {
            let transition = on_fpdu(state, FpduType::ABORT);
            assert_eq!(transition.next_state, ServerState::Cn01Repos);
            assert_eq!(transition.action, Action::NoReply);
        }
    }

    #[test]
    fn unsupported_combination_aborts_with_protocol_error() {
        let transition = on_fpdu(ServerState::Cn01Repos, FpduType::DTF);
        assert_eq!(transition.action, Action::Abort(DiagnosticCode::PROTOCOL_ERROR));
        assert_eq!(transition.next_state, ServerState::Error);
    }

    #[test]
    fn connect_moves_idle_session_to_connected() {
        let transition = on_fpdu(ServerState::Cn01Repos, FpduType::CONNECT);
        assert_eq!(transition.next_state, ServerState::Cn03Connected);
        assert_eq!(transition.action, Action::Reply);
    }

    #[test]
    fn create_then_open_then_write_reaches_receiving_data() {
        let s1 = on_fpdu(ServerState::Cn03Connected, FpduType::CREATE).next_state;
        let s2 = on_fpdu(s1, FpduType::OPEN).next_state;
        let s3 = on_fpdu(s2, FpduType::WRITE).next_state;
        assert_eq!(s3, ServerState::Tde02bReceivingData);
    }

    #[test]
    fn dtf_end_then_trans_end_returns_to_transfer_ready() {
        let s1 = on_fpdu(ServerState::Tde02bReceivingData, FpduType::DTF_END).next_state;
        assert_eq!(s1, ServerState::Tde07WriteEnd);
        let s2 = on_fpdu(s1, FpduType::TRANS_END).next_state;
        assert_eq!(s2, ServerState::Of02TransferReady);
    }
}
