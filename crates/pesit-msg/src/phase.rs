//! FPDU phase/type classification (§3).
//!
//! Every FPDU is classified by a `(phase, type)` byte pair. [`FpduType`] is
//! the closed enumeration the rest of the engine dispatches on; [`Phase`] is
//! the coarser grouping the wire header carries separately so a peer can
//! reject an FPDU whose phase makes no sense in the current state without
//! even looking at the type byte.

use std::fmt;

/// Coarse protocol phase, carried as the header's `phase` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Phase {
    Connection = 1,
    Selection = 2,
    Open = 3,
    Data = 4,
    Message = 5,
    Termination = 6,
}

impl Phase {
    pub fn from_u8(value: u8) -> Option<Phase> {
        Some(match value {
            1 => Phase::Connection,
            2 => Phase::Selection,
            3 => Phase::Open,
            4 => Phase::Data,
            5 => Phase::Message,
            6 => Phase::Termination,
            _ => return None,
        })
    }
}

macro_rules! fpdu_types {
    ($($name:ident = ($phase:ident, $type_code:literal), )+) => {
        /// Closed enumeration of every FPDU type this profile exchanges.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum FpduType {
            $($name,)+
        }

        impl FpduType {
            pub fn phase(&self) -> Phase {
                match self {
                    $(FpduType::$name => Phase::$phase,)+
                }
            }

            pub fn type_code(&self) -> u8 {
                match self {
                    $(FpduType::$name => $type_code,)+
                }
            }

            /// Looks up the `FpduType` for a `(phase, type)` wire pair.
            pub fn from_phase_type(phase: Phase, type_code: u8) -> Option<FpduType> {
                match (phase, type_code) {
                    $(
                        (Phase::$phase, $type_code) => Some(FpduType::$name),
                    )+
                    _ => None,
                }
            }
        }

        impl fmt::Display for FpduType {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(FpduType::$name => write!(f, stringify!($name)),)+
                }
            }
        }
    };
}

fpdu_types! {
    CONNECT = (Connection, 1),
    ACONNECT = (Connection, 2),
    RCONNECT = (Connection, 3),
    RELEASE = (Connection, 4),
    RELCONF = (Connection, 5),
    ABORT = (Connection, 6),

    CREATE = (Selection, 1),
    ACK_CREATE = (Selection, 2),
    SELECT = (Selection, 3),
    ACK_SELECT = (Selection, 4),
    DESELECT = (Selection, 5),
    ACK_DESELECT = (Selection, 6),

    OPEN = (Open, 1),
    ACK_OPEN = (Open, 2),
    CLOSE = (Open, 3),
    ACK_CLOSE = (Open, 4),

    WRITE = (Data, 1),
    ACK_WRITE = (Data, 2),
    READ = (Data, 3),
    ACK_READ = (Data, 4),
    DTF = (Data, 5),
    DTFDA = (Data, 6),
    DTFMA = (Data, 7),
    DTFFA = (Data, 8),
    DTF_END = (Data, 9),
    SYN = (Data, 10),
    ACK_SYN = (Data, 11),
    IDT = (Data, 12),
    ACK_IDT = (Data, 13),

    MSG = (Message, 1),
    ACK_MSG = (Message, 2),
    MSGDM = (Message, 3),
    MSGMM = (Message, 4),
    MSGFM = (Message, 5),

    TRANS_END = (Termination, 1),
    ACK_TRANS_END = (Termination, 2),
}

impl FpduType {
    /// Whether this type's payload is raw DTF data (one or more articles)
    /// rather than a parameter area.
    pub fn is_dtf_variant(&self) -> bool {
        matches!(
            self,
            FpduType::DTF | FpduType::DTFDA | FpduType::DTFMA | FpduType::DTFFA
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_type_round_trips_through_phase_and_code() {
        let all = [
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
        for t in all {
            assert_eq!(FpduType::from_phase_type(t.phase(), t.type_code()), Some(t));
        }
    }

    #[test]
    fn unknown_pair_is_none() {
        assert!(FpduType::from_phase_type(Phase::Connection, 99).is_none());
    }
}
