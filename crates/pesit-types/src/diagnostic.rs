//! Diagnostic codes (PI_02): the 3-byte values peers exchange in RCONNECT/ABORT
//! to explain a rejection.
//!
//! Reference: the distilled PeSIT Hors-SIT spec, §4.9.

use std::fmt;

/// A mandatory diagnostic code, conventionally formatted as `Dx-yzz`.
///
/// On the wire a diagnostic is 3 bytes: the family byte (`x`) followed by a
/// 2-byte big-endian subcode (`yzz` as a decimal-looking but binary value).
/// We keep family and subcode as plain fields rather than reverse-engineering
/// a single integer encoding, since the wire and the display string do not
/// share a base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagnosticCode {
    pub family: u8,
    pub subcode: u16,
}

macro_rules! diagnostics {
    ($($name:ident = ($family:literal, $subcode:literal), )+) => {
        impl DiagnosticCode {
            $(
                pub const $name: DiagnosticCode = DiagnosticCode { family: $family, subcode: $subcode };
            )+

            /// Best-effort name for a code, for log messages. Unknown codes
            /// just print their numeric form.
            pub fn name(&self) -> Option<&'static str> {
                match (self.family, self.subcode) {
                    $(
                        ($family, $subcode) => Some(stringify!($name)),
                    )+
                    _ => None,
                }
            }
        }
    };
}

diagnostics! {
    OK = (0, 0),
    INVALID_PARTNER = (0, 301),
    INVALID_PASSWORD = (0, 302),
    INVALID_SERVER_NAME = (0, 303),
    VERSION_MISMATCH_RCONNECT = (0, 308),
    FILE_NOT_FOUND = (2, 205),
    ACCESS_DENIED = (2, 211),
    WRITE_ERROR = (2, 213),
    NO_SPACE = (2, 219),
    ARTICLE_LENGTH_VIOLATION = (2, 220),
    INVALID_DATA_WITHOUT_SYNC = (2, 222),
    ACCESS_OR_ACL_MISMATCH = (2, 226),
    FILE_SELECTION_ERROR = (3, 301),
    ACCESS_REFUSED = (3, 304),
    VERSION_UNSUPPORTED = (3, 308),
    PROTOCOL_ERROR = (3, 311),
}

impl DiagnosticCode {
    /// Decodes the 3-byte PI_02 wire representation.
    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        DiagnosticCode {
            family: bytes[0],
            subcode: u16::from_be_bytes([bytes[1], bytes[2]]),
        }
    }

    /// Encodes to the 3-byte PI_02 wire representation.
    pub fn to_bytes(self) -> [u8; 3] {
        let sub = self.subcode.to_be_bytes();
        [self.family, sub[0], sub[1]]
    }

    pub fn is_ok(&self) -> bool {
        *self == DiagnosticCode::OK
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "D{}-{:03} ({name})", self.family, self.subcode),
            None => write!(f, "D{}-{:03}", self.family, self.subcode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_wire_bytes() {
        for code in [
            DiagnosticCode::OK,
            DiagnosticCode::ACCESS_OR_ACL_MISMATCH,
            DiagnosticCode::PROTOCOL_ERROR,
        ] {
            assert_eq!(DiagnosticCode::from_bytes(code.to_bytes()), code);
        }
    }

    #[test]
    fn displays_known_name() {
        assert_eq!(
            DiagnosticCode::PROTOCOL_ERROR.to_string(),
            "D3-311 (PROTOCOL_ERROR)"
        );
    }

    #[test]
    fn displays_unknown_numerically() {
        let unknown = DiagnosticCode { family: 9, subcode: 999 };
        assert_eq!(unknown.to_string(), "D9-999");
    }
}
