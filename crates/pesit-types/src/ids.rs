//! Small newtypes shared between the codec and the engine, so a `u8` meant
//! as a connection id is never silently passed where a record length or an
//! article count was expected.

use std::fmt;

macro_rules! id_newtype {
    ($name:ident, $repr:ty) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub $repr);

        impl From<$repr> for $name {
            fn from(value: $repr) -> Self {
                $name(value)
            }
        }

        impl From<$name> for $repr {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// Connection identifier (`id_dst`/`id_src` outside of DTF framing). PeSIT
/// Hors-SIT caps this at 255 simultaneous connection ids per session; the
/// 24-bit extension is an explicit Non-goal.
id_newtype!(ConnectionId, u8);

/// A transfer identifier (PI_13), scoped to a session.
id_newtype!(TransferId, u32);

/// A strictly-monotonic sync-point number (PI_20).
id_newtype!(SyncPointNumber, u32);
