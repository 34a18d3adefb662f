pub mod errors;
pub mod id;
pub mod protocol;
pub mod types;

pub use errors::{ChorusError, ConfigError, ProtocolError};
pub use id::{new_id, validate_id, IdKind, SessionId};
pub use protocol::{close_codes, ClientFrame, ClientOp, ServerMessage};
pub use types::{ChatRecord, MediaFlags, Participant, PublicIdentity, StatusPatch};
