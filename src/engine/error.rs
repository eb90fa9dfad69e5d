use crate::model::{RestrictionId, RoomId};

#[derive(Debug)]
pub enum EngineError {
    /// Caller broke the input contract (bad range, unknown room, malformed snapshot).
    Validation(String),
    NotFound(RestrictionId),
    /// Store call failed or timed out. Retryable.
    StorageUnavailable(String),
    /// Room already occupied for the requested nights.
    Conflict(RoomId),
    /// Block map changed since the snapshot was rendered.
    StaleSnapshot { room_id: RoomId },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StorageUnavailable(_) | EngineError::WalError(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::NotFound(id) => write!(f, "restriction not found: {id}"),
            EngineError::StorageUnavailable(e) => write!(f, "storage unavailable: {e}"),
            EngineError::Conflict(room_id) => {
                write!(f, "room {room_id} is not available for the requested dates")
            }
            EngineError::StaleSnapshot { room_id } => {
                write!(f, "calendar for room {room_id} changed since it was rendered")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::WalError(e.to_string())
    }
}
