use mb_perf_session::SessionId;

#[derive(thiserror::Error, Debug)]
pub enum PerfError {
    #[error("No performance session with id {0}")]
    UnknownSession(SessionId),

    #[error("Failed to serialize session: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T, E = PerfError> = std::result::Result<T, E>;
