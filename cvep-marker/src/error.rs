use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarkerError {
    #[error("could not resolve marker target {target}")]
    Resolve { target: String },

    #[error("marker socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode marker record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("marker outlet is busy")]
    Busy,

    #[error("LSL error: {0}")]
    Lsl(String),
}

impl MarkerError {
    #[cfg(feature = "lsl")]
    pub(crate) fn lsl(e: lsl::Error) -> Self {
        Self::Lsl(format!("{e:?}"))
    }
}
