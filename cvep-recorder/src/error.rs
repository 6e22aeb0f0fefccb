use std::path::PathBuf;

use thiserror::Error;

use crate::RecorderState;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("cannot reach recorder at {address}:{port}: {source}")]
    Connect {
        address: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send '{command}' to recorder: {source}")]
    Write {
        command: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read recorder reply to '{command}': {source}")]
    Read {
        command: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("recorder connection is closed")]
    NotConnected,

    #[error("'{command}' is not allowed while the recorder is {state:?}")]
    InvalidTransition {
        command: &'static str,
        state: RecorderState,
    },

    #[error("recorder rejected '{command}': {reply}")]
    Rejected { command: &'static str, reply: String },

    #[error("no acknowledgement for '{command}' after {attempts} attempts")]
    NoAcknowledgement { command: &'static str, attempts: u32 },

    #[error("failed to launch recorder app {path}: {source}")]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
