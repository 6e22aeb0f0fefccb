use std::path::PathBuf;

use cvep_core::ContractError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Contract(#[from] ContractError),

    /// The display backend failed to swap buffers.
    #[error(transparent)]
    Display(#[from] anyhow::Error),

    #[error("failed to load state image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to read font {path}: {source}")]
    FontRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a usable font")]
    InvalidFont { path: PathBuf },

    #[error("invalid pixmap size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("display frame is {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },
}
