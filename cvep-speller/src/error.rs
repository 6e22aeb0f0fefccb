use cvep_core::ContractError;
use cvep_marker::MarkerError;
use cvep_render::RenderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpellerError {
    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Marker(#[from] MarkerError),
}
