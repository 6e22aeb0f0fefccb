pub mod assets;
pub mod display;
pub mod error;
pub mod render;

pub use assets::{LabelFont, StateStyle};
pub use display::{Display, HeadlessDisplay};
pub use error::RenderError;
pub use render::{FrameStats, StimulusRenderer};
