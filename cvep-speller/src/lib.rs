pub mod config;
pub mod error;
pub mod scheduler;
pub mod signal;
pub mod trial;

pub use config::PresentationConfig;
pub use error::SpellerError;
pub use scheduler::PresentationScheduler;
pub use signal::{
    AbortHandle, AbortListener, SignalHandle, SignalListener, abort_channel, signal_channel,
};
pub use trial::Trial;
