pub mod emitter;
pub mod error;
#[cfg(feature = "lsl")]
pub mod lsl_outlet;
pub mod outlet;

pub use emitter::MarkerEmitter;
pub use error::MarkerError;
#[cfg(feature = "lsl")]
pub use lsl_outlet::LslMarkerOutlet;
pub use outlet::{MarkerLog, MarkerOutlet, MarkerRecord, MemoryOutlet, PushedMarker, StreamInfo, UdpMarkerOutlet};
