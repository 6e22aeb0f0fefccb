pub mod code;
pub mod commit;
pub mod error;
pub mod marker;
pub mod symbol;
pub mod trial;

pub use code::CodeSequence;
pub use commit::{CommitHook, CommitStamp, OnCommit};
pub use error::ContractError;
pub use marker::{Marker, MarkerTiming};
pub use symbol::{Placement, SymbolEntry, SymbolHandle, SymbolId, SymbolRegistry};
pub use trial::{PresentationState, TrialOutcome};
