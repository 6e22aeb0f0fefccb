use thiserror::Error;

use crate::SymbolId;

/// Precondition violations. Raised before anything is drawn or sent and never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractError {
    #[error("symbol '{symbol}' is already registered")]
    DuplicateSymbol { symbol: SymbolId },

    #[error("symbol '{symbol}' is not registered")]
    UnknownSymbol { symbol: SymbolId },

    #[error("symbol '{symbol}' needs at least one state asset")]
    NoStates { symbol: SymbolId },

    #[error("state {state} is out of range for symbol '{symbol}' with {states} states")]
    StateOutOfRange {
        symbol: SymbolId,
        state: u8,
        states: usize,
    },

    #[error("symbol '{symbol}' has more than one code sequence")]
    DuplicateCode { symbol: SymbolId },

    #[error("code sequence is empty")]
    EmptyCodeSequence,

    #[error("no code sequences given and no duration to derive a frame count from")]
    EmptyCodeBook,

    #[error("invalid duration {seconds} s")]
    InvalidDuration { seconds: f64 },

    #[error("invalid frame rate {hz} Hz")]
    InvalidFrameRate { hz: f64 },
}
