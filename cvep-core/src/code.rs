use serde::{Deserialize, Serialize};

use crate::ContractError;

/// Per-frame state indices for one symbol, repeated with wraparound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct CodeSequence(Vec<u8>);

impl CodeSequence {
    pub fn new(states: Vec<u8>) -> Result<Self, ContractError> {
        if states.is_empty() {
            return Err(ContractError::EmptyCodeSequence);
        }
        Ok(Self(states))
    }

    /// A single-element sequence: the symbol holds `state` for the whole trial.
    pub fn constant(state: u8) -> Self {
        Self(vec![state])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// State shown at `frame`, i.e. `seq[frame mod len]`.
    pub fn state_at(&self, frame: u64) -> u8 {
        self.0[(frame % self.0.len() as u64) as usize]
    }

    pub fn max_state(&self) -> u8 {
        self.0.iter().copied().max().unwrap_or(0)
    }

    /// Repeat every element `factor` times, e.g. to bring a 60 bit/s code to a 240 Hz display.
    pub fn upsample(&self, factor: usize) -> Self {
        let factor = factor.max(1);
        Self(
            self.0
                .iter()
                .flat_map(|&s| std::iter::repeat_n(s, factor))
                .collect(),
        )
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<Vec<u8>> for CodeSequence {
    type Error = ContractError;

    fn try_from(states: Vec<u8>) -> Result<Self, Self::Error> {
        Self::new(states)
    }
}

impl From<CodeSequence> for Vec<u8> {
    fn from(code: CodeSequence) -> Self {
        code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sequence_is_rejected() {
        assert_eq!(
            CodeSequence::new(Vec::new()),
            Err(ContractError::EmptyCodeSequence)
        );
    }

    #[test]
    fn state_at_wraps_around() {
        let code = CodeSequence::new(vec![1, 0, 0]).unwrap();
        let states: Vec<u8> = (0..7).map(|i| code.state_at(i)).collect();
        assert_eq!(states, vec![1, 0, 0, 1, 0, 0, 1]);
    }

    #[test]
    fn upsample_repeats_each_bit() {
        let code = CodeSequence::new(vec![0, 1, 2]).unwrap();
        assert_eq!(code.upsample(2).as_slice(), &[0, 0, 1, 1, 2, 2]);
        assert_eq!(code.upsample(0), code);
    }

    #[test]
    fn max_state_reports_largest_index() {
        let code = CodeSequence::new(vec![0, 2, 1]).unwrap();
        assert_eq!(code.max_state(), 2);
    }

    #[test]
    fn deserialize_rejects_empty_list() {
        assert!(serde_json::from_str::<CodeSequence>("[]").is_err());
        let code: CodeSequence = serde_json::from_str("[0, 1, 1]").unwrap();
        assert_eq!(code.len(), 3);
    }
}
