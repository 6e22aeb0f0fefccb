use cvep_core::ContractError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentationConfig {
    /// Display refresh rate in Hz; one code element per refresh.
    pub frame_rate: f64,
    /// Check the abort channel every this many frames. 1 checks every frame.
    pub abort_poll_interval: u64,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            frame_rate: 60.0,
            abort_poll_interval: 1,
        }
    }
}

impl PresentationConfig {
    pub fn new(frame_rate: f64) -> Self {
        Self {
            frame_rate,
            ..Self::default()
        }
    }

    pub fn with_abort_poll_interval(mut self, frames: u64) -> Self {
        self.abort_poll_interval = frames;
        self
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(ContractError::InvalidFrameRate {
                hz: self.frame_rate,
            });
        }
        Ok(())
    }

    pub(crate) fn poll_interval(&self) -> u64 {
        self.abort_poll_interval.max(1)
    }
}
