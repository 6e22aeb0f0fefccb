/// When a marker leaves the emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerTiming {
    /// Pushed at call time.
    Immediate,
    /// Pushed by the next display commit, stamped with that commit's time.
    OnNextCommit,
}

/// A string event marker. Transient: handed to the emitter and not retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    payload: String,
    timing: MarkerTiming,
}

impl Marker {
    pub fn immediate(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            timing: MarkerTiming::Immediate,
        }
    }

    pub fn on_next_commit(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            timing: MarkerTiming::OnNextCommit,
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn timing(&self) -> MarkerTiming {
        self.timing
    }

    pub fn with_timing(mut self, timing: MarkerTiming) -> Self {
        self.timing = timing;
        self
    }

    /// The single-element record pushed onto the stream.
    pub fn into_sample(self) -> Vec<String> {
        vec![self.payload]
    }
}

impl From<&str> for Marker {
    fn from(payload: &str) -> Self {
        Marker::immediate(payload)
    }
}

impl From<String> for Marker {
    fn from(payload: String) -> Self {
        Marker::immediate(payload)
    }
}
