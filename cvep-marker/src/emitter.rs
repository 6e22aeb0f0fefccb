use std::cell::RefCell;
use std::rc::Rc;

use cvep_core::{CommitStamp, Marker, MarkerTiming, OnCommit};
use cvep_timing::{HighPrecisionTimer, Timer};
use tracing::{debug, warn};

use crate::{MarkerError, MarkerOutlet};

/// Pushes markers now or on the next display commit.
///
/// `clock` must share its epoch with the renderer's timer (clone it from the
/// renderer) so immediate and commit-bound timestamps are comparable.
pub struct MarkerEmitter<T: Timer<Timestamp = u64> = HighPrecisionTimer> {
    outlet: Rc<RefCell<dyn MarkerOutlet>>,
    clock: T,
}

impl<T: Timer<Timestamp = u64>> MarkerEmitter<T> {
    pub fn new(outlet: impl MarkerOutlet + 'static, clock: T) -> Self {
        let info = outlet.info();
        debug!(stream = %info.name, source_id = %info.source_id, "marker emitter created");
        Self {
            outlet: Rc::new(RefCell::new(outlet)),
            clock,
        }
    }

    /// Emit according to the marker's timing. Commit-bound markers are queued on
    /// `commits` and pushed, stamped with the commit time, right after its next swap.
    pub fn emit(&self, marker: Marker, commits: &mut impl OnCommit) -> Result<(), MarkerError> {
        match marker.timing() {
            MarkerTiming::Immediate => self.push_now(marker),
            MarkerTiming::OnNextCommit => {
                let outlet = Rc::clone(&self.outlet);
                let sample = marker.into_sample();
                commits.call_on_commit(Box::new(move |stamp: &CommitStamp| {
                    let pushed = outlet
                        .try_borrow_mut()
                        .map_err(|_| MarkerError::Busy)
                        .and_then(|mut o| o.push_sample(&sample, stamp.timestamp_ns));
                    match pushed {
                        Ok(()) => debug!(marker = %sample[0], frame = stamp.frame, "marker pushed on commit"),
                        // Never fail a frame over a marker.
                        Err(e) => warn!(marker = %sample[0], error = %e, "marker push failed"),
                    }
                }));
                Ok(())
            }
        }
    }

    /// Push regardless of the marker's timing mode.
    pub fn push_now(&self, marker: Marker) -> Result<(), MarkerError> {
        let sample = marker.into_sample();
        let timestamp_ns = self.clock.now();
        self.outlet
            .try_borrow_mut()
            .map_err(|_| MarkerError::Busy)?
            .push_sample(&sample, timestamp_ns)?;
        debug!(marker = %sample[0], "marker pushed");
        Ok(())
    }

    pub fn log(&self, text: impl Into<String>) -> Result<(), MarkerError> {
        self.push_now(Marker::immediate(text))
    }
}
