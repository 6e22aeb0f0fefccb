use cvep_core::{
    CodeSequence, Marker, MarkerTiming, PresentationState, SymbolId, TrialOutcome,
};
use cvep_marker::MarkerEmitter;
use cvep_render::{Display, StimulusRenderer};
use cvep_timing::{HighPrecisionTimer, Timer};
use tracing::{debug, info, warn};

use crate::{AbortListener, PresentationConfig, SignalListener, SpellerError, Trial};

/// Drives the renderer frame by frame through a trial.
///
/// The loop is single-threaded: every frame is one `commit_frame`, which blocks
/// on the display swap. Abort requests are sampled every
/// `abort_poll_interval` frames, before the frame is drawn.
pub struct PresentationScheduler<D: Display, T: Timer<Timestamp = u64> = HighPrecisionTimer> {
    renderer: StimulusRenderer<D, T>,
    emitter: MarkerEmitter<T>,
    abort: AbortListener,
    config: PresentationConfig,
    state: PresentationState,
}

impl<D: Display, T: Timer<Timestamp = u64>> PresentationScheduler<D, T> {
    pub fn new(
        renderer: StimulusRenderer<D, T>,
        emitter: MarkerEmitter<T>,
        abort: AbortListener,
        config: PresentationConfig,
    ) -> Result<Self, SpellerError> {
        config.validate()?;
        info!(
            frame_rate = config.frame_rate,
            abort_poll_interval = config.abort_poll_interval,
            symbols = renderer.registry().len(),
            "presentation scheduler ready"
        );
        Ok(Self {
            renderer,
            emitter,
            abort,
            config,
            state: PresentationState::Idle,
        })
    }

    pub fn state(&self) -> PresentationState {
        self.state
    }

    pub fn config(&self) -> &PresentationConfig {
        &self.config
    }

    pub fn renderer(&self) -> &StimulusRenderer<D, T> {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut StimulusRenderer<D, T> {
        &mut self.renderer
    }

    pub fn emitter(&self) -> &MarkerEmitter<T> {
        &self.emitter
    }

    pub fn abort_listener(&self) -> &AbortListener {
        &self.abort
    }

    /// Push a marker right away.
    pub fn log(&self, text: impl Into<String>) -> Result<(), SpellerError> {
        Ok(self.emitter.log(text)?)
    }

    pub fn set_default_visible(&mut self, name: &SymbolId, visible: bool) -> Result<(), SpellerError> {
        Ok(self.renderer.set_default_visible(name, visible)?)
    }

    /// Validate `codes` against the registered symbols and build a trial.
    pub fn plan(
        &self,
        codes: Vec<(SymbolId, CodeSequence)>,
        duration: Option<f64>,
    ) -> Result<Trial, SpellerError> {
        Ok(Trial::plan(
            self.renderer.registry(),
            codes,
            duration,
            self.config.frame_rate,
        )?)
    }

    /// Plan and run a trial in one call.
    pub fn present<S>(
        &mut self,
        codes: impl IntoIterator<Item = (S, Vec<u8>)>,
        duration: Option<f64>,
        start: Option<Marker>,
        stop: Option<Marker>,
    ) -> Result<TrialOutcome, SpellerError>
    where
        S: Into<SymbolId>,
    {
        let codes = codes
            .into_iter()
            .map(|(id, states)| CodeSequence::new(states).map(|code| (id.into(), code)))
            .collect::<Result<Vec<(SymbolId, CodeSequence)>, _>>()?;
        let mut trial = self.plan(codes, duration)?;
        if let Some(start) = start {
            trial = trial.with_start_marker(start);
        }
        if let Some(stop) = stop {
            trial = trial.with_stop_marker(stop);
        }
        self.run(&trial)
    }

    /// Present `trial`. Returns `Completed` (status 0) or `Aborted` (status 1).
    ///
    /// Default-visible symbols are hidden for the trial and restored afterwards
    /// with one extra commit, whatever the outcome. The start marker lands on the
    /// first commit; the stop marker is pushed right after the last one and is
    /// dropped on abort.
    pub fn run(&mut self, trial: &Trial) -> Result<TrialOutcome, SpellerError> {
        trial.check(self.renderer.registry())?;

        let visibility = self.renderer.default_visibility();
        self.renderer.set_all_default_visible(false);
        self.state = PresentationState::Presenting;
        info!(frames = trial.frames(), "trial started");

        if let Some(start) = trial.start_marker() {
            let marker = start.clone().with_timing(MarkerTiming::OnNextCommit);
            self.emitter.emit(marker, &mut self.renderer)?;
        }

        let outcome = match self.present_frames(trial) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.renderer.discard_pending_hooks();
                self.renderer.restore_default_visibility(&visibility);
                self.state = PresentationState::Idle;
                return Err(e);
            }
        };

        match outcome {
            TrialOutcome::Completed => {
                if let Some(stop) = trial.stop_marker() {
                    self.emit_stop(stop.clone(), trial.frames() == 0);
                }
            }
            TrialOutcome::Aborted => {
                let dropped = self.renderer.discard_pending_hooks();
                if dropped > 0 {
                    debug!(dropped, "pending markers discarded on abort");
                }
            }
        }

        self.renderer.restore_default_visibility(&visibility);
        if let Err(e) = self.renderer.commit_frame(&[]) {
            self.renderer.discard_pending_hooks();
            self.state = PresentationState::Idle;
            return Err(e.into());
        }
        self.state = outcome.into();
        info!(status = outcome.status(), "trial finished");
        Ok(outcome)
    }

    /// Keep committing the current scene until `proceed` fires. Requests
    /// raised before the call are dropped. Abort wins when both are pending.
    pub fn wait_for(&mut self, proceed: &SignalListener) -> Result<TrialOutcome, SpellerError> {
        let stale = proceed.clear();
        if stale > 0 {
            debug!(stale, "stale proceed requests dropped");
        }
        self.state = PresentationState::Presenting;
        let outcome = loop {
            if self.abort.poll() {
                break TrialOutcome::Aborted;
            }
            if proceed.poll() {
                break TrialOutcome::Completed;
            }
            if let Err(e) = self.renderer.commit_frame(&[]) {
                self.state = PresentationState::Idle;
                return Err(e.into());
            }
        };
        self.state = outcome.into();
        info!(status = outcome.status(), "wait finished");
        Ok(outcome)
    }

    fn present_frames(&mut self, trial: &Trial) -> Result<TrialOutcome, SpellerError> {
        let interval = self.config.poll_interval();
        let mut selections = Vec::new();
        for frame in 0..trial.frames() {
            if frame % interval == 0 && self.abort.poll() {
                info!(frame, "trial aborted");
                return Ok(TrialOutcome::Aborted);
            }
            trial.selections(frame, &mut selections);
            self.renderer.commit_frame(&selections)?;
        }
        Ok(TrialOutcome::Completed)
    }

    /// With no presentation frame the stop marker rides on the restorative
    /// commit, after the start marker queued for that same commit.
    fn emit_stop(&mut self, stop: Marker, no_frames: bool) {
        let result = if no_frames {
            self.emitter
                .emit(stop.with_timing(MarkerTiming::OnNextCommit), &mut self.renderer)
        } else {
            self.emitter.push_now(stop)
        };
        if let Err(e) = result {
            warn!(error = %e, "stop marker push failed");
        }
    }
}
