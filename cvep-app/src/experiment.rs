use anyhow::{Context, Result};
use cvep_core::{CodeSequence, SymbolId, TrialOutcome};
use cvep_recorder::{ControlChannel, RecorderClient, RecorderState, TcpChannel};
use cvep_render::{Display, LabelFont};
use cvep_speller::{PresentationScheduler, SignalListener, SpellerError};
use cvep_timing::{HighPrecisionTimer, Timer};
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::config::ExperimentConfig;

/// State index used to cue the target key.
const CUE_STATE: u8 = 2;
const TEXT_COLOR: [u8; 4] = [128, 128, 128, 255];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub trials: usize,
    pub completed: usize,
    pub aborted: bool,
}

/// One calibration run: every symbol is the target once, in random order.
///
/// Each trial is a cue (target highlighted), the stimulation with every code
/// running, and an optional inter-trial rest. An abort ends the run early; the
/// closing rest and recorder stop still happen. Once the recorder is started
/// it is stopped again on every exit path, errors included.
pub struct Experiment<D, T, R, C = TcpChannel, RT = HighPrecisionTimer>
where
    D: Display,
    T: Timer<Timestamp = u64>,
    R: Rng,
    C: ControlChannel,
    RT: Timer,
{
    scheduler: PresentationScheduler<D, T>,
    recorder: Option<RecorderClient<C, RT>>,
    config: ExperimentConfig,
    symbols: Vec<SymbolId>,
    stimuli: Vec<(SymbolId, CodeSequence)>,
    rng: R,
    gate: Option<SignalListener>,
    font: Option<LabelFont>,
}

impl<D, T, R, C, RT> Experiment<D, T, R, C, RT>
where
    D: Display,
    T: Timer<Timestamp = u64>,
    R: Rng,
    C: ControlChannel,
    RT: Timer,
{
    pub fn new(
        scheduler: PresentationScheduler<D, T>,
        recorder: Option<RecorderClient<C, RT>>,
        config: ExperimentConfig,
        stimuli: Vec<(SymbolId, CodeSequence)>,
        rng: R,
    ) -> Self {
        let symbols = stimuli.iter().map(|(id, _)| id.clone()).collect();
        Self {
            scheduler,
            recorder,
            config,
            symbols,
            stimuli,
            rng,
            gate: None,
            font: None,
        }
    }

    /// Show the instructions and hold the run until `gate` fires.
    pub fn with_start_gate(mut self, gate: SignalListener) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Font for the instructions and the status line.
    pub fn with_text_font(mut self, font: LabelFont) -> Self {
        self.font = Some(font);
        self
    }

    pub fn scheduler(&self) -> &PresentationScheduler<D, T> {
        &self.scheduler
    }

    pub fn recorder(&self) -> Option<&RecorderClient<C, RT>> {
        self.recorder.as_ref()
    }

    pub fn run(&mut self) -> Result<RunSummary> {
        self.check_trials()
            .context("checking the codes against the layout")?;

        if self.instructions()?.is_aborted() {
            info!("run aborted before it started");
            return Ok(RunSummary {
                trials: self.symbols.len(),
                completed: 0,
                aborted: true,
            });
        }

        self.set_status("Preparing")?;
        if self.scheduler.renderer().has_overlay() {
            self.scheduler.renderer_mut().commit_frame(&[])?;
        }
        if let Err(e) = self.start_recording() {
            self.stop_after_failure();
            return Err(e.context("starting the recorder; is the recorder app running?"));
        }

        match self.run_recorded() {
            Ok(summary) => {
                self.stop_recording()?;
                Ok(summary)
            }
            Err(e) => {
                self.stop_after_failure();
                Err(e)
            }
        }
    }

    fn run_recorded(&mut self) -> Result<RunSummary> {
        self.scheduler.log(format!(
            "version;{}={}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ))?;
        self.scheduler.log(self.config.settings_marker())?;
        self.scheduler.log("start_run")?;
        info!(symbols = self.symbols.len(), "run started");
        self.set_status("Starting")?;
        self.idle()?;
        self.set_status("")?;

        let mut order: Vec<usize> = (0..self.symbols.len()).collect();
        order.shuffle(&mut self.rng);

        let mut summary = RunSummary {
            trials: order.len(),
            completed: 0,
            aborted: false,
        };
        for (i, &target) in order.iter().enumerate() {
            let trial = i + 1;
            let key = self.symbols[target].clone();
            info!(trial, total = summary.trials, target, key = %key, "trial");
            if self.run_trial(trial, target, &key)?.is_aborted() {
                summary.aborted = true;
                break;
            }
            summary.completed += 1;
        }

        self.scheduler.log("stop_run")?;
        info!(completed = summary.completed, aborted = summary.aborted, "run stopping");
        self.set_status("Stopping")?;
        self.idle()?;
        self.set_status("")?;
        Ok(summary)
    }

    /// Plan every trial the run will present, so a layout that cannot show a
    /// code or the cue fails before anything is recorded.
    fn check_trials(&self) -> Result<(), SpellerError> {
        let timing = &self.config.timing;
        self.scheduler
            .plan(self.stimuli.clone(), Some(timing.trial_time))?;
        self.scheduler
            .plan(self.highlights(None), Some(timing.idle_time.max(timing.iti_time)))?;
        for key in &self.symbols {
            self.scheduler
                .plan(self.highlights(Some(key)), Some(timing.cue_time))?;
        }
        Ok(())
    }

    /// Instruction screen, held until the start gate fires. Without a gate the
    /// run starts right away.
    fn instructions(&mut self) -> Result<TrialOutcome> {
        if self.gate.is_none() {
            return Ok(TrialOutcome::Completed);
        }
        let text = self.instruction_text();
        match &self.font {
            Some(font) => {
                let pixmap = font.render(&text, TEXT_COLOR)?;
                self.scheduler
                    .renderer_mut()
                    .set_overlay(Some((pixmap, (0.0, 0.0))));
            }
            None => warn!("no font configured; the instruction screen is blank"),
        }
        let Some(gate) = self.gate.take() else {
            return Ok(TrialOutcome::Completed);
        };

        let renderer = self.scheduler.renderer_mut();
        let visibility = renderer.default_visibility();
        renderer.set_all_default_visible(false);
        info!("waiting for the start key");
        let outcome = self.scheduler.wait_for(&gate);

        let renderer = self.scheduler.renderer_mut();
        renderer.restore_default_visibility(&visibility);
        renderer.set_overlay(None);
        self.gate = Some(gate);
        Ok(outcome?)
    }

    fn instruction_text(&self) -> String {
        let t = &self.config.timing;
        let n = self.symbols.len();
        let minutes = n as f64 * (t.cue_time + t.trial_time + t.iti_time) / 60.0;
        format!(
            "You will see a grid of symbols.\n\
             The target symbol turns green for {cue:.1} s.\n\
             Then all symbols, the target too, flash for {trial:.1} s.\n\
             Keep your eyes on the target while they flash.\n\
             Each of the {n} symbols is the target once, in random order.\n\
             Do not move and blink as little as you can.\n\
             The run takes about {minutes:.1} min.\n\
             \n\
             Press space to start.",
            cue = t.cue_time,
            trial = t.trial_time,
        )
    }

    /// Status line at the top of the screen; empty text removes it. Shown from
    /// the next commit on.
    fn set_status(&mut self, text: &str) -> Result<()> {
        debug!(status = text, "status");
        let Some(font) = &self.font else {
            return Ok(());
        };
        let overlay = if text.is_empty() {
            None
        } else {
            let (_, height) = self.scheduler.renderer().display().size();
            let y = height as f32 / 2.0 - font.size_px();
            Some((font.render(text, TEXT_COLOR)?, (0.0, y)))
        };
        self.scheduler.renderer_mut().set_overlay(overlay);
        Ok(())
    }

    fn run_trial(&mut self, trial: usize, target: usize, key: &SymbolId) -> Result<TrialOutcome> {
        let timing = self.config.timing.clone();

        let cue = self.present(
            self.highlights(Some(key)),
            timing.cue_time,
            format!("start_cue;trial={trial};target={target};key={key}"),
            format!("stop_cue;trial={trial}"),
        )?;
        if cue.is_aborted() {
            return Ok(cue);
        }

        let stimulation = self.present(
            self.stimuli.clone(),
            timing.trial_time,
            format!("start_trial;trial={trial}"),
            format!("stop_trial;trial={trial}"),
        )?;
        if stimulation.is_aborted() || timing.iti_time <= 0.0 {
            return Ok(stimulation);
        }

        self.present(
            self.highlights(None),
            timing.iti_time,
            format!("start_inter_trial;trial={trial}"),
            format!("stop_inter_trial;trial={trial}"),
        )
    }

    /// Every key in its default state for the configured rest time.
    fn idle(&mut self) -> Result<()> {
        let trial = self
            .scheduler
            .plan(self.highlights(None), Some(self.config.timing.idle_time))?;
        if self.scheduler.run(&trial)?.is_aborted() {
            debug!("rest cut short");
        }
        Ok(())
    }

    fn present(
        &mut self,
        codes: Vec<(SymbolId, CodeSequence)>,
        seconds: f64,
        start: String,
        stop: String,
    ) -> Result<TrialOutcome> {
        let trial = self
            .scheduler
            .plan(codes, Some(seconds))?
            .with_start_marker(start)
            .with_stop_marker(stop);
        Ok(self.scheduler.run(&trial)?)
    }

    fn highlights(&self, cue: Option<&SymbolId>) -> Vec<(SymbolId, CodeSequence)> {
        self.symbols
            .iter()
            .map(|id| {
                let state = if Some(id) == cue { CUE_STATE } else { 0 };
                (id.clone(), CodeSequence::constant(state))
            })
            .collect()
    }

    fn start_recording(&mut self) -> Result<()> {
        let Some(recorder) = self.recorder.as_mut() else {
            return Ok(());
        };
        let c = &self.config;
        recorder.configure(
            &c.data_dir.to_string_lossy(),
            &c.subject,
            &c.session,
            c.run,
            &c.task,
        )?;
        recorder.refresh()?;
        recorder.start()?;
        Ok(())
    }

    fn stop_after_failure(&mut self) {
        if let Err(e) = self.stop_recording() {
            warn!(error = %format_args!("{e:#}"), "recorder stop after a failed run failed");
        }
    }

    fn stop_recording(&mut self) -> Result<()> {
        if let Some(recorder) = self.recorder.as_mut() {
            if recorder.state() == RecorderState::Recording {
                recorder.stop()?;
            }
            recorder.close();
        }
        Ok(())
    }
}
