mod cli;
mod config;
mod experiment;
mod layout;
mod logging;
mod window;

use std::io::{self, IsTerminal};

use anyhow::{Context, Result};
use clap::Parser;
use cvep_marker::{MarkerEmitter, MarkerOutlet, MemoryOutlet, UdpMarkerOutlet};
use cvep_recorder::{RecorderClient, launch_recorder_app};
use cvep_render::{Display, HeadlessDisplay, LabelFont, StimulusRenderer};
use cvep_speller::{
    AbortListener, PresentationScheduler, SignalListener, abort_channel, signal_channel,
};
use cvep_timing::HighPrecisionTimer;
use tracing::{error, info, warn};

use crate::cli::{Cli, LogFormatArg};
use crate::config::{ExperimentConfig, MarkerTransport};
use crate::experiment::{Experiment, RunSummary};
use crate::layout::{Codebook, Layout};
use crate::logging::{LogConfig, LogFormat, init_logging};
use crate::window::WinitDisplay;

fn main() {
    let cli = Cli::parse();
    init_logging(&log_config_from_cli(&cli));

    let code = match run(&cli) {
        Ok(summary) if summary.aborted => 1,
        Ok(_) => 0,
        Err(e) => {
            error!("{e:#}");
            2
        }
    };
    std::process::exit(code);
}

fn log_config_from_cli(cli: &Cli) -> LogConfig {
    LogConfig {
        level_filter: cli.verbosity.tracing_level_filter(),
        use_env_filter: !cli.verbosity.is_present(),
        with_ansi: io::stderr().is_terminal(),
        format: match cli.log_format {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        },
        ..LogConfig::default()
    }
}

fn run(cli: &Cli) -> Result<RunSummary> {
    let mut config = ExperimentConfig::load(&cli.config)?;
    if let Some(run) = cli.run {
        config.run = run;
    }
    let layout = Layout::load(&config.layout)?;
    let codebook = Codebook::load(&config.codebook)?;
    info!(
        platform = std::env::consts::OS,
        arch = std::env::consts::ARCH,
        subject = %config.subject,
        session = %config.session,
        run = config.run,
        dry_run = cli.dry_run,
        "cvep starting"
    );

    let (abort, listener) = abort_channel();
    let timer = HighPrecisionTimer::new();

    if cli.dry_run {
        let display = HeadlessDisplay::new(config.screen.width, config.screen.height);
        let outlet = MemoryOutlet::new();
        let log = outlet.log();
        let session = Session {
            display,
            timer,
            outlet: Box::new(outlet),
            recorder: None,
            abort: listener,
            gate: None,
        };
        let summary = session.run(&config, &layout, &codebook)?;
        info!(markers = log.len(), "dry run finished");
        for marker in log.payloads() {
            println!("{marker}");
        }
        return Ok(summary);
    }

    if let Some(app) = &config.recorder.app {
        // The child keeps running on its own; we only talk to it over TCP.
        launch_recorder_app(app, &timer)?;
    }
    let (proceed, gate) = signal_channel();
    let display = WinitDisplay::open(&config.screen, abort, proceed)?;
    if let Some(hz) = display.monitor_refresh_rate() {
        if (hz - config.screen.refresh_rate).abs() > 1.0 {
            warn!(
                monitor = hz,
                configured = config.screen.refresh_rate,
                "monitor refresh rate differs from the configured rate"
            );
        }
    }
    let recorder = if config.recorder.enabled {
        let client = RecorderClient::connect(&config.recorder.address, config.recorder.port)
            .context("is the recorder app running?")?
            .with_ack_policy(config.ack_policy());
        Some(client)
    } else {
        None
    };
    let outlet = open_outlet(&config, &timer)?;
    let session = Session {
        display,
        timer,
        outlet,
        recorder,
        abort: listener,
        gate: Some(gate),
    };
    session.run(&config, &layout, &codebook)
}

fn open_outlet(
    config: &ExperimentConfig,
    timer: &HighPrecisionTimer,
) -> Result<Box<dyn MarkerOutlet>> {
    let stream = config.marker.stream.clone();
    match config.marker.transport {
        MarkerTransport::Udp => {
            let outlet = UdpMarkerOutlet::connect(&config.marker.target, stream)?;
            Ok(Box::new(outlet))
        }
        #[cfg(feature = "lsl")]
        MarkerTransport::Lsl => {
            use cvep_timing::Timer;
            let outlet = cvep_marker::LslMarkerOutlet::open(stream, timer.now())?;
            Ok(Box::new(outlet))
        }
        #[cfg(not(feature = "lsl"))]
        MarkerTransport::Lsl => {
            let _ = timer;
            anyhow::bail!("built without LSL support; set marker.transport to \"udp\"")
        }
    }
}

/// Everything a run needs besides its configuration.
struct Session<D: Display> {
    display: D,
    timer: HighPrecisionTimer,
    outlet: Box<dyn MarkerOutlet>,
    recorder: Option<RecorderClient>,
    abort: AbortListener,
    gate: Option<SignalListener>,
}

impl<D: Display> Session<D> {
    fn run(
        self,
        config: &ExperimentConfig,
        layout: &Layout,
        codebook: &Codebook,
    ) -> Result<RunSummary> {
        let mut renderer = StimulusRenderer::with_timer(self.display, self.timer.clone())?;
        renderer.set_background(config.screen.background);

        let font = config
            .font
            .as_ref()
            .map(|path| LabelFont::from_file(path, config.font_size))
            .transpose()?;
        let symbols = layout.register(&mut renderer, font.as_ref())?;
        let stimuli = codebook.assign(&symbols, config.upsample_factor())?;

        if config.screen.calibration_frames > 0 {
            if let Some(hz) = renderer.measure_frame_rate(config.screen.calibration_frames)? {
                let stats = renderer.calibration_stats();
                info!(
                    measured = %format_args!("{hz:.2}"),
                    jitter_ms = %format_args!("{:.3}", stats.jitter_ns / 1e6),
                    "frame rate measured"
                );
                if (hz - config.screen.refresh_rate).abs() > 1.0 {
                    warn!(
                        measured = hz,
                        configured = config.screen.refresh_rate,
                        "measured frame rate differs from the configured rate"
                    );
                }
            }
        }

        let emitter = MarkerEmitter::new(self.outlet, self.timer);
        let scheduler =
            PresentationScheduler::new(renderer, emitter, self.abort, config.presentation())?;
        let mut experiment =
            Experiment::new(scheduler, self.recorder, config.clone(), stimuli, rand::rng());
        if let Some(gate) = self.gate {
            experiment = experiment.with_start_gate(gate);
        }
        if let Some(font) = font {
            experiment = experiment.with_text_font(font);
        }
        experiment.run()
    }
}
