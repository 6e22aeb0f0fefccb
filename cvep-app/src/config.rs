use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use cvep_marker::StreamInfo;
use cvep_recorder::{AckPolicy, DEFAULT_ADDRESS, DEFAULT_PORT};
use cvep_speller::PresentationConfig;
use serde::{Deserialize, Serialize};

/// Everything one experiment run needs. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub subject: String,
    pub session: String,
    pub run: u32,
    pub task: String,
    /// Recorder output root.
    pub data_dir: PathBuf,
    pub screen: ScreenConfig,
    pub timing: TimingConfig,
    pub recorder: RecorderConfig,
    pub marker: MarkerConfig,
    /// Symbol layout JSON, relative to this file.
    pub layout: PathBuf,
    /// Codebook JSON, relative to this file.
    pub codebook: PathBuf,
    /// Font for generated key labels. Keys without images need it to show a label.
    pub font: Option<PathBuf>,
    pub font_size: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Headless (dry-run) resolution; the window uses the monitor's.
    pub width: u32,
    pub height: u32,
    pub refresh_rate: f64,
    pub fullscreen: bool,
    pub background: [u8; 4],
    /// Blank frames committed at start-up to measure the actual refresh rate.
    pub calibration_frames: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Code bits per second; codes are upsampled to the refresh rate.
    pub presentation_rate: f64,
    pub cue_time: f64,
    pub trial_time: f64,
    pub iti_time: f64,
    /// Rest shown before the first and after the last trial.
    pub idle_time: f64,
    /// Frames between abort checks. 60 checks about once a second at 60 Hz;
    /// 1 checks before every frame.
    pub abort_poll_interval: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
    /// Recorder application to launch before connecting.
    pub app: Option<PathBuf>,
    /// Wait for an `OK` reply per command, with this timeout.
    pub ack_timeout_ms: Option<u64>,
    pub ack_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    pub transport: MarkerTransport,
    /// UDP endpoint receiving one JSON record per marker; `udp` transport only.
    pub target: String,
    pub stream: StreamInfo,
}

/// Where markers go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerTransport {
    /// An LSL outlet, picked up by the recorder like any other stream.
    #[default]
    Lsl,
    /// JSON datagrams to `target`, for a bridge or for debugging.
    Udp,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        let data_dir = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_default()
            .join("Downloads")
            .join("cvep");
        Self {
            subject: "01".into(),
            session: "01".into(),
            run: 1,
            task: "cvep".into(),
            data_dir,
            screen: ScreenConfig::default(),
            timing: TimingConfig::default(),
            recorder: RecorderConfig::default(),
            marker: MarkerConfig::default(),
            layout: PathBuf::from("layout.json"),
            codebook: PathBuf::from("codebook.json"),
            font: None,
            font_size: 32.0,
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            refresh_rate: 60.0,
            fullscreen: true,
            background: [0, 0, 0, 255],
            calibration_frames: 120,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            presentation_rate: 60.0,
            cue_time: 0.8,
            trial_time: 4.2,
            iti_time: 0.5,
            idle_time: 5.0,
            abort_poll_interval: 60,
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: DEFAULT_ADDRESS.into(),
            port: DEFAULT_PORT,
            app: None,
            ack_timeout_ms: None,
            ack_retries: 2,
        }
    }
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            transport: MarkerTransport::default(),
            target: "127.0.0.1:16571".into(),
            stream: StreamInfo::default(),
        }
    }
}

impl ExperimentConfig {
    /// Read and validate a config file. Relative layout, codebook and font paths
    /// are resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        let base = path.parent().unwrap_or(Path::new(""));
        config.layout = base.join(&config.layout);
        config.codebook = base.join(&config.codebook);
        config.font = config.font.map(|f| base.join(f));
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.timing;
        for (name, seconds) in [
            ("cue_time", t.cue_time),
            ("trial_time", t.trial_time),
            ("iti_time", t.iti_time),
            ("idle_time", t.idle_time),
        ] {
            if !seconds.is_finite() || seconds < 0.0 {
                bail!("{name} must be a non-negative number of seconds, got {seconds}");
            }
        }
        if !t.presentation_rate.is_finite() || t.presentation_rate <= 0.0 {
            bail!("presentation_rate must be positive, got {}", t.presentation_rate);
        }
        self.presentation().validate()?;
        if self.upsample_factor() == 0 {
            bail!(
                "refresh rate {} Hz is below the presentation rate {} Hz",
                self.screen.refresh_rate,
                t.presentation_rate
            );
        }
        Ok(())
    }

    /// Display frames per code bit.
    pub fn upsample_factor(&self) -> usize {
        (self.screen.refresh_rate / self.timing.presentation_rate) as usize
    }

    pub fn presentation(&self) -> PresentationConfig {
        PresentationConfig::new(self.screen.refresh_rate)
            .with_abort_poll_interval(self.timing.abort_poll_interval)
    }

    pub fn ack_policy(&self) -> AckPolicy {
        match self.recorder.ack_timeout_ms {
            Some(ms) => AckPolicy::Line {
                timeout: Duration::from_millis(ms),
                retries: self.recorder.ack_retries,
            },
            None => AckPolicy::None,
        }
    }

    /// The `settings;...` marker logged at the start of a run.
    pub fn settings_marker(&self) -> String {
        format!(
            "settings;subject={};session={};run={};screen_fr={};presentation_rate={};\
             cue_time={};trial_time={};iti_time={}",
            self.subject,
            self.session,
            self.run,
            self.screen.refresh_rate,
            self.timing.presentation_rate,
            self.timing.cue_time,
            self.timing.trial_time,
            self.timing.iti_time,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_standard_protocol() {
        let c = ExperimentConfig::default();
        assert_eq!(c.timing.cue_time, 0.8);
        assert_eq!(c.timing.trial_time, 4.2);
        assert_eq!(c.timing.iti_time, 0.5);
        assert_eq!(c.recorder.port, 22345);
        assert_eq!(c.recorder.address, "localhost");
        assert_eq!(c.marker.stream.name, "MarkerStream");
        assert_eq!(c.marker.transport, MarkerTransport::Lsl);
        assert_eq!(c.ack_policy(), AckPolicy::None);
        c.validate().unwrap();
    }

    #[test]
    fn abort_checks_default_to_about_once_a_second() {
        let c = ExperimentConfig::default();
        assert_eq!(c.timing.abort_poll_interval, 60);
        assert_eq!(c.presentation().abort_poll_interval, 60);

        let c: ExperimentConfig =
            serde_json::from_str(r#"{"timing": {"abort_poll_interval": 1}}"#).unwrap();
        assert_eq!(c.presentation().abort_poll_interval, 1);
        assert_eq!(c.timing.cue_time, 0.8);
    }

    #[test]
    fn udp_markers_are_opt_in() {
        let c: ExperimentConfig = serde_json::from_str(
            r#"{"marker": {"transport": "udp", "target": "10.0.0.2:9000"}}"#,
        )
        .unwrap();
        assert_eq!(c.marker.transport, MarkerTransport::Udp);
        assert_eq!(c.marker.target, "10.0.0.2:9000");
        assert_eq!(c.marker.stream, StreamInfo::default());
    }

    #[test]
    fn upsampling_follows_refresh_rate() {
        let mut c = ExperimentConfig::default();
        c.screen.refresh_rate = 240.0;
        assert_eq!(c.upsample_factor(), 4);
        assert_eq!(c.presentation().frame_rate, 240.0);

        c.screen.refresh_rate = 30.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn negative_times_are_rejected() {
        let mut c = ExperimentConfig::default();
        c.timing.iti_time = -0.5;
        assert!(c.validate().is_err());
    }

    #[test]
    fn load_resolves_paths_next_to_the_file() {
        let dir = std::env::temp_dir().join(format!("cvep-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("experiment.json");
        fs::write(
            &path,
            r#"{"subject": "07", "run": 26, "timing": {"trial_time": 2.0},
                "recorder": {"ack_timeout_ms": 250}}"#,
        )
        .unwrap();

        let c = ExperimentConfig::load(&path).unwrap();
        assert_eq!(c.subject, "07");
        assert_eq!(c.run, 26);
        assert_eq!(c.timing.trial_time, 2.0);
        assert_eq!(c.timing.cue_time, 0.8);
        assert_eq!(c.layout, dir.join("layout.json"));
        assert_eq!(
            c.ack_policy(),
            AckPolicy::Line {
                timeout: Duration::from_millis(250),
                retries: 2
            }
        );
        fs::remove_dir_all(&dir).unwrap();
    }
}
