use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};

#[derive(Parser)]
#[command(
    name = "cvep-app",
    version,
    about = "c-VEP speller: frame-locked visual stimulation with event markers"
)]
pub struct Cli {
    /// Experiment configuration (JSON).
    #[arg(long, short, value_name = "PATH")]
    pub config: PathBuf,

    /// Run headless with markers kept in memory and no recorder.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Override the run number from the configuration.
    #[arg(long, value_name = "N")]
    pub run: Option<u32>,

    /// -v for debug, -vv for per-frame trace, -q for errors only.
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    #[arg(long = "log-format", value_enum, default_value = "pretty")]
    pub log_format: LogFormatArg,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_dry_run_with_verbosity() {
        let cli = Cli::parse_from(["cvep-app", "--config", "exp.json", "--dry-run", "-vv"]);
        assert!(cli.dry_run);
        assert_eq!(cli.config, PathBuf::from("exp.json"));
        assert!(cli.verbosity.is_present());
        assert_eq!(
            cli.verbosity.tracing_level_filter(),
            tracing::level_filters::LevelFilter::TRACE
        );
    }
}
