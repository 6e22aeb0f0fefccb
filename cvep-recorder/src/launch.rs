use std::path::Path;
use std::process::{Child, Command};
use std::time::Duration;

use cvep_timing::Timer;
use tracing::info;

use crate::RecorderError;

/// Time given to the recorder application to open its control port.
pub const LAUNCH_SETTLE: Duration = Duration::from_secs(2);

/// Start the recorder application at `path` and wait for it to come up.
///
/// On macOS an `.app` bundle is opened through `open`; elsewhere the
/// executable is spawned directly.
pub fn launch_recorder_app(path: &Path, timer: &impl Timer) -> Result<Child, RecorderError> {
    let mut command = if cfg!(target_os = "macos") {
        let mut c = Command::new("open");
        c.arg(path);
        c
    } else {
        Command::new(path)
    };
    let child = command.spawn().map_err(|source| RecorderError::Launch {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), pid = child.id(), "recorder app launched");
    timer.sleep(LAUNCH_SETTLE);
    Ok(child)
}

#[cfg(test)]
mod tests {
    use cvep_timing::ManualTimer;

    use super::*;

    #[test]
    fn missing_app_is_a_launch_error() {
        let timer = ManualTimer::new();
        let path = Path::new("/nonexistent/recorder-app");
        if cfg!(target_os = "macos") {
            return;
        }
        assert!(matches!(
            launch_recorder_app(path, &timer),
            Err(RecorderError::Launch { .. })
        ));
        assert!(timer.sleeps().is_empty());
    }
}
