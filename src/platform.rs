//! The seam between the portable logic of this crate and the operating system.

#[cfg(unix)]
use std::{
    ffi::OsStr,
    io::Read,
    process::{Command, Stdio},
    thread::{self, JoinHandle},
    time::Duration,
};

#[cfg(unix)]
use tracing::warn;
#[cfg(unix)]
use wait_timeout::ChildExt;

use crate::{DisplayMode, MonitorHandle, MonitorSnapshot, Orientation, Point, PowerState, Scale};

/// The error type for platform calls.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The platform or the monitor does not support the operation.
    #[error("`{operation}` is not supported on this platform or monitor.")]
    Unsupported { operation: &'static str },
    /// An external command could not be run or reported a failure.
    #[error("`{program}` failed: {reason}")]
    Command { program: String, reason: String },
    /// The output of a platform call could not be understood.
    #[error("Failed to parse platform output: {0}")]
    Parse(String),
    /// The platform does not know the addressed monitor.
    #[error("The platform does not know the monitor `{0}`.")]
    NotFound(String),
    #[cfg(target_os = "windows")]
    #[error(transparent)]
    Windows(#[from] windows::core::Error),
    #[cfg(target_os = "macos")]
    #[error("`CGError` has occurred: {0:?}")]
    CoreGraphics(objc2_core_graphics::CGError),
}

impl PlatformError {
    pub fn unsupported(operation: &'static str) -> Self {
        Self::Unsupported { operation }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

/// Where one monitor goes when a layout is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutTarget {
    pub handle: MonitorHandle,
    pub position: Point,
    pub primary: bool,
}

/// Access to the displays of one operating system.
///
/// Implementations only translate between OS calls and the types of this crate.
/// They are never called from two threads at once: [`DisplayManager`] serializes
/// every call behind a single lock.
///
/// Operations a backend cannot perform return [`PlatformError::Unsupported`],
/// which is what the provided defaults do.
///
/// [`DisplayManager`]: crate::DisplayManager
#[cfg_attr(test, mockall::automock)]
pub trait PlatformDisplayApi: Send {
    /// Enumerates every monitor attached to the desktop in one pass.
    fn enumerate(&self) -> Result<Vec<MonitorSnapshot>, PlatformError>;

    fn enumerate_handles(&self) -> Result<Vec<MonitorHandle>, PlatformError> {
        Ok(self
            .enumerate()?
            .into_iter()
            .map(|monitor| monitor.handle)
            .collect())
    }

    /// Applies the positions of every monitor together.
    ///
    /// The default applies the targets one by one, primary first, and stops at the
    /// first failure. Backends with a transactional API override it so that either
    /// every move applies or none does.
    fn apply_layout(&self, layout: &[LayoutTarget]) -> Result<(), PlatformError> {
        for target in layout.iter().filter(|target| target.primary) {
            self.set_primary(&target.handle)?;
        }
        for target in layout {
            self.set_position(&target.handle, target.position)?;
        }
        Ok(())
    }

    fn set_position(&self, handle: &MonitorHandle, position: Point) -> Result<(), PlatformError>;

    fn set_primary(&self, handle: &MonitorHandle) -> Result<(), PlatformError>;

    fn current_mode(&self, _handle: &MonitorHandle) -> Result<DisplayMode, PlatformError> {
        Err(PlatformError::unsupported("current_mode"))
    }

    fn default_mode(&self, _handle: &MonitorHandle) -> Result<DisplayMode, PlatformError> {
        Err(PlatformError::unsupported("default_mode"))
    }

    fn all_modes(&self, _handle: &MonitorHandle) -> Result<Vec<DisplayMode>, PlatformError> {
        Err(PlatformError::unsupported("all_modes"))
    }

    fn set_mode(&self, _handle: &MonitorHandle, _mode: &DisplayMode) -> Result<(), PlatformError> {
        Err(PlatformError::unsupported("set_mode"))
    }

    fn set_scale(&self, _handle: &MonitorHandle, _scale: Scale) -> Result<(), PlatformError> {
        Err(PlatformError::unsupported("set_scale"))
    }

    fn set_orientation(
        &self,
        _handle: &MonitorHandle,
        _orientation: Orientation,
    ) -> Result<(), PlatformError> {
        Err(PlatformError::unsupported("set_orientation"))
    }

    /// Brightness in percent (0-100).
    fn brightness(&self, _handle: &MonitorHandle) -> Result<u32, PlatformError> {
        Err(PlatformError::unsupported("brightness"))
    }

    fn set_brightness(&self, _handle: &MonitorHandle, _percent: u32) -> Result<(), PlatformError> {
        Err(PlatformError::unsupported("set_brightness"))
    }

    /// Contrast in percent (0-100).
    fn contrast(&self, _handle: &MonitorHandle) -> Result<u32, PlatformError> {
        Err(PlatformError::unsupported("contrast"))
    }

    fn set_contrast(&self, _handle: &MonitorHandle, _percent: u32) -> Result<(), PlatformError> {
        Err(PlatformError::unsupported("set_contrast"))
    }

    fn power_on(&self, _handle: &MonitorHandle) -> Result<(), PlatformError> {
        Err(PlatformError::unsupported("power_on"))
    }

    fn power_off(&self, _handle: &MonitorHandle) -> Result<(), PlatformError> {
        Err(PlatformError::unsupported("power_off"))
    }

    fn suspend(&self, _handle: &MonitorHandle) -> Result<(), PlatformError> {
        Err(PlatformError::unsupported("suspend"))
    }

    fn power_state(&self, _handle: &MonitorHandle) -> Result<PowerState, PlatformError> {
        Err(PlatformError::unsupported("power_state"))
    }

    fn attach(&self, _handle: &MonitorHandle) -> Result<(), PlatformError> {
        Err(PlatformError::unsupported("attach"))
    }

    /// Removes the monitor from the desktop. With `permanent` the change survives
    /// a restart of the session where the platform allows it.
    fn detach(&self, _handle: &MonitorHandle, _permanent: bool) -> Result<(), PlatformError> {
        Err(PlatformError::unsupported("detach"))
    }

    fn is_attached(&self, _handle: &MonitorHandle) -> Result<bool, PlatformError> {
        Err(PlatformError::unsupported("is_attached"))
    }

    fn mouse_position(&self) -> Result<Point, PlatformError>;
}

/// How long an external program may run before it is killed.
#[cfg(unix)]
pub(crate) const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs an external program and returns its standard output.
#[cfg(unix)]
pub(crate) fn run<I, S>(program: &str, args: I) -> Result<String, PlatformError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    run_with_timeout(program, args, COMMAND_TIMEOUT)
}

/// Like [`run`], but kills the program once `timeout` has passed.
#[cfg(unix)]
pub(crate) fn run_with_timeout<I, S>(
    program: &str,
    args: I,
    timeout: Duration,
) -> Result<String, PlatformError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let failed = |reason: String| PlatformError::Command {
        program: program.to_owned(),
        reason,
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| failed(err.to_string()))?;

    // Pipes are drained while waiting, or a long output would stall the program.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            if let Err(err) = child.kill().and_then(|()| child.wait().map(drop)) {
                warn!(%err, program, "failed to kill timed out program");
            }
            return Err(failed(format!("did not finish within {timeout:?}")));
        }
        Err(err) => return Err(failed(err.to_string())),
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();

    if !status.success() {
        let stderr = String::from_utf8_lossy(&stderr);
        return Err(failed(stderr.trim().to_owned()));
    }

    Ok(String::from_utf8_lossy(&stdout).into_owned())
}

#[cfg(unix)]
fn drain(pipe: Option<impl Read + Send + 'static>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe
            && let Err(err) = pipe.read_to_end(&mut buffer)
        {
            warn!(%err, "failed to read program output");
        }
        buffer
    })
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn output_of_a_finished_program_is_returned() {
        assert_eq!(run("echo", ["hello"]).unwrap(), "hello\n");
        assert!(matches!(
            run("false", [] as [&str; 0]),
            Err(PlatformError::Command { .. })
        ));
    }

    #[test]
    fn hanging_program_is_killed() {
        let started = Instant::now();
        let err = run_with_timeout("sleep", ["5"], Duration::from_millis(50)).unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(matches!(
            err,
            PlatformError::Command { ref program, ref reason }
                if program == "sleep" && reason.contains("did not finish")
        ));
    }

    #[test]
    fn missing_program_is_a_command_error() {
        assert!(matches!(
            run("surely-not-an-installed-program", ["--version"]),
            Err(PlatformError::Command { .. })
        ));
    }
}
