use std::io::Result as IoResult;
use std::process::Stdio;

use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

/// Handle for a child process which ensures the subprocess is properly
/// terminated when the source goes away.
#[derive(Debug)]
pub(crate) struct ChildContainer(Child);

impl ChildContainer {
    /// Spawns `program` with stdout piped and stdin/stderr silenced.
    pub(crate) fn spawn(program: &str, args: &[&str]) -> IoResult<(Self, ChildStdout)> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .expect("stdout piped above, so it must be present");

        Ok((Self(child), stdout))
    }

    /// Begins termination without waiting for exit.
    pub(crate) fn kill(&mut self) {
        if let Err(e) = self.0.start_kill() {
            debug!("error killing child process: {e:?}");
        }
    }
}

impl Drop for ChildContainer {
    fn drop(&mut self) {
        self.kill();
    }
}
