//! Child processes under a deadline

use omnigate_config::OutputBudget;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::util::truncate;

/// How a bounded child process ended
#[derive(Debug)]
pub enum RunOutcome {
    Completed(Output),
    TimedOut,
    SpawnFailed(std::io::Error),
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, RunOutcome::Completed(out) if out.status.success())
    }
}

/// Run `cmd` with piped output, killing it if `timeout` elapses first
pub async fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> RunOutcome {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => RunOutcome::Completed(output),
        Ok(Err(e)) => RunOutcome::SpawnFailed(e),
        Err(_) => {
            debug!("◆ CHILD KILLED AFTER {:?}", timeout);
            RunOutcome::TimedOut
        }
    }
}

/// Shell command through `sh -c`
pub fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

/// Lossy stdout and stderr
pub fn streams(output: &Output) -> (String, String) {
    (
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    )
}

/// Stdout and stderr clipped to `budget`, joined by a newline
pub fn clip(output: &Output, budget: OutputBudget) -> String {
    let (stdout, stderr) = streams(output);
    format!(
        "{}\n{}",
        truncate(&stdout, budget.stdout),
        truncate(&stderr, budget.stderr)
    )
}
