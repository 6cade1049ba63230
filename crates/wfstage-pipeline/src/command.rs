use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::process::Command;
use wfstage_core::{Deadline, Interrupted};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to run {program}: {source}. Is it installed?")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn status_line(&self) -> String {
        match self.status.code() {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".into(),
        }
    }
}

/// Run `cmd` to completion under `deadline`, capturing both output streams.
///
/// The child is killed if the deadline fires or the run is cancelled.
/// A non-zero exit is not an error here; callers decide what it means.
pub async fn run_captured(
    mut cmd: Command,
    what: &str,
    deadline: &Deadline,
) -> Result<CommandOutput, CommandError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    cmd.stdin(Stdio::null()).kill_on_drop(true);

    tracing::debug!(program = %program, step = what, "Spawning subprocess");
    let output = deadline
        .run(what, cmd.output())
        .await?
        .map_err(|source| CommandError::Spawn { program, source })?;

    Ok(CommandOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
