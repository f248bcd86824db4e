// fix-applier-rs/src/command.rs
// Bounded shell command execution for run_command actions.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

/// Captured output of one command run.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Run a shell command under a hard timeout.
///
/// Timeout kills the child and reports an error; it is never treated as
/// success. A command that cannot be spawned at all is also an error.
pub async fn run_shell(command: &str, limit: Duration) -> Result<CommandOutput, String> {
    tracing::info!(command = %command, timeout_secs = limit.as_secs(), "executing command");

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to spawn `{command}`: {e}"))?;

    let waited = timeout(limit, async {
        let stdout = child
            .stdout
            .take()
            .expect("stdout piped above");
        let stderr = child
            .stderr
            .take()
            .expect("stderr piped above");

        let (status, stdout, stderr) = tokio::join!(
            child.wait(),
            read_to_string(stdout),
            read_to_string(stderr),
        );
        status.map(|status| CommandOutput {
            stdout,
            stderr,
            exit_code: status.code().unwrap_or(-1),
        })
    })
    .await;

    match waited {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => Err(format!("failed to wait for `{command}`: {err}")),
        Err(_) => Err(format!(
            "command `{command}` timed out after {}s",
            limit.as_secs()
        )),
    }
}

async fn read_to_string(mut reader: impl tokio::io::AsyncRead + Unpin) -> String {
    use tokio::io::AsyncReadExt;
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}
