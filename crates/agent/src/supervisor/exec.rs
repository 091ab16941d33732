use proxops_common::error::Error;
use tokio::process::Command;

pub struct CmdOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    /// Turn a non-zero exit into an `Exec` error carrying stderr.
    pub fn check(self, what: &str) -> Result<CmdOutput, Error> {
        if !self.success {
            return Err(Error::Exec(format!("{what}: {}", self.stderr.trim())));
        }
        Ok(self)
    }
}

/// Run a command to completion. Only a failed spawn is an error here;
/// callers inspect the exit status because several service-manager commands
/// fail benignly ("not loaded", "no process to signal").
pub async fn run(program: &str, args: &[&str]) -> Result<CmdOutput, Error> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| Error::Exec(format!("{program}: {e}")))?;

    Ok(CmdOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
