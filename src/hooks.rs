//! Preflight/postflight hooks (spec §4.1 `--no-preflight`, §7 exit code 4).
//!
//! Both hooks are optional PowerShell scripts dropped next to the agent
//! binary. Preflight runs before anything else and can veto the whole run
//! by exiting non-zero; postflight runs after reporting and its exit code
//! is only logged, never acted on.

use crate::error::AgentError;
use std::path::Path;
use std::process::Command;

fn run_script(path: &Path) -> std::io::Result<Option<i32>> {
    if !path.is_file() {
        return Ok(None);
    }
    let status = Command::new("powershell.exe")
        .arg("-NoProfile")
        .arg("-ExecutionPolicy")
        .arg("Bypass")
        .arg("-File")
        .arg(path)
        .status()?;
    Ok(Some(status.code().unwrap_or(-1)))
}

/// Runs `preflight.ps1` if present. A non-zero exit aborts the whole run
/// with exit code 4 (spec §6); a missing script is not an error.
pub fn run_preflight(path: &Path) -> Result<(), AgentError> {
    match run_script(path)? {
        Some(0) | None => Ok(()),
        Some(code) => Err(AgentError::PreflightRefused(code)),
    }
}

/// Runs `postflight.ps1` if present. Its exit code is informational only —
/// the run has already completed and reported by the time this runs.
pub fn run_postflight(path: &Path) -> Result<Option<i32>, AgentError> {
    Ok(run_script(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_preflight_script_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = run_preflight(&dir.path().join("preflight.ps1"));
        assert!(result.is_ok());
    }
}
