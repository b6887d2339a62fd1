use declarative::{CommandOutput, HostError, HostResult};
use std::process::{Command, Stdio};

/// Run a program and capture its output
///
/// Only failure to start the program is an error; a non-zero exit is
/// reported through [`CommandOutput::success`].
pub fn run_capture(cmd: &str, args: &[&str]) -> HostResult<CommandOutput> {
    run_command(Command::new(cmd).args(args), cmd, args)
}

/// Like [`run_capture`], with extra environment variables
pub fn run_capture_env(
    cmd: &str,
    args: &[&str],
    envs: &[(&str, &str)],
) -> HostResult<CommandOutput> {
    let mut command = Command::new(cmd);
    command.args(args);
    for (key, value) in envs {
        command.env(key, value);
    }
    run_command(&mut command, cmd, args)
}

/// Run a prepared command, mapping spawn failures to host errors
pub fn run_command(command: &mut Command, cmd: &str, args: &[&str]) -> HostResult<CommandOutput> {
    log::debug!("Running: {} {}", cmd, args.join(" "));
    command
        .stdin(Stdio::null())
        .output()
        .map(CommandOutput::from)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                HostError::Unavailable(format!("{cmd} is not installed"))
            }
            std::io::ErrorKind::PermissionDenied => {
                HostError::PermissionDenied(format!("not allowed to execute {cmd}"))
            }
            _ => HostError::Failed(format!("Failed to execute: {} {}: {e}", cmd, args.join(" "))),
        })
}

/// Run a program and require it to succeed
pub fn run_checked(cmd: &str, args: &[&str]) -> HostResult<CommandOutput> {
    let output = run_capture(cmd, args)?;
    if output.success {
        Ok(output)
    } else {
        Err(classify_failure(cmd, &output.stderr_str()))
    }
}

/// Map a failed command's stderr onto the host error kinds
pub fn classify_failure(cmd: &str, stderr: &str) -> HostError {
    let message = format!("{cmd} failed: {}", stderr.trim());
    let lower = stderr.to_lowercase();
    if lower.contains("permission denied")
        || lower.contains("are you root")
        || lower.contains("access denied")
        || lower.contains("operation not permitted")
    {
        HostError::PermissionDenied(message)
    } else if lower.contains("unable to locate package")
        || lower.contains("no matching distribution")
        || lower.contains("can't connect")
        || lower.contains("could not find")
    {
        HostError::Unavailable(message)
    } else {
        HostError::Failed(message)
    }
}

/// Check if a command exists
pub fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
