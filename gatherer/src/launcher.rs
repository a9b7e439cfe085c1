//! Telemetry command launcher
//!
//! Builds the platform command line and spawns it with a piped stdout. On
//! Windows the bundled sampler script is rendered into a temp file that lives
//! as long as the child process.

use crate::config::GathererConfig;
use crate::error::GathererError;
use igpu_shared::Platform;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempPath;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

pub const INTEL_GPU_TOP: &str = "intel_gpu_top";
pub const POWERSHELL: &str = "powershell";

const WINDOWS_SCRIPT: &str = include_str!("../scripts/windows_gpu.ps1");

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// `intel_gpu_top -J -s <ms> [extra args] [-d <device>]`
pub fn linux_command(config: &GathererConfig) -> CommandLine {
    let mut args = vec![
        "-J".to_string(),
        "-s".to_string(),
        config.refresh.as_millis().to_string(),
    ];
    args.extend(config.additional_args.split_whitespace().map(String::from));
    if let Some(device) = config.device() {
        args.push("-d".to_string());
        args.push(device.to_string());
    }
    CommandLine {
        program: INTEL_GPU_TOP.to_string(),
        args,
    }
}

/// `powershell -NoProfile -ExecutionPolicy Bypass -File <script>`
pub fn windows_command(script: &Path) -> CommandLine {
    CommandLine {
        program: POWERSHELL.to_string(),
        args: vec![
            "-NoProfile".to_string(),
            "-ExecutionPolicy".to_string(),
            "Bypass".to_string(),
            "-File".to_string(),
            script.display().to_string(),
        ],
    }
}

/// Fill the sampler script template. The interval is in whole seconds, at least 1.
pub fn render_windows_script(device: Option<&str>, interval: Duration) -> String {
    let device = device.unwrap_or_default().replace('\'', "''");
    let secs = interval.as_secs().max(1);
    WINDOWS_SCRIPT
        .replace("{{DEVICE}}", &device)
        .replace("{{INTERVAL}}", &secs.to_string())
}

/// Write the rendered script to a `gpu*.ps1` temp file, removed when the path is dropped
pub fn write_windows_script(contents: &str) -> std::io::Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("gpu")
        .suffix(".ps1")
        .tempfile()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file.into_temp_path())
}

/// A running telemetry command
pub struct TelemetryProcess {
    child: Child,
    command: CommandLine,
    _script: Option<TempPath>,
}

impl TelemetryProcess {
    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Kill the child and reap it
    pub async fn shutdown(mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("Telemetry command already gone: {}", e);
        }
        match self.child.wait().await {
            Ok(status) => debug!("'{}' exited with {}", self.command.program, status),
            Err(e) => warn!("Failed to reap '{}': {}", self.command.program, e),
        }
    }
}

/// Spawn the telemetry command for the configured platform
pub fn spawn(config: &GathererConfig) -> Result<TelemetryProcess, GathererError> {
    let (command, script) = match config.platform {
        Platform::Linux => (linux_command(config), None),
        Platform::Windows => {
            if !config.additional_args.trim().is_empty() {
                warn!("Additional args are ignored by the Windows sampler");
            }
            let rendered = render_windows_script(config.device(), config.refresh);
            let script = write_windows_script(&rendered).map_err(GathererError::Script)?;
            (windows_command(&script), Some(script))
        }
    };
    debug!("Executing command: '{}'", command);

    let child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| GathererError::Spawn {
            command: command.to_string(),
            source,
        })?;

    Ok(TelemetryProcess {
        child,
        command,
        _script: script,
    })
}
