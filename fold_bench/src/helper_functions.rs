use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use crate::error::{PipelineError, PipelineResult};

/// Install the global fmt subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Create `dir` unless it already exists.
pub fn ensure_dir(dir: &Path) -> PipelineResult<()> {
    if !dir.is_dir() {
        debug!("Creating directory {}", dir.display());
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Resolve an executable name through `PATH`; paths are returned as given.
pub fn locate_program(program: &str) -> PipelineResult<PathBuf> {
    if program.contains('/') {
        return Ok(PathBuf::from(program));
    }
    which::which(program).map_err(|e| PipelineError::Config(format!("cannot find {}: {}", program, e)))
}

/// Run a command to completion, turning a non-zero exit into an error.
pub fn run_checked(cmd: &mut Command) -> PipelineResult<Output> {
    debug!("About to spawn: {:?}", cmd);
    let program = cmd.get_program().to_string_lossy().to_string();
    let output = cmd.output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        error!("{} failed. Stderr:\n{}", program, stderr);
        return Err(PipelineError::Command {
            program,
            status: output.status.to_string(),
            stderr,
        });
    }
    Ok(output)
}

/// Append `.ext` to a path without replacing an existing extension.
pub fn with_suffix(path: &Path, ext: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}
