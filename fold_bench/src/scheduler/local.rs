use std::fs::File;
use std::process::{Command, Stdio};

use tracing::{info, warn};

use super::Scheduler;
use crate::error::PipelineResult;
use crate::helper_functions::ensure_dir;
use crate::models::{Job, JobOutcome};

/// Runs each job in turn on this machine through `bash -c`.
///
/// Resource requests are ignored.
#[derive(Debug, Clone)]
pub struct LocalScheduler {
    pub shell: String,
}

impl Default for LocalScheduler {
    fn default() -> Self {
        LocalScheduler {
            shell: "bash".to_string(),
        }
    }
}

impl Scheduler for LocalScheduler {
    fn submit_and_wait(&mut self, jobs: &[Job]) -> PipelineResult<Vec<JobOutcome>> {
        let mut outcomes = Vec::with_capacity(jobs.len());

        for job in jobs {
            let (out, err) = match open_logs(job) {
                Ok(logs) => logs,
                Err(e) => {
                    warn!("Cannot open logs of {}: {}", job.name, e);
                    outcomes.push(JobOutcome::failed(&job.name, e.to_string()));
                    continue;
                }
            };
            info!("Running {} locally", job.name);

            let status = Command::new(&self.shell)
                .arg("-c")
                .arg(&job.cmd)
                .stdin(Stdio::null())
                .stdout(out)
                .stderr(err)
                .status();

            let outcome = match status {
                Ok(s) if s.success() => JobOutcome::completed(&job.name),
                Ok(s) => {
                    warn!("{} exited with {}, see {}", job.name, s, job.err_file.display());
                    JobOutcome::failed(&job.name, s.to_string())
                }
                Err(e) => JobOutcome::failed(&job.name, e.to_string()),
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }
}

fn open_logs(job: &Job) -> PipelineResult<(File, File)> {
    for log in [&job.out_file, &job.err_file] {
        if let Some(parent) = log.parent() {
            ensure_dir(parent)?;
        }
    }
    Ok((File::create(&job.out_file)?, File::create(&job.err_file)?))
}
