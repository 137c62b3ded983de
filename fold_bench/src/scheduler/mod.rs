//! Submission of job batches to an external scheduler.

mod local;
mod slurm;

pub use local::LocalScheduler;
pub use slurm::{parse_job_id, parse_state, render_script, SlurmScheduler, SlurmState};

use tracing::{info, warn};

use crate::error::PipelineResult;
use crate::models::{Job, JobOutcome};

pub trait Scheduler {
    /// Submit every job and block until all of them reach a terminal state.
    ///
    /// A job that fails does not stop the rest of the batch; its failure is
    /// reported in the returned outcomes, one per job in submission order.
    fn submit_and_wait(&mut self, jobs: &[Job]) -> PipelineResult<Vec<JobOutcome>>;
}

impl<S: Scheduler + ?Sized> Scheduler for Box<S> {
    fn submit_and_wait(&mut self, jobs: &[Job]) -> PipelineResult<Vec<JobOutcome>> {
        (**self).submit_and_wait(jobs)
    }
}

/// Log a one-line summary of a finished batch.
pub fn log_outcomes(phase: &str, outcomes: &[JobOutcome]) {
    let failed: Vec<&JobOutcome> = outcomes.iter().filter(|o| !o.succeeded()).collect();
    info!(
        "{}: {} job(s) finished, {} failed",
        phase,
        outcomes.len(),
        failed.len()
    );
    for outcome in failed {
        warn!("{} failed: {:?}", outcome.name, outcome.state);
    }
}
