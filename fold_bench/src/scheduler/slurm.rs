use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, error, info, warn};

use super::Scheduler;
use crate::error::{PipelineError, PipelineResult};
use crate::helper_functions::{locate_program, run_checked};
use crate::models::{Job, JobOutcome};

/// Consecutive polls a job may go unreported before it counts as lost.
pub const MAX_POLL_MISSES: u32 = 10;

/// Submits through `sbatch` and polls `sacct`.
#[derive(Debug, Clone)]
pub struct SlurmScheduler {
    pub sbatch: PathBuf,
    pub sacct: PathBuf,
    /// Jobs allowed in flight at once.
    pub max_jobs: usize,
    pub poll_interval: Duration,
    pub max_poll_misses: u32,
}

impl SlurmScheduler {
    pub fn new(max_jobs: usize, poll_interval: Duration) -> PipelineResult<Self> {
        Ok(SlurmScheduler {
            sbatch: locate_program("sbatch")?,
            sacct: locate_program("sacct")?,
            max_jobs: max_jobs.max(1),
            poll_interval,
            max_poll_misses: MAX_POLL_MISSES,
        })
    }

    fn submit(&self, job: &Job) -> PipelineResult<String> {
        let mut script = tempfile::Builder::new().prefix("sbatch_").suffix(".sh").tempfile()?;
        script.write_all(render_script(job).as_bytes())?;
        script.flush()?;

        let output = run_checked(Command::new(&self.sbatch).arg(script.path()))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let id = parse_job_id(&stdout)?;
        info!("Submitted {} as job {}", job.name, id);
        Ok(id)
    }

    fn poll(&self, ids: &[String]) -> PipelineResult<HashMap<String, SlurmState>> {
        let joined = ids.join(",");
        let output = run_checked(
            Command::new(&self.sacct)
                .args(["-n", "-X", "-P", "-o", "JobID,State", "-j"])
                .arg(&joined),
        )?;

        let mut states = HashMap::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            if let Some((id, state)) = line.trim().split_once('|') {
                states.insert(id.to_string(), parse_state(state));
            }
        }
        Ok(states)
    }
}

impl Scheduler for SlurmScheduler {
    fn submit_and_wait(&mut self, jobs: &[Job]) -> PipelineResult<Vec<JobOutcome>> {
        let mut outcomes: Vec<Option<JobOutcome>> = vec![None; jobs.len()];
        let mut pending: VecDeque<usize> = (0..jobs.len()).collect();
        let mut running = InFlight::new(self.max_poll_misses);

        loop {
            while running.len() < self.max_jobs {
                let Some(idx) = pending.pop_front() else { break };
                match self.submit(&jobs[idx]) {
                    Ok(id) => running.insert(id, idx),
                    Err(e) => {
                        error!("Could not submit {}: {}", jobs[idx].name, e);
                        outcomes[idx] = Some(JobOutcome::failed(&jobs[idx].name, e.to_string()));
                    }
                }
            }

            if running.is_empty() {
                break;
            }

            thread::sleep(self.poll_interval);
            let polled = self.poll(&running.ids());
            for (idx, state) in running.update(polled) {
                let name = &jobs[idx].name;
                debug!("{} finished: {:?}", name, state);
                outcomes[idx] = Some(match state {
                    SlurmState::Completed => JobOutcome::completed(name),
                    SlurmState::Failed(reason) => JobOutcome::failed(name, reason),
                    other => JobOutcome::failed(name, format!("{:?}", other)),
                });
            }
        }

        Ok(outcomes
            .into_iter()
            .zip(jobs)
            .map(|(o, job)| o.unwrap_or_else(|| JobOutcome::failed(&job.name, "never scheduled")))
            .collect())
    }
}

/// Submitted jobs still awaiting a terminal state, keyed by SLURM id.
#[derive(Debug)]
struct InFlight {
    jobs: HashMap<String, (usize, u32)>,
    max_misses: u32,
}

impl InFlight {
    fn new(max_misses: u32) -> Self {
        InFlight {
            jobs: HashMap::new(),
            max_misses,
        }
    }

    fn insert(&mut self, id: String, idx: usize) {
        self.jobs.insert(id, (idx, 0));
    }

    fn len(&self) -> usize {
        self.jobs.len()
    }

    fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn ids(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    /// Fold one `sacct` answer in and return the jobs that left the set.
    /// A failed poll counts as a miss for every job in flight.
    fn update(&mut self, polled: PipelineResult<HashMap<String, SlurmState>>) -> Vec<(usize, SlurmState)> {
        let states = polled.unwrap_or_else(|e| {
            warn!("sacct failed, polling again: {}", e);
            HashMap::new()
        });

        let mut done = Vec::new();
        let max_misses = self.max_misses;
        self.jobs.retain(|id, (idx, misses)| match states.get(id) {
            Some(state) if state.is_terminal() => {
                done.push((*idx, state.clone()));
                false
            }
            Some(_) => {
                *misses = 0;
                true
            }
            None => {
                *misses += 1;
                if *misses < max_misses {
                    return true;
                }
                warn!("Job {} not reported by sacct after {} polls", id, misses);
                done.push((*idx, SlurmState::Failed(format!("lost track of job {}", id))));
                false
            }
        });
        done
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlurmState {
    Pending,
    Running,
    Completed,
    Failed(String),
}

impl SlurmState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SlurmState::Completed | SlurmState::Failed(_))
    }
}

/// Interpret a `sacct` State column.
pub fn parse_state(raw: &str) -> SlurmState {
    let raw = raw.trim();
    let word = raw.split_whitespace().next().unwrap_or("");
    match word {
        "COMPLETED" => SlurmState::Completed,
        "PENDING" | "REQUEUED" | "CONFIGURING" | "RESIZING" | "" => SlurmState::Pending,
        "RUNNING" | "COMPLETING" | "SUSPENDED" | "STOPPED" => SlurmState::Running,
        _ => SlurmState::Failed(raw.to_string()),
    }
}

/// Extract the id from `Submitted batch job <id>`.
pub fn parse_job_id(stdout: &str) -> PipelineResult<String> {
    let re = Regex::new(r"Submitted batch job (\d+)").map_err(|e| PipelineError::Submission(e.to_string()))?;
    re.captures(stdout)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| PipelineError::Submission(format!("unexpected sbatch output: {}", stdout.trim())))
}

pub fn render_script(job: &Job) -> String {
    let r = &job.resources;
    let mut s = String::from("#!/bin/bash\n\n");
    let _ = writeln!(s, "#SBATCH -p {}", r.queue);
    let _ = writeln!(s, "#SBATCH -n 1");
    let _ = writeln!(s, "#SBATCH -c {}", r.cpu);
    if r.gpu > 0 {
        let _ = writeln!(s, "#SBATCH --gres=gpu:{}", r.gpu);
    }
    let _ = writeln!(s, "#SBATCH -J {}", job.name);
    let _ = writeln!(s, "#SBATCH -o {}", job.out_file.display());
    let _ = writeln!(s, "#SBATCH -e {}", job.err_file.display());
    let _ = writeln!(s, "#SBATCH --mem {}", r.mem);
    let _ = writeln!(s, "#SBATCH --time {}", r.time);
    s.push('\n');
    s.push_str(&job.cmd);
    s.push('\n');
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Resources;

    fn job(gpu: bool) -> Job {
        let resources = if gpu {
            Resources::saturation("gtx1080ti")
        } else {
            Resources::regression("standard")
        };
        Job {
            cmd: "echo hi".to_string(),
            name: "sat-f0c0".to_string(),
            out_file: PathBuf::from("/exp/f0_c0/sat_mut.out"),
            err_file: PathBuf::from("/exp/f0_c0/sat_mut.err"),
            resources,
        }
    }

    #[test]
    fn script_has_resources() {
        let script = render_script(&job(true));
        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains("#SBATCH -p gtx1080ti\n"));
        assert!(script.contains("#SBATCH -c 2\n"));
        assert!(script.contains("#SBATCH --gres=gpu:1\n"));
        assert!(script.contains("#SBATCH --mem 30000\n"));
        assert!(script.contains("#SBATCH --time 7-0:00:00\n"));
        assert!(script.contains("#SBATCH -o /exp/f0_c0/sat_mut.out\n"));
        assert!(script.trim_end().ends_with("echo hi"));

        let cpu_only = render_script(&job(false));
        assert!(!cpu_only.contains("--gres"));
        assert!(cpu_only.contains("#SBATCH -c 4\n"));
    }

    #[test]
    fn states() {
        assert_eq!(parse_state("COMPLETED"), SlurmState::Completed);
        assert_eq!(parse_state("PENDING"), SlurmState::Pending);
        assert_eq!(parse_state(""), SlurmState::Pending);
        assert_eq!(parse_state("RUNNING"), SlurmState::Running);
        assert_eq!(parse_state("CANCELLED by 1001"), SlurmState::Failed("CANCELLED by 1001".to_string()));
        assert!(parse_state("OUT_OF_MEMORY").is_terminal());
        assert!(!parse_state("COMPLETING").is_terminal());
    }

    #[test]
    fn unreported_jobs_are_given_up() {
        let mut running = InFlight::new(2);
        running.insert("11".to_string(), 0);
        running.insert("12".to_string(), 1);

        let first = HashMap::from([("11".to_string(), SlurmState::Running)]);
        assert!(running.update(Ok(first)).is_empty());

        // sacct itself failing is a miss, not an abort.
        let done = running.update(Err(PipelineError::Submission("sacct: timeout".to_string())));
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].0, 1);
        assert!(matches!(done[0].1, SlurmState::Failed(ref r) if r.contains("12")));
        assert_eq!(running.len(), 1);

        let last = HashMap::from([("11".to_string(), SlurmState::Completed)]);
        assert_eq!(running.update(Ok(last)), vec![(0, SlurmState::Completed)]);
        assert!(running.is_empty());
    }

    #[test]
    fn reported_jobs_reset_misses() {
        let mut running = InFlight::new(2);
        running.insert("7".to_string(), 0);
        for _ in 0..5 {
            assert!(running.update(Err(PipelineError::Submission("down".to_string()))).is_empty());
            let seen = HashMap::from([("7".to_string(), SlurmState::Pending)]);
            assert!(running.update(Ok(seen)).is_empty());
        }
        assert_eq!(running.len(), 1);
    }

    #[test]
    fn job_ids() {
        assert_eq!(parse_job_id("Submitted batch job 4242\n").unwrap(), "4242");
        assert!(matches!(parse_job_id("sbatch: error"), Err(PipelineError::Submission(_))));
    }
}
