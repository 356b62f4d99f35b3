// Report Fan-out Dispatcher
// Runs every render target against the shared results, isolating failures

use crate::export::{Artifact, OutputPolicy, RenderTarget};
use crate::observer::RunObserver;
use crate::query::ResultSet;
use crate::report::TargetRecord;
use chrono::{DateTime, Local};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;

/// A target that passed planning and will be rendered
struct Job {
    slot: usize,
    target: Arc<dyn RenderTarget>,
    inputs: ResultSet,
    path: PathBuf,
}

/// Fans one result set out to many independent render targets.
///
/// A failing or panicking target is recorded and never prevents the others
/// from running.
pub struct Dispatcher {
    policy: OutputPolicy,
    observer: Arc<dyn RunObserver>,
    parallel: bool,
}

impl Dispatcher {
    pub fn new(policy: OutputPolicy, observer: Arc<dyn RunObserver>) -> Self {
        Self {
            policy,
            observer,
            parallel: false,
        }
    }

    /// Render targets concurrently on the blocking pool
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn policy(&self) -> &OutputPolicy {
        &self.policy
    }

    /// Render every target; records come back in declaration order
    pub async fn dispatch(
        &self,
        results: &ResultSet,
        targets: &[Arc<dyn RenderTarget>],
        timestamp: &DateTime<Local>,
    ) -> Vec<TargetRecord> {
        let mut records: Vec<Option<TargetRecord>> = vec![None; targets.len()];
        let mut jobs = Vec::new();
        let mut claimed: HashMap<PathBuf, String> = HashMap::new();

        for (slot, target) in targets.iter().enumerate() {
            match self.plan(slot, target, results, timestamp, &mut claimed) {
                Ok(job) => jobs.push(job),
                Err(record) => records[slot] = Some(record),
            }
        }

        tracing::debug!(jobs = jobs.len(), parallel = self.parallel, "dispatching render targets");

        if self.parallel {
            let mut set = JoinSet::new();
            for job in jobs {
                let name = job.target.name().to_string();
                set.spawn_blocking(move || (job.slot, name, render_guarded(&job)));
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((slot, name, outcome)) => records[slot] = Some(self.record(&name, outcome)),
                    // render_guarded catches panics, so only an aborted task lands here
                    Err(e) => tracing::error!(error = %e, "render task did not complete"),
                }
            }
        } else {
            for job in jobs {
                let slot = job.slot;
                let name = job.target.name().to_string();
                let outcome = match tokio::task::spawn_blocking(move || render_guarded(&job)).await {
                    Ok(outcome) => outcome,
                    Err(e) => Err(e.to_string()),
                };
                records[slot] = Some(self.record(&name, outcome));
            }
        }

        records
            .into_iter()
            .zip(targets)
            .map(|(record, target)| {
                record.unwrap_or_else(|| {
                    let reason = "render task did not complete";
                    self.observer.target_failed(target.name(), reason);
                    TargetRecord::failed(target.name(), reason)
                })
            })
            .collect()
    }

    /// Decide whether a target runs; `Err` carries its final record
    fn plan(
        &self,
        slot: usize,
        target: &Arc<dyn RenderTarget>,
        results: &ResultSet,
        timestamp: &DateTime<Local>,
        claimed: &mut HashMap<PathBuf, String>,
    ) -> Result<Job, TargetRecord> {
        let name = target.name();
        let path = self.policy.path_for(name, target.extension(), timestamp);

        if let Some(owner) = claimed.get(&path) {
            let reason = format!("output path {} already claimed by '{}'", path.display(), owner);
            self.observer.target_failed(name, &reason);
            return Err(TargetRecord::failed(name, reason));
        }
        claimed.insert(path.clone(), name.to_string());

        let wanted = target.inputs();
        let inputs = results.subset(wanted.iter().copied());
        if !wanted.is_empty() && inputs.is_empty() {
            let reason = format!("none of its inputs are available ({})", wanted.join(", "));
            self.observer.target_skipped(name, &reason);
            return Err(TargetRecord::skipped(name, reason));
        }

        if let Err(e) = self.policy.name_for(name, target.extension(), timestamp) {
            let reason = format!("cannot prepare output directory: {}", e);
            self.observer.target_failed(name, &reason);
            return Err(TargetRecord::failed(name, reason));
        }

        Ok(Job {
            slot,
            target: Arc::clone(target),
            inputs,
            path,
        })
    }

    fn record(&self, name: &str, outcome: Result<Artifact, String>) -> TargetRecord {
        match outcome {
            Ok(artifact) => {
                self.observer.target_succeeded(name, &artifact.path);
                TargetRecord::succeeded(name, artifact)
            }
            Err(reason) => {
                self.observer.target_failed(name, &reason);
                TargetRecord::failed(name, reason)
            }
        }
    }
}

/// Render one job, turning both errors and panics into a reason string
fn render_guarded(job: &Job) -> Result<Artifact, String> {
    match catch_unwind(AssertUnwindSafe(|| job.target.render(&job.inputs, &job.path))) {
        Ok(Ok(artifact)) => Ok(artifact),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("render panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
