//! Scheduler implementation

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::config::{LimiterOptions, SchedulerConfig};
use crate::error::LimiterError;
use crate::limiter::{JobHandle, Limiter};
use crate::task::{Job, Task};

/// Internal state protected by mutex
#[derive(Default)]
struct SchedulerInner {
    /// Registered options per resource
    options: HashMap<String, LimiterOptions>,

    /// Limiters built so far
    limiters: HashMap<String, Limiter>,
}

/// The Scheduler owns one lazily-built limiter per named resource
#[derive(Default)]
pub struct Scheduler {
    inner: Mutex<SchedulerInner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").field("resources", &self.resources()).finish()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        debug!("Scheduler::new: called");
        Self::default()
    }

    /// Create a scheduler with every resource of `config` registered
    pub fn from_config(config: SchedulerConfig) -> Result<Self, LimiterError> {
        debug!(resources = config.resources.len(), "Scheduler::from_config: called");
        let scheduler = Self::new();
        scheduler.configure(config.resources)?;
        Ok(scheduler)
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerInner> {
        // The guarded maps stay consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register or update resources
    ///
    /// All entries are validated before any is applied. A resource whose
    /// limiter was already built keeps that limiter and its original options.
    pub fn configure<I>(&self, entries: I) -> Result<(), LimiterError>
    where
        I: IntoIterator<Item = (String, LimiterOptions)>,
    {
        let entries: Vec<_> = entries.into_iter().collect();
        debug!(count = entries.len(), "Scheduler::configure: called");
        for (name, options) in &entries {
            if name.is_empty() {
                return Err(LimiterError::invalid("resource name must not be empty"));
            }
            options
                .validate()
                .map_err(|e| LimiterError::invalid(format!("resource '{}': {}", name, e)))?;
        }

        let mut inner = self.lock();
        for (name, options) in entries {
            if inner.limiters.contains_key(&name) {
                warn!(resource = %name, "Limiter already built, keeping its options");
                continue;
            }
            info!(resource = %name, concurrency = options.concurrency, "Resource configured");
            inner.options.insert(name, options);
        }
        Ok(())
    }

    /// Limiter for `name`, built on first use
    ///
    /// Must be called from within a tokio runtime.
    pub fn get_limiter(&self, name: &str) -> Result<Limiter, LimiterError> {
        let mut inner = self.lock();
        if let Some(limiter) = inner.limiters.get(name) {
            return Ok(limiter.clone());
        }

        let options = inner
            .options
            .get(name)
            .cloned()
            .ok_or_else(|| LimiterError::UnknownResource(name.to_string()))?;
        debug!(resource = %name, "Scheduler::get_limiter: building limiter");
        let limiter = Limiter::new(options)?;
        inner.limiters.insert(name.to_string(), limiter.clone());
        Ok(limiter)
    }

    /// Submit `task` to the limiter of resource `name`
    pub fn submit<T>(&self, name: &str, job: Job, task: Task<T>) -> Result<JobHandle<T>, LimiterError>
    where
        T: Clone + Send + 'static,
    {
        debug!(resource = %name, job_id = %job.id, "Scheduler::submit: called");
        let limiter = self.get_limiter(name)?;
        Ok(limiter.submit(job, task))
    }

    /// Registered resource names, sorted
    pub fn resources(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().options.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop every limiter built so far
    pub fn stop_all(&self, drop_waiting_jobs: bool) {
        let inner = self.lock();
        info!(limiters = inner.limiters.len(), drop_waiting_jobs, "Stopping all limiters");
        for limiter in inner.limiters.values() {
            limiter.stop(drop_waiting_jobs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::LimiterState;
    use crate::task::TaskOutput;
    use std::time::Duration;

    fn entry(name: &str, concurrency: usize) -> (String, LimiterOptions) {
        (
            name.to_string(),
            LimiterOptions {
                concurrency,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_unknown_resource() {
        let scheduler = Scheduler::new();
        let err = scheduler.get_limiter("missing").unwrap_err();
        assert!(matches!(err, LimiterError::UnknownResource(ref name) if name == "missing"));

        let err = scheduler
            .submit("missing", Job::new(), Task::single(|| async { Ok(()) }))
            .unwrap_err();
        assert!(matches!(err, LimiterError::UnknownResource(_)));
    }

    #[tokio::test]
    async fn test_get_limiter_is_cached() {
        let scheduler = Scheduler::new();
        scheduler.configure([entry("db", 2)]).unwrap();

        let first = scheduler.get_limiter("db").unwrap();
        let second = scheduler.get_limiter("db").unwrap();
        first.stop(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        // Same dispatch loop behind both handles
        assert_eq!(second.status(), LimiterState::Stopped);
        assert!(!second.is_accepting());
    }

    #[tokio::test]
    async fn test_reconfigure_keeps_built_limiter() {
        let scheduler = Scheduler::new();
        scheduler.configure([entry("db", 2)]).unwrap();
        let built = scheduler.get_limiter("db").unwrap();

        scheduler.configure([entry("db", 8), entry("api", 4)]).unwrap();
        assert_eq!(scheduler.get_limiter("db").unwrap().options().concurrency, 2);
        assert_eq!(built.options().concurrency, 2);
        assert_eq!(scheduler.get_limiter("api").unwrap().options().concurrency, 4);
        assert_eq!(scheduler.resources(), vec!["api".to_string(), "db".to_string()]);
    }

    #[test]
    fn test_configure_rejects_invalid_entries() {
        let scheduler = Scheduler::new();
        let err = scheduler.configure([entry("ok", 1), entry("bad", 0)]).unwrap_err();
        assert!(matches!(err, LimiterError::Validation(_)));
        // Nothing applied
        assert!(scheduler.resources().is_empty());

        assert!(scheduler.configure([entry("", 1)]).is_err());
    }

    #[tokio::test]
    async fn test_submit_delegates() {
        let config = SchedulerConfig::from_yaml(
            r#"
resources:
  api:
    concurrency: 3
"#,
        )
        .unwrap();
        let scheduler = Scheduler::from_config(config).unwrap();

        let output = scheduler
            .submit("api", Job::new(), Task::single(|| async { Ok("pong") }))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(output, TaskOutput::Value("pong"));
        assert_eq!(scheduler.get_limiter("api").unwrap().stats().total_done, 1);
    }

    #[tokio::test]
    async fn test_stop_all() {
        let scheduler = Scheduler::new();
        scheduler.configure([entry("a", 1), entry("b", 1)]).unwrap();
        let a = scheduler.get_limiter("a").unwrap();
        let b = scheduler.get_limiter("b").unwrap();

        scheduler.stop_all(true);
        let err = a.submit(Job::new(), Task::single(|| async { Ok(()) })).await.unwrap_err();
        assert!(matches!(err, LimiterError::Stopped));
        assert!(!b.is_accepting());
    }
}
