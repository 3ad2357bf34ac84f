//! Named set of polling executors

use std::collections::BTreeMap;

use tracing::{debug, info};

use super::executor::{PollingExecutor, PollingStatus};
use super::group::PollingGroup;
use super::stats::PollingStats;
use crate::error::LimiterError;

enum Slot<T> {
    /// Registered, waiting for `start_all`
    Pending(PollingGroup<T>),
    Started(PollingExecutor),
    /// Stopped before it was ever started
    Cancelled,
}

/// Owns one executor per polling group name
pub struct PollingManager<T> {
    slots: BTreeMap<String, Slot<T>>,
}

impl<T> Default for PollingManager<T> {
    fn default() -> Self {
        Self { slots: BTreeMap::new() }
    }
}

impl<T> PollingManager<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group; it starts with the next `start_all`
    pub fn add(&mut self, group: PollingGroup<T>) -> Result<(), LimiterError> {
        debug!(name = %group.name, "PollingManager::add: called");
        group.validate()?;
        if self.slots.contains_key(&group.name) {
            return Err(LimiterError::invalid(format!(
                "polling group '{}' already exists",
                group.name
            )));
        }
        self.slots.insert(group.name.clone(), Slot::Pending(group));
        Ok(())
    }

    /// Start every registered group that is not running yet
    ///
    /// Returns how many executors were started.
    pub fn start_all(&mut self) -> Result<usize, LimiterError> {
        let mut started = 0;
        for (name, slot) in self.slots.iter_mut() {
            if !matches!(slot, Slot::Pending(_)) {
                continue;
            }
            let Slot::Pending(group) = std::mem::replace(slot, Slot::Cancelled) else {
                continue;
            };
            debug!(%name, "PollingManager::start_all: starting");
            *slot = Slot::Started(PollingExecutor::start(group)?);
            started += 1;
        }
        info!(started, total = self.slots.len(), "Polling groups started");
        Ok(started)
    }

    pub fn pause(&self, name: &str) -> Result<(), LimiterError> {
        if let Some(executor) = self.executor(name)? {
            executor.pause();
        }
        Ok(())
    }

    pub fn resume(&self, name: &str) -> Result<(), LimiterError> {
        if let Some(executor) = self.executor(name)? {
            executor.resume();
        }
        Ok(())
    }

    /// Stop one group; a group that never started will not start later
    pub fn stop(&mut self, name: &str) -> Result<(), LimiterError> {
        let slot = self
            .slots
            .get_mut(name)
            .ok_or_else(|| LimiterError::UnknownResource(name.to_string()))?;
        match slot {
            Slot::Started(executor) => executor.stop(),
            Slot::Pending(_) => *slot = Slot::Cancelled,
            Slot::Cancelled => {}
        }
        Ok(())
    }

    pub fn stop_all(&mut self) {
        info!(groups = self.slots.len(), "Stopping all polling groups");
        for slot in self.slots.values_mut() {
            match slot {
                Slot::Started(executor) => executor.stop(),
                Slot::Pending(_) => *slot = Slot::Cancelled,
                Slot::Cancelled => {}
            }
        }
    }

    /// Stats of a group; zeroed for a group that never started
    pub fn stats(&self, name: &str) -> Result<PollingStats, LimiterError> {
        Ok(self.executor(name)?.map(PollingExecutor::stats).unwrap_or_default())
    }

    /// Timer status, `None` for a group that never started
    pub fn status(&self, name: &str) -> Result<Option<PollingStatus>, LimiterError> {
        Ok(self.executor(name)?.map(PollingExecutor::status))
    }

    pub fn names(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    fn executor(&self, name: &str) -> Result<Option<&PollingExecutor>, LimiterError> {
        match self.slots.get(name) {
            Some(Slot::Started(executor)) => Ok(Some(executor)),
            Some(_) => Ok(None),
            None => Err(LimiterError::UnknownResource(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use std::time::Duration;

    fn group(name: &str) -> PollingGroup<&'static str> {
        PollingGroup::new(name, Task::single(|| async { Ok("ok") }), 100)
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_and_start_all() {
        let mut manager = PollingManager::new();
        manager.add(group("orders")).unwrap();
        manager.add(group("health")).unwrap();
        assert_eq!(manager.names(), vec!["health".to_string(), "orders".to_string()]);
        assert_eq!(manager.status("orders").unwrap(), None);

        assert_eq!(manager.start_all().unwrap(), 2);
        // Already running groups are left alone
        assert_eq!(manager.start_all().unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(manager.stats("orders").unwrap().successes, 2);
        assert_eq!(manager.status("health").unwrap(), Some(PollingStatus::Running));
    }

    #[test]
    fn test_duplicate_and_unknown_names() {
        let mut manager = PollingManager::new();
        manager.add(group("orders")).unwrap();
        assert!(matches!(manager.add(group("orders")), Err(LimiterError::Validation(_))));

        assert!(matches!(manager.pause("missing"), Err(LimiterError::UnknownResource(_))));
        assert!(matches!(manager.stats("missing"), Err(LimiterError::UnknownResource(_))));
        assert_eq!(manager.stats("orders").unwrap(), PollingStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_stop_by_name() {
        let mut manager = PollingManager::new();
        manager.add(group("a")).unwrap();
        manager.add(group("b")).unwrap();
        manager.start_all().unwrap();

        manager.pause("a").unwrap();
        assert_eq!(manager.status("a").unwrap(), Some(PollingStatus::Paused));
        manager.resume("a").unwrap();
        assert_eq!(manager.status("a").unwrap(), Some(PollingStatus::Running));

        manager.stop("b").unwrap();
        assert_eq!(manager.status("b").unwrap(), Some(PollingStatus::Stopped));
        assert_eq!(manager.status("a").unwrap(), Some(PollingStatus::Running));
    }

    #[tokio::test]
    async fn test_stop_all_cancels_pending() {
        let mut manager = PollingManager::new();
        manager.add(group("started")).unwrap();
        manager.start_all().unwrap();
        manager.add(group("pending")).unwrap();

        manager.stop_all();
        assert_eq!(manager.start_all().unwrap(), 0);
        assert_eq!(manager.status("started").unwrap(), Some(PollingStatus::Stopped));
        assert_eq!(manager.status("pending").unwrap(), None);
    }
}
