use core_affinity::CoreId;
use parking_lot::Mutex;
use rayon::ThreadPool;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::{Error, Result};

pub const DEFAULT_GROUP: &str = "default";

/// A named rayon pool, optionally pinned to a set of cores.
///
/// Work run through [`ResourceGroup::install`] uses this pool for every nested
/// rayon call, so a fusion volume driven from inside `install` keeps its
/// dispatches on the group's threads.
pub struct ResourceGroup {
    pub name: String,
    pub pool: Arc<ThreadPool>,
    pub cores: Vec<usize>,
}

impl ResourceGroup {
    pub fn new(name: &str, num_threads: usize, core_ids: Option<Vec<usize>>) -> Result<Self> {
        if num_threads == 0 {
            return Err(Error::RuntimeError(format!(
                "resource group '{name}' needs at least one thread"
            )));
        }
        let thread_name_prefix = format!("cv-{name}-");

        let pinned = core_ids.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(move |i| format!("{thread_name_prefix}{i}"))
            .start_handler(move |i| {
                if let Some(ref cores) = pinned {
                    if let Some(&core_index) = cores.get(i % cores.len().max(1)) {
                        core_affinity::set_for_current(CoreId { id: core_index });
                    }
                }
            })
            .build()
            .map_err(|e| Error::RuntimeError(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            pool: Arc::new(pool),
            cores: core_ids.unwrap_or_default(),
        })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.spawn(f);
    }

    pub fn install<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(f)
    }
}

impl std::fmt::Debug for ResourceGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGroup")
            .field("name", &self.name)
            .field("threads", &self.num_threads())
            .field("cores", &self.cores)
            .finish()
    }
}

#[derive(Default)]
pub struct TaskScheduler {
    groups: Mutex<HashMap<String, Arc<ResourceGroup>>>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_group(
        &self,
        name: &str,
        num_threads: usize,
        cores: Option<Vec<usize>>,
    ) -> Result<Arc<ResourceGroup>> {
        let mut groups = self.groups.lock();
        if groups.contains_key(name) {
            return Err(Error::GroupExists(name.to_string()));
        }
        let group = Arc::new(ResourceGroup::new(name, num_threads, cores)?);
        groups.insert(name.to_string(), group.clone());
        Ok(group)
    }

    pub fn get_group(&self, name: &str) -> Option<Arc<ResourceGroup>> {
        self.groups.lock().get(name).cloned()
    }

    /// Existing group with this name, or a new one.
    pub fn get_or_create_group(
        &self,
        name: &str,
        num_threads: usize,
        cores: Option<Vec<usize>>,
    ) -> Result<Arc<ResourceGroup>> {
        let mut groups = self.groups.lock();
        if let Some(group) = groups.get(name) {
            return Ok(group.clone());
        }
        let group = Arc::new(ResourceGroup::new(name, num_threads, cores)?);
        groups.insert(name.to_string(), group.clone());
        Ok(group)
    }

    /// Unregister a group. Its pool shuts down once the last handle is dropped.
    pub fn remove_group(&self, name: &str) -> Option<Arc<ResourceGroup>> {
        self.groups.lock().remove(name)
    }

    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

static GLOBAL_SCHEDULER: OnceLock<TaskScheduler> = OnceLock::new();

pub fn scheduler() -> &'static TaskScheduler {
    GLOBAL_SCHEDULER.get_or_init(TaskScheduler::new)
}

/// The shared `"default"` group, sized to the global rayon pool.
pub fn default_group() -> Result<Arc<ResourceGroup>> {
    scheduler().get_or_create_group(DEFAULT_GROUP, rayon::current_num_threads(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_runs_on_its_pool() {
        let group = ResourceGroup::new("unit", 2, None).unwrap();
        assert_eq!(group.num_threads(), 2);
        let name = group.install(|| std::thread::current().name().map(str::to_string));
        assert_eq!(name.as_deref().map(|n| n.starts_with("cv-unit-")), Some(true));
        assert_eq!(group.install(rayon::current_num_threads), 2);
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(ResourceGroup::new("empty", 0, None).is_err());
    }

    #[test]
    fn test_duplicate_group_rejected() {
        let s = TaskScheduler::new();
        s.create_group("a", 1, None).unwrap();
        assert!(matches!(s.create_group("a", 1, None), Err(Error::GroupExists(_))));
        let again = s.get_or_create_group("a", 4, None).unwrap();
        assert_eq!(again.num_threads(), 1);
        assert!(s.remove_group("a").is_some());
        assert!(s.get_group("a").is_none());
    }
}
