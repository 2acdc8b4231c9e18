pub mod orchestrator;

pub use orchestrator::{default_group, scheduler, ResourceGroup, TaskScheduler};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    #[error("Resource group '{0}' already exists")]
    GroupExists(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Spawn `$f` on the named group if it exists.
#[macro_export]
macro_rules! submit_to {
    ($group_name:expr, $f:block) => {
        if let Some(group) = $crate::scheduler().get_group($group_name) {
            group.spawn(move || $f);
        }
    };
}
