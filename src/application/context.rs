use std::sync::Arc;

use crate::application::jobs::registry::JobRegistry;
use crate::domain::services::lease_manager::LeaseManager;
use crate::infrastructure::db::repositories::Repositories;

/// Shared application resources used by use cases and workers.
pub struct AppContext {
    pub repos: Repositories,
    pub registry: Arc<JobRegistry>,
    pub leases: LeaseManager,
}

impl AppContext {
    /// Build a new application context with shared repositories and services.
    pub fn new(repos: Repositories, registry: Arc<JobRegistry>, leases: LeaseManager) -> Self {
        Self {
            repos,
            registry,
            leases,
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::AppContext;
    use crate::application::jobs::builtin::register_builtin;
    use crate::application::jobs::registry::JobRegistry;
    use crate::application::jobs::registry::test_support::Greet;
    use crate::domain::services::clock::ManualClock;
    use crate::domain::services::lease_manager::LeaseManager;
    use crate::domain::value_objects::timestamps::Timestamp;
    use crate::infrastructure::db::memory::InMemoryJobStore;
    use crate::infrastructure::db::repositories::Repositories;
    use std::sync::Arc;

    pub fn test_registry() -> JobRegistry {
        let mut registry = JobRegistry::new();
        register_builtin(&mut registry).unwrap();
        registry.register::<Greet>().unwrap();
        registry
    }

    /// Context over an in-memory store driven by a manual clock.
    pub fn test_context_with_clock() -> (AppContext, Arc<ManualClock>) {
        // Step 1: Build repositories backed by an in-memory store.
        let clock = Arc::new(ManualClock::new(Timestamp::now_utc()));
        let store = Arc::new(InMemoryJobStore::new(clock.clone()));
        let repos = Repositories::in_memory(store);

        // Step 2: Register the built-in and test job types.
        let ctx = AppContext::new(repos, Arc::new(test_registry()), LeaseManager::default());
        (ctx, clock)
    }

    pub fn test_context() -> AppContext {
        test_context_with_clock().0
    }
}
