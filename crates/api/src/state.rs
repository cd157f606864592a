//! The active platform configuration.

use std::sync::{Arc, PoisonError, RwLock};

use switchyard_core::config::PlatformConfig;

struct Active {
    config: Arc<PlatformConfig>,
    /// Process-wide environment marker.
    env: String,
}

/// Exactly one configuration is active at a time. Readers take a snapshot;
/// an environment switch replaces config and marker together.
pub struct ActiveConfig {
    inner: RwLock<Active>,
}

impl ActiveConfig {
    pub fn new(config: PlatformConfig) -> Self {
        let env = config.working_env.clone();
        Self {
            inner: RwLock::new(Active {
                config: Arc::new(config),
                env,
            }),
        }
    }

    pub fn current(&self) -> Arc<PlatformConfig> {
        Arc::clone(&self.inner.read().unwrap_or_else(PoisonError::into_inner).config)
    }

    pub fn env(&self) -> String {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .env
            .clone()
    }

    pub fn replace(&self, config: Arc<PlatformConfig>) {
        let mut active = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        active.env = config.working_env.clone();
        active.config = config;
    }

    /// Apply `update` to a copy of the active config and make it current.
    pub fn update(&self, update: impl FnOnce(&mut PlatformConfig)) -> Arc<PlatformConfig> {
        let mut active = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = (*active.config).clone();
        update(&mut next);
        let next = Arc::new(next);
        active.env = next.working_env.clone();
        active.config = Arc::clone(&next);
        next
    }
}
