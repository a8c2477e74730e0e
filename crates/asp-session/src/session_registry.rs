//! Pluggable construction of [`HarnessSession`]s, keyed by [`HarnessId`].
//!
//! Mirrors [`asp_harness_core::HarnessRegistry`]'s "registration-only, new
//! harnesses are additive" shape (spec §4.11/§4.12 design note), but for
//! *starting a session against a composed bundle* rather than *composing
//! the bundle*.

use crate::harness_session::HarnessSession;
use asp_error::AspError;
use asp_harness_core::{ComposedTargetBundle, HarnessId, RunOptions};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result alias for this module's fallible operations.
pub type Result<T> = std::result::Result<T, AspError>;

/// Constructs a [`HarnessSession`] for one harness, given its composed
/// bundle and resolved run options.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Which harness this factory starts sessions for.
    fn harness_id(&self) -> HarnessId;

    /// Build a not-yet-started session.
    async fn create_session(&self, bundle: &ComposedTargetBundle, run_options: &RunOptions) -> Result<Box<dyn HarnessSession>>;
}

/// Process-wide registry of [`SessionFactory`]s, keyed by [`HarnessId`].
#[derive(Default)]
pub struct SessionRegistry {
    factories: BTreeMap<HarnessId, Arc<dyn SessionFactory>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory`. Rejects duplicate ids.
    pub fn register(&mut self, factory: Arc<dyn SessionFactory>) -> Result<()> {
        let id = factory.harness_id();
        if self.factories.contains_key(&id) {
            return Err(AspError::new(asp_error::ErrorCode::Internal, format!("session factory for '{id}' is already registered")));
        }
        self.factories.insert(id, factory);
        Ok(())
    }

    /// Look up a registered factory.
    #[must_use]
    pub fn get(&self, id: HarnessId) -> Option<Arc<dyn SessionFactory>> {
        self.factories.get(&id).cloned()
    }
}
