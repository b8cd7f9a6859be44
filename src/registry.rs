//! Subgraph registry
//!
//! Process-wide mapping from name to compiled stage. Re-registering a name
//! replaces the entry and drops the old handle; `get` and `invoke` clone the
//! shared handle out of the map, so no lock is held across an await.

use crate::core::{FinsightError, PipelineState, Result};
use crate::subgraph::{StageContext, Subgraph, SubgraphKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// Registered stage entry
#[derive(Clone)]
pub struct SubgraphDescriptor {
    /// Name the stage is registered under
    pub name: String,
    /// Stage kind
    pub kind: SubgraphKind,
    /// Compiled handle
    pub handle: Arc<dyn Subgraph>,
    /// Configuration payload the stage was registered with
    pub config: serde_json::Value,
}

impl std::fmt::Debug for SubgraphDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubgraphDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("config", &self.config)
            .finish()
    }
}

/// Named registration, lookup, replacement and uniform invocation of stages
#[derive(Default)]
pub struct SubgraphRegistry {
    entries: Mutex<HashMap<String, Arc<SubgraphDescriptor>>>,
}

static GLOBAL: OnceLock<SubgraphRegistry> = OnceLock::new();

impl SubgraphRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> &'static SubgraphRegistry {
        GLOBAL.get_or_init(SubgraphRegistry::new)
    }

    /// Register a stage under a name, replacing any previous entry
    pub fn register(&self, name: &str, handle: Arc<dyn Subgraph>) -> Arc<SubgraphDescriptor> {
        self.register_with_config(name, handle, serde_json::Value::Null)
    }

    /// Register a stage along with the configuration it was built from
    pub fn register_with_config(
        &self,
        name: &str,
        handle: Arc<dyn Subgraph>,
        config: serde_json::Value,
    ) -> Arc<SubgraphDescriptor> {
        let descriptor = Arc::new(SubgraphDescriptor {
            name: name.to_string(),
            kind: handle.kind(),
            handle,
            config,
        });
        let previous = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), Arc::clone(&descriptor));
        if previous.is_some() {
            tracing::info!(name, "subgraph replaced");
        } else {
            tracing::info!(name, "subgraph registered");
        }
        descriptor
    }

    /// Alias of [`register`](Self::register) that reads better at call sites
    /// swapping an existing stage
    pub fn replace(&self, name: &str, handle: Arc<dyn Subgraph>) -> Arc<SubgraphDescriptor> {
        self.register(name, handle)
    }

    /// Look up a stage
    pub fn get(&self, name: &str) -> Option<Arc<SubgraphDescriptor>> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Remove a stage, returning whether it existed
    pub fn remove(&self, name: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some()
    }

    /// Registered names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Number of registered stages
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the registry has no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Invoke a stage by name regardless of kind
    pub async fn invoke(
        &self,
        name: &str,
        mut state: PipelineState,
        ctx: &StageContext,
    ) -> Result<PipelineState> {
        let descriptor = self.get(name).ok_or_else(|| FinsightError::NotFound {
            resource: "subgraph".to_string(),
            id: name.to_string(),
        })?;
        descriptor.handle.invoke(&mut state, ctx).await?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageOutcome;
    use async_trait::async_trait;

    struct StampStage {
        label: &'static str,
    }

    #[async_trait]
    impl Subgraph for StampStage {
        async fn invoke(&self, state: &mut PipelineState, _ctx: &StageContext) -> Result<()> {
            state.push_history(self.label, StageOutcome::Ok, "stamped");
            Ok(())
        }

        fn name(&self) -> &str {
            self.label
        }

        fn kind(&self) -> SubgraphKind {
            SubgraphKind::Custom
        }
    }

    #[tokio::test]
    async fn test_register_lookup_invoke() {
        let registry = SubgraphRegistry::new();
        registry.register("stamp", Arc::new(StampStage { label: "stamp" }));

        assert_eq!(registry.list(), vec!["stamp".to_string()]);
        assert_eq!(registry.get("stamp").unwrap().kind, SubgraphKind::Custom);

        let state = registry
            .invoke("stamp", PipelineState::new("q"), &StageContext::default())
            .await
            .unwrap();
        assert_eq!(state.history[0].stage, "stamp");
    }

    #[tokio::test]
    async fn test_invoke_unknown_name_is_not_found() {
        let registry = SubgraphRegistry::new();
        let err = registry
            .invoke("missing", PipelineState::new("q"), &StageContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FinsightError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_reregister_after_remove_behaves_fresh() {
        let registry = SubgraphRegistry::new();
        registry.register("s", Arc::new(StampStage { label: "first" }));
        assert!(registry.remove("s"));
        assert!(!registry.remove("s"));
        registry.register("s", Arc::new(StampStage { label: "second" }));

        let state = registry
            .invoke("s", PipelineState::new("q"), &StageContext::default())
            .await
            .unwrap();
        assert_eq!(state.history[0].stage, "second");
    }

    #[test]
    fn test_replace_swaps_entry() {
        let registry = SubgraphRegistry::new();
        registry.register("s", Arc::new(StampStage { label: "first" }));
        registry.replace("s", Arc::new(StampStage { label: "second" }));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("s").unwrap().handle.name(), "second");
    }

    #[test]
    fn test_clear_empties_registry() {
        let registry = SubgraphRegistry::new();
        registry.register("a", Arc::new(StampStage { label: "a" }));
        registry.register("b", Arc::new(StampStage { label: "b" }));
        assert_eq!(registry.len(), 2);
        registry.clear();
        assert!(registry.is_empty());
    }
}
