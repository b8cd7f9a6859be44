//! Invocation surface consumed by the external HTTP facade
//!
//! Owns a registry pre-populated with the default stages and the end-to-end
//! pipeline. One-shot runs, snapshot streams and registry management all go
//! through this type.

use crate::config::FinsightConfig;
use crate::core::{PipelineState, Result};
use crate::db::{SchemaIntrospector, SqlExecutor};
use crate::llm::LanguageModel;
use crate::pipeline::Pipeline;
use crate::registry::{SubgraphDescriptor, SubgraphRegistry};
use crate::subgraph::{StageContext, Subgraph};
use futures::stream::Stream;
use std::sync::Arc;

/// Workflow service: pipeline plus subgraph management
pub struct WorkflowService {
    registry: Arc<SubgraphRegistry>,
    pipeline: Pipeline,
}

impl WorkflowService {
    /// Build the service, registering the default stages
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        executor: Arc<dyn SqlExecutor>,
        introspector: Arc<dyn SchemaIntrospector>,
        config: FinsightConfig,
    ) -> Result<Self> {
        let pipeline = Pipeline::new(llm, executor, introspector, config)?;
        let registry = Arc::new(SubgraphRegistry::new());
        for (name, handle) in pipeline.stages() {
            registry.register(name, handle);
        }
        tracing::info!(subgraphs = registry.len(), "workflow service initialized");
        Ok(Self { registry, pipeline })
    }

    /// Run the full pipeline for a question
    pub async fn run_pipeline(&self, query: &str) -> PipelineState {
        self.pipeline.run(query).await
    }

    /// Stream state snapshots for a question
    pub fn stream_pipeline(
        &self,
        query: &str,
    ) -> impl Stream<Item = PipelineState> + Send + 'static {
        self.pipeline.stream(query)
    }

    /// Run one registered subgraph against an input state
    pub async fn run_subgraph(&self, name: &str, state: PipelineState) -> Result<PipelineState> {
        self.registry.invoke(name, state, &StageContext::default()).await
    }

    /// Stream a registered subgraph's execution as a one-snapshot sequence
    pub fn stream_subgraph(
        &self,
        name: &str,
        state: PipelineState,
    ) -> impl Stream<Item = Result<PipelineState>> + Send + 'static {
        let registry = Arc::clone(&self.registry);
        let name = name.to_string();
        async_stream::stream! {
            yield registry.invoke(&name, state, &StageContext::default()).await;
        }
    }

    /// Register (or replace) a subgraph
    pub fn register_subgraph(
        &self,
        name: &str,
        handle: Arc<dyn Subgraph>,
    ) -> Arc<SubgraphDescriptor> {
        self.registry.register(name, handle)
    }

    /// Register a built-in stage kind under an additional name.
    ///
    /// Custom kinds carry their own compiled handle and go through
    /// [`register_subgraph`](Self::register_subgraph) instead.
    pub fn register_subgraph_kind(
        &self,
        name: &str,
        kind: crate::subgraph::SubgraphKind,
    ) -> Result<Arc<SubgraphDescriptor>> {
        let handle = self
            .pipeline
            .stages()
            .into_iter()
            .map(|(_, handle)| handle)
            .find(|handle| handle.kind() == kind)
            .ok_or_else(|| {
                crate::config_error!("kind '{}' has no built-in stage; register a handle", kind)
            })?;
        Ok(self.registry.register(name, handle))
    }

    /// Names of all registered subgraphs
    pub fn list_subgraphs(&self) -> Vec<String> {
        self.registry.list()
    }

    /// Look up a subgraph descriptor
    pub fn get_subgraph(&self, name: &str) -> Option<Arc<SubgraphDescriptor>> {
        self.registry.get(name)
    }

    /// Remove a subgraph, returning whether it existed
    pub fn remove_subgraph(&self, name: &str) -> bool {
        self.registry.remove(name)
    }

    /// The underlying registry, for advanced callers
    pub fn registry(&self) -> &SubgraphRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MockStore;
    use crate::llm::ScriptedLlm;

    fn service(responses: Vec<&str>) -> WorkflowService {
        let llm = Arc::new(ScriptedLlm::from_responses(responses));
        let store = Arc::new(MockStore::new("### schema"));
        WorkflowService::new(
            llm,
            store.clone() as Arc<dyn SqlExecutor>,
            store as Arc<dyn SchemaIntrospector>,
            FinsightConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_default_stages_are_registered() {
        let service = service(vec![]);
        assert_eq!(
            service.list_subgraphs(),
            vec![
                "fetch_data".to_string(),
                "generate_sql".to_string(),
                "split_query".to_string()
            ]
        );
        assert!(service.get_subgraph("split_query").is_some());
        assert!(service.get_subgraph("unknown").is_none());
    }

    #[tokio::test]
    async fn test_run_single_subgraph() {
        let service = service(vec!["[\"profit in january\"]"]);
        let state = service
            .run_subgraph("split_query", PipelineState::new("profit in january"))
            .await
            .unwrap();
        assert_eq!(state.plan, vec!["profit in january".to_string()]);
    }

    #[tokio::test]
    async fn test_register_builtin_kind_under_alias() {
        use crate::subgraph::SubgraphKind;

        let service = service(vec!["[\"profit in january\"]"]);
        service
            .register_subgraph_kind("decompose", SubgraphKind::SplitQuery)
            .unwrap();

        let state = service
            .run_subgraph("decompose", PipelineState::new("profit in january"))
            .await
            .unwrap();
        assert_eq!(state.plan.len(), 1);

        assert!(service
            .register_subgraph_kind("custom", SubgraphKind::Custom)
            .is_err());
    }

    #[tokio::test]
    async fn test_remove_then_run_is_not_found() {
        let service = service(vec![]);
        assert!(service.remove_subgraph("fetch_data"));
        assert!(service
            .run_subgraph("fetch_data", PipelineState::new("q"))
            .await
            .is_err());
    }
}
