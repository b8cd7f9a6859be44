//! Pipeline orchestrator
//!
//! Drives SplitQuery → (GenerateSql → FetchData)* → Report over the plan
//! index. The orchestrator owns the state for the whole invocation; stages
//! borrow it one at a time, so mutations are serialised. Streaming mode
//! yields a read-only snapshot after every completed stage and only advances
//! when the consumer polls, which makes abandonment free.

use crate::config::FinsightConfig;
use crate::core::{PipelineState, Result, StageOutcome};
use crate::db::{SchemaIntrospector, SqlExecutor};
use crate::llm::LanguageModel;
use crate::report::ReportGenerator;
use crate::subgraph::generate_sql::GenerateSqlOptions;
use crate::subgraph::{
    FetchDataStep, GenerateSqlStep, SplitQueryStep, StageContext, Subgraph,
};
use async_stream::stream;
use futures::stream::Stream;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ORCHESTRATOR: &str = "pipeline";

/// End-to-end workflow bound to one set of stage implementations
#[derive(Clone)]
pub struct Pipeline {
    split: Arc<dyn Subgraph>,
    generate: Arc<dyn Subgraph>,
    fetch: Arc<dyn Subgraph>,
    report: ReportGenerator,
    config: FinsightConfig,
}

impl Pipeline {
    /// Build the default stage chain against a model and a database pair
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        executor: Arc<dyn SqlExecutor>,
        introspector: Arc<dyn SchemaIntrospector>,
        config: FinsightConfig,
    ) -> Result<Self> {
        let split = Arc::new(SplitQueryStep::new(
            Arc::clone(&llm),
            config.pipeline.retry_budget_split,
            &config.pipeline.known_tables,
        )?);
        let generate = Arc::new(GenerateSqlStep::new(
            Arc::clone(&llm),
            introspector,
            GenerateSqlOptions {
                retry_budget: config.pipeline.retry_budget_sql,
                schema: config.pipeline.schema.clone(),
                max_fk_values: config.pipeline.max_fk_values,
            },
        )?);
        let fetch = Arc::new(FetchDataStep::new(executor, config.pipeline.max_cell_chars));
        let report = ReportGenerator::new(llm)?;

        Ok(Self {
            split,
            generate,
            fetch,
            report,
            config,
        })
    }

    /// Build from pre-constructed stages
    pub fn from_stages(
        split: Arc<dyn Subgraph>,
        generate: Arc<dyn Subgraph>,
        fetch: Arc<dyn Subgraph>,
        report: ReportGenerator,
        config: FinsightConfig,
    ) -> Self {
        Self {
            split,
            generate,
            fetch,
            report,
            config,
        }
    }

    /// The stages as registry-ready handles, in execution order
    pub fn stages(&self) -> [(&str, Arc<dyn Subgraph>); 3] {
        [
            ("split_query", Arc::clone(&self.split)),
            ("generate_sql", Arc::clone(&self.generate)),
            ("fetch_data", Arc::clone(&self.fetch)),
        ]
    }

    /// Run to completion, returning the terminal state
    pub async fn run(&self, query: &str) -> PipelineState {
        self.run_with_token(query, CancellationToken::new()).await
    }

    /// Run with an externally controlled cancellation token
    pub async fn run_with_token(&self, query: &str, cancel: CancellationToken) -> PipelineState {
        let ctx = self.context(cancel);
        let mut state = PipelineState::new(query);

        self.split_stage(&mut state, &ctx).await;
        if !self.observe_cancel(&mut state, &ctx) {
            self.plan_loop(&mut state, &ctx).await;
        }
        if !self.observe_cancel(&mut state, &ctx) && !state.has_fatal() {
            self.report.generate(&mut state).await;
        }

        tracing::info!(
            success = state.is_success(),
            steps = state.plan.len(),
            tokens = state.total_tokens(),
            "pipeline finished"
        );
        state
    }

    /// Stream state snapshots in stage-completion order.
    ///
    /// The sequence is lazy: nothing past the last yielded snapshot runs
    /// until the consumer polls again, and dropping the stream abandons the
    /// invocation.
    pub fn stream(&self, query: &str) -> impl Stream<Item = PipelineState> + Send + 'static {
        self.stream_with_token(query, CancellationToken::new())
    }

    /// Stream with an externally controlled cancellation token
    pub fn stream_with_token(
        &self,
        query: &str,
        cancel: CancellationToken,
    ) -> impl Stream<Item = PipelineState> + Send + 'static {
        let this = self.clone();
        let query = query.to_string();

        stream! {
            let ctx = this.context(cancel);
            let mut state = PipelineState::new(&query);

            this.split_stage(&mut state, &ctx).await;
            if this.observe_cancel(&mut state, &ctx) {
                return;
            }
            yield state.clone();

            if this.config.pipeline.parallel_plan_steps {
                this.plan_fan_out(&mut state, &ctx).await;
                if this.observe_cancel(&mut state, &ctx) {
                    return;
                }
                yield state.clone();
            } else {
                while state.current_plan_idx < state.plan.len() {
                    this.plan_step(&mut state, &ctx).await;
                    if this.observe_cancel(&mut state, &ctx) {
                        return;
                    }
                    yield state.clone();
                }
            }

            if !state.has_fatal() {
                this.report.generate(&mut state).await;
                yield state.clone();
            }
        }
    }

    fn context(&self, cancel: CancellationToken) -> StageContext {
        if let Some(deadline) = self.config.pipeline.deadline_s {
            let token = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs_f64(deadline)).await;
                token.cancel();
            });
        }
        StageContext::with_token(cancel)
    }

    /// Record cancellation once; returns whether the invocation should stop
    fn observe_cancel(&self, state: &mut PipelineState, ctx: &StageContext) -> bool {
        if !ctx.cancel.is_cancelled() {
            return false;
        }
        if !state.ends_cancelled() {
            state.push_history(ORCHESTRATOR, StageOutcome::Cancelled, "invocation cancelled");
        }
        true
    }

    async fn split_stage(&self, state: &mut PipelineState, ctx: &StageContext) {
        if let Err(e) = self.split.invoke(state, ctx).await {
            tracing::error!(error = %e, "split stage failed");
            state.push_history("split_query", StageOutcome::Fatal, e.to_string());
        }
    }

    async fn plan_loop(&self, state: &mut PipelineState, ctx: &StageContext) {
        if self.config.pipeline.parallel_plan_steps {
            self.plan_fan_out(state, ctx).await;
            return;
        }
        while state.current_plan_idx < state.plan.len() {
            self.plan_step(state, ctx).await;
            if self.observe_cancel(state, ctx) {
                return;
            }
        }
    }

    /// One plan item: generate, then fetch when a statement was accepted,
    /// then advance the index. A step that exhausted its budget is skipped.
    async fn plan_step(&self, state: &mut PipelineState, ctx: &StageContext) {
        let accepted_before = state.sql.len();

        if let Err(e) = self.generate.invoke(state, ctx).await {
            tracing::error!(error = %e, "generate stage failed");
            state.push_history("generate_sql", StageOutcome::Fatal, e.to_string());
            state.current_plan_idx = state.plan.len();
            return;
        }
        if ctx.cancel.is_cancelled() {
            return;
        }

        let accepted = state.sql.len() > accepted_before;
        if accepted {
            if let Err(e) = self.fetch.invoke(state, ctx).await {
                tracing::error!(error = %e, "fetch stage failed");
                state.push_history("fetch_data", StageOutcome::Fatal, e.to_string());
                state.current_plan_idx = state.plan.len();
                return;
            }
        } else {
            tracing::warn!(
                step = state.current_plan_idx,
                "plan step failed, skipping to the next item"
            );
        }

        if !ctx.cancel.is_cancelled() {
            state.current_plan_idx += 1;
        }
    }

    /// Dispatch all plan items concurrently on isolated substates and merge
    /// the results in plan order, preserving `raw_data[i] == sql[i]`.
    async fn plan_fan_out(&self, state: &mut PipelineState, ctx: &StageContext) {
        let items: Vec<(usize, String)> =
            state.plan.iter().cloned().enumerate().collect();

        let futures = items.into_iter().map(|(index, item)| {
            let mut sub = PipelineState::new(&state.query);
            sub.plan = vec![item];
            sub.db_struc = state.db_struc.clone();
            let this = self.clone();
            let ctx = ctx.clone();
            async move {
                this.plan_step(&mut sub, &ctx).await;
                (index, sub)
            }
        });

        let mut substates = join_all(futures).await;
        substates.sort_by_key(|(index, _)| *index);

        for (_, sub) in substates {
            if state.db_struc.is_none() {
                state.db_struc = sub.db_struc.clone();
            }
            let offset = state.sql.len();
            for sql in sub.sql {
                state.sql.push(sql);
            }
            for mut block in sub.raw_data {
                block.sql_index += offset;
                state.raw_data.push(block);
            }
            state.history.extend(sub.history);
            if sub.sql_error.is_some() {
                state.sql_error = sub.sql_error;
            }
        }

        // Re-render the summary over the merged blocks through the fetch
        // stage (no statements are pending, so this is render-only).
        state.current_plan_idx = state.plan.len();
        if let Err(e) = self.fetch.invoke(state, ctx).await {
            state.push_history("fetch_data", StageOutcome::Fatal, e.to_string());
        }
    }
}
