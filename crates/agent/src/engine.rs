//! The orchestration engine.
//!
//! One run is one pass through the state machine:
//!
//! ```text
//! GATE ──hit──────────────────────────────► DONE
//!   │                                         ▲
//!   └─miss─► REASON ──no requests / cap hit───┘
//!              ▲  │
//!              │  └─requests─► ACT
//!              └──────────────┘
//! ```
//!
//! The step counter moves once per REASON. Past the soft threshold a
//! convergence warning is appended before reasoning; at the hard cap the
//! reasoning response is terminal whatever it asks for. Collaborator
//! failures degrade the run, never abort it. Only configuration errors
//! (before the run) and cancellation reach the caller as `Err`.

use crate::artifacts::ArtifactTracker;
use crate::budget::StepBudget;
use crate::dispatcher::{Dispatched, Dispatcher};
use crate::distiller::{Distiller, truncate_chars};
use crate::gate::CacheGate;
use crate::policy::ReasoningPolicy;
use chrono::Utc;
use quarry_config::{AppConfig, EngineConfig};
use quarry_core::error::{Error, Result};
use quarry_core::event::{DomainEvent, EventBus};
use quarry_core::memory::{ConversationStore, KnowledgeStore, SimilarityCache};
use quarry_core::message::{Message, ORIGIN_HISTORY, Role};
use quarry_core::provider::Provider;
use quarry_core::retry::RetryPolicy;
use quarry_core::run::{FALLBACK_ANSWER, RunResult, Termination};
use quarry_core::tool::{CapabilityRegistry, InvocationContext};
use quarry_memory::NoopConversations;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest excerpt of a single prior message kept in the history summary.
const HISTORY_EXCERPT_CHARS: usize = 1_000;

/// How the REASON/ACT loop ended.
struct LoopOutcome {
    answer: String,
    steps: u32,
    dispatches: usize,
    termination: Termination,
    /// Whether the answer came from the policy and may be cached
    cacheable: bool,
}

impl LoopOutcome {
    fn fallback(steps: u32, dispatches: usize, termination: Termination) -> Self {
        Self {
            answer: FALLBACK_ANSWER.to_string(),
            steps,
            dispatches,
            termination,
            cacheable: false,
        }
    }
}

/// The orchestration engine. Owns its collaborators; shared across runs.
pub struct Engine {
    policy: ReasoningPolicy,
    gate: CacheGate,
    dispatcher: Dispatcher,
    conversations: Arc<dyn ConversationStore>,
    artifacts: Option<ArtifactTracker>,
    event_bus: Arc<EventBus>,
    limits: EngineConfig,
}

impl Engine {
    /// Create an engine around a reasoning-policy provider and a capability
    /// registry. The same provider distills bulk observations until
    /// [`with_distiller`](Self::with_distiller) says otherwise.
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<CapabilityRegistry>,
        model: impl Into<String>,
    ) -> Self {
        let model = model.into();
        let limits = EngineConfig::default();
        let distiller = Distiller::new(provider.clone(), model.clone());

        Self {
            policy: ReasoningPolicy::new(provider, model, registry.definitions())
                .with_window(limits.context_window),
            gate: CacheGate::new(limits.cache_threshold, limits.retrieval_top_k),
            dispatcher: Dispatcher::new(registry).with_distiller(Arc::new(distiller)),
            conversations: Arc::new(NoopConversations),
            artifacts: None,
            event_bus: Arc::new(EventBus::default()),
            limits,
        }
    }

    /// Assemble an engine from configuration.
    ///
    /// Fails with a configuration error (missing API key, invalid limits)
    /// before any run can start. Stores default to no-ops; attach them with
    /// the `with_*` methods.
    pub fn from_config(config: &AppConfig, registry: Arc<CapabilityRegistry>) -> Result<Self> {
        config.validate().map_err(|e| Error::config(e.to_string()))?;
        let providers = quarry_providers::build_from_config(config)?;
        let distiller = Distiller::from_config(
            providers.distiller,
            config.distiller_model(),
            &config.distiller,
        );
        let caps = &config.capabilities;

        Ok(Self::new(providers.policy, registry, &config.model)
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
            .with_limits(&config.engine)
            .with_distiller(distiller)
            .with_capability_retry(config.governor.retry_policy())
            .with_capability_timeout(config.governor.capability_timeout())
            .with_artifacts(ArtifactTracker::new(
                caps.artifacts_path(),
                caps.artifact_extensions.clone(),
            )))
    }

    /// Apply step budget, context window and gate settings.
    pub fn with_limits(mut self, limits: &EngineConfig) -> Self {
        self.policy = self.policy.with_window(limits.context_window);
        self.gate = self
            .gate
            .with_threshold(limits.cache_threshold)
            .with_top_k(limits.retrieval_top_k);
        self.limits = limits.clone();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.policy = self.policy.with_temperature(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.policy = self.policy.with_max_tokens(max_tokens);
        self
    }

    /// Replace the standing instruction sent ahead of every REASON call.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.policy = self.policy.with_instruction(instruction);
        self
    }

    pub fn with_distiller(mut self, distiller: Distiller) -> Self {
        self.dispatcher = self.dispatcher.with_distiller(Arc::new(distiller));
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn SimilarityCache>) -> Self {
        self.gate = self.gate.with_cache(cache);
        self
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeStore>) -> Self {
        self.gate = self.gate.with_knowledge(knowledge);
        self
    }

    pub fn with_conversations(mut self, conversations: Arc<dyn ConversationStore>) -> Self {
        self.conversations = conversations;
        self
    }

    pub fn with_artifacts(mut self, tracker: ArtifactTracker) -> Self {
        self.artifacts = Some(tracker);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn with_capability_retry(mut self, retry: RetryPolicy) -> Self {
        self.dispatcher = self.dispatcher.with_retry(retry);
        self
    }

    pub fn with_capability_timeout(mut self, timeout: Duration) -> Self {
        self.dispatcher = self.dispatcher.with_timeout(timeout);
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn limits(&self) -> &EngineConfig {
        &self.limits
    }

    /// Run one query to completion.
    pub async fn run(&self, query: &str, thread_id: &str, user_scope: &str) -> Result<RunResult> {
        self.run_with_cancel(query, thread_id, user_scope, CancellationToken::new())
            .await
    }

    /// Run one query, stopping promptly once `cancel` fires.
    ///
    /// A cancelled run returns [`Error::Cancelled`] and persists nothing.
    pub async fn run_with_cancel(
        &self,
        query: &str,
        thread_id: &str,
        user_scope: &str,
        cancel: CancellationToken,
    ) -> Result<RunResult> {
        info!(thread_id, user_scope, "Run started");
        self.event_bus.publish(DomainEvent::RunStarted {
            thread_id: thread_id.to_string(),
            user_scope: user_scope.to_string(),
            timestamp: Utc::now(),
        });

        let before = match &self.artifacts {
            Some(tracker) => Some(tracker.snapshot().await),
            None => None,
        };
        let prior = self.load_history(thread_id, user_scope).await;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // GATE
        let gate = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            outcome = self.gate.check(query, user_scope) => outcome,
        };
        for (collaborator, error) in &gate.degraded {
            self.degraded(collaborator, error);
        }

        let mut history = vec![Message::user(query)];
        if let Some(summary) = fold_history(&prior, self.limits.history_messages) {
            history.push(summary);
        }
        let hit = gate.hit.filter(|(_, sentinel)| sentinel.is_cache_hit());
        if let Some(documents) = gate.documents {
            history.push(documents);
        }

        let outcome = match hit {
            Some((score, sentinel)) => {
                info!(thread_id, score, "Cache hit, skipping reasoning");
                self.event_bus.publish(DomainEvent::CacheHit {
                    thread_id: thread_id.to_string(),
                    score,
                    timestamp: Utc::now(),
                });
                let answer = sentinel.content.clone();
                history.push(sentinel);
                LoopOutcome {
                    answer,
                    steps: 0,
                    dispatches: 0,
                    termination: Termination::CacheHit,
                    cacheable: false,
                }
            }
            None => {
                let ctx = InvocationContext::new(user_scope, query);
                self.reason_and_act(&mut history, thread_id, &ctx, &cancel)
                    .await?
            }
        };

        // DONE
        if outcome.cacheable
            && let Err(e) = self
                .gate
                .cache()
                .upsert(query, &outcome.answer, user_scope)
                .await
        {
            self.degraded(self.gate.cache().name(), &e);
        }

        let mut thread = prior;
        thread.extend(history);
        if let Err(e) = self.conversations.save(thread_id, user_scope, &thread).await {
            self.degraded(self.conversations.name(), &e);
        }

        let artifacts = match (&self.artifacts, &before) {
            (Some(tracker), Some(before)) => tracker.new_since(before).await,
            _ => Vec::new(),
        };

        info!(
            thread_id,
            steps = outcome.steps,
            dispatches = outcome.dispatches,
            termination = %outcome.termination,
            artifacts = artifacts.len(),
            "Run completed"
        );
        self.event_bus.publish(DomainEvent::RunCompleted {
            thread_id: thread_id.to_string(),
            steps: outcome.steps,
            dispatches: outcome.dispatches,
            termination: outcome.termination.to_string(),
            timestamp: Utc::now(),
        });

        Ok(RunResult {
            answer: outcome.answer,
            artifacts,
            steps: outcome.steps,
            dispatches: outcome.dispatches,
            termination: outcome.termination,
        })
    }

    /// The REASON/ACT cycle, from the first REASON to DONE.
    async fn reason_and_act(
        &self,
        history: &mut Vec<Message>,
        thread_id: &str,
        ctx: &InvocationContext,
        cancel: &CancellationToken,
    ) -> Result<LoopOutcome> {
        let mut budget = StepBudget::from_config(&self.limits);
        let max_failures = self.limits.max_consecutive_policy_failures.max(1);
        let mut dispatches = 0;
        let mut failures = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            // REASON
            if budget.needs_warning() {
                debug!(
                    thread_id,
                    step = budget.steps(),
                    remaining = budget.remaining(),
                    "Injecting convergence warning"
                );
                history.push(budget.warning());
            }

            let step = budget.record_step();
            let reply = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                reply = self.policy.invoke(history) => reply,
            };

            let message = match reply {
                Ok(message) => {
                    failures = 0;
                    message
                }
                Err(e) => {
                    failures += 1;
                    warn!(thread_id, step, failures, error = %e, "Reasoning step failed");
                    self.degraded("reasoning_policy", &e);

                    if failures >= max_failures {
                        return Ok(LoopOutcome::fallback(step, dispatches, Termination::PolicyFailure));
                    }
                    if budget.exhausted() {
                        return Ok(LoopOutcome {
                            answer: last_answer(history, ""),
                            steps: step,
                            dispatches,
                            termination: Termination::BudgetExhausted,
                            cacheable: false,
                        });
                    }
                    history.push(Message::system(format!(
                        "The previous reasoning step failed ({e}). \
                         Continue with the information already gathered."
                    )));
                    continue;
                }
            };

            let requested = message.requests.len();
            debug!(thread_id, step, requested, "Reasoning step");
            self.event_bus.publish(DomainEvent::ReasoningStep {
                thread_id: thread_id.to_string(),
                step,
                requested,
                timestamp: Utc::now(),
            });

            if !message.has_requests() {
                let answer = message.content.clone();
                history.push(message);
                if answer.trim().is_empty() {
                    warn!(thread_id, step, "Reasoning policy returned an empty answer");
                    return Ok(LoopOutcome::fallback(step, dispatches, Termination::Answered));
                }
                return Ok(LoopOutcome {
                    answer,
                    steps: step,
                    dispatches,
                    termination: Termination::Answered,
                    cacheable: true,
                });
            }

            if budget.exhausted() {
                warn!(thread_id, step, requested, "Step cap reached, forcing final answer");
                let answer = last_answer(history, &message.content);
                history.push(message.without_requests());
                return Ok(LoopOutcome {
                    answer,
                    steps: step,
                    dispatches,
                    termination: Termination::BudgetExhausted,
                    cacheable: false,
                });
            }

            // ACT
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let requests = message.requests.clone();
            history.push(message);

            let results = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                results = self.dispatcher.dispatch_all(&requests, ctx) => results,
            };
            dispatches += results.len();
            for dispatched in results {
                self.record_dispatch(thread_id, &dispatched);
                history.push(dispatched.observation);
            }
        }
    }

    fn record_dispatch(&self, thread_id: &str, dispatched: &Dispatched) {
        self.event_bus.publish(DomainEvent::CapabilityDispatched {
            thread_id: thread_id.to_string(),
            capability: dispatched.capability.clone(),
            success: dispatched.success,
            duration_ms: dispatched.duration_ms,
            timestamp: Utc::now(),
        });
        if let Some((raw_chars, distilled_chars)) = dispatched.distilled {
            info!(
                capability = %dispatched.capability,
                raw_chars,
                distilled_chars,
                "Observation distilled"
            );
            self.event_bus.publish(DomainEvent::ObservationDistilled {
                capability: dispatched.capability.clone(),
                raw_chars,
                distilled_chars,
                timestamp: Utc::now(),
            });
        }
    }

    async fn load_history(&self, thread_id: &str, user_scope: &str) -> Vec<Message> {
        match self.conversations.load(thread_id, user_scope).await {
            Ok(messages) => {
                if !messages.is_empty() {
                    debug!(thread_id, count = messages.len(), "Loaded thread history");
                }
                messages
            }
            Err(e) => {
                self.degraded(self.conversations.name(), &e);
                Vec::new()
            }
        }
    }

    fn degraded(&self, collaborator: &str, error: &dyn Display) {
        warn!(collaborator, error = %error, "Collaborator degraded, continuing without it");
        self.event_bus.publish(DomainEvent::CollaboratorDegraded {
            collaborator: collaborator.to_string(),
            error_message: error.to_string(),
            timestamp: Utc::now(),
        });
    }
}

/// Fold the most recent prior user/assistant turns into one system message.
fn fold_history(prior: &[Message], limit: usize) -> Option<Message> {
    let turns: Vec<&Message> = prior
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .filter(|m| !m.content.trim().is_empty())
        .collect();
    if turns.is_empty() || limit == 0 {
        return None;
    }

    let recent = &turns[turns.len().saturating_sub(limit)..];
    let lines = recent
        .iter()
        .map(|m| {
            let speaker = if m.role == Role::User { "User" } else { "Assistant" };
            format!("{speaker}: {}", truncate_chars(m.content.trim(), HISTORY_EXCERPT_CHARS))
        })
        .collect::<Vec<_>>()
        .join("\n");

    Some(
        Message::system(format!("Earlier in this conversation:\n{lines}")).with_origin(ORIGIN_HISTORY),
    )
}

/// The answer to report when the loop stops without a clean final reply.
fn last_answer(history: &[Message], candidate: &str) -> String {
    if !candidate.trim().is_empty() {
        return candidate.to_string();
    }
    history
        .iter()
        .skip(1)
        .rev()
        .find(|m| m.role == Role::Assistant && !m.content.trim().is_empty())
        .map(|m| m.content.clone())
        .unwrap_or_else(|| FALLBACK_ANSWER.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        FixedCapability, SequentialMockProvider, make_request, make_request_response, make_text_response,
    };
    use async_trait::async_trait;
    use quarry_core::error::{ProviderError, StoreError, ToolError};
    use quarry_core::tool::Capability;
    use std::sync::atomic::AtomicUsize;
    use quarry_core::memory::CacheMatch;
    use quarry_core::message::{ORIGIN_BUDGET, ORIGIN_CACHE};
    use quarry_memory::{InMemoryCache, InMemoryConversations};
    use std::sync::atomic::Ordering;

    fn registry() -> Arc<CapabilityRegistry> {
        let mut registry = CapabilityRegistry::new();
        registry.register(Box::new(FixedCapability::new("web_search", "snippet")));
        Arc::new(registry)
    }

    fn engine(provider: Arc<SequentialMockProvider>) -> Engine {
        Engine::new(provider, registry(), "mock-model").with_capability_retry(RetryPolicy::none())
    }

    struct HitCache;

    #[async_trait]
    impl SimilarityCache for HitCache {
        fn name(&self) -> &str {
            "hit"
        }
        async fn query(&self, _: &str, _: &str, _: usize) -> std::result::Result<Vec<CacheMatch>, StoreError> {
            Ok(vec![CacheMatch {
                score: 0.97,
                answer: "cached report".into(),
            }])
        }
        async fn upsert(&self, _: &str, _: &str, _: &str) -> std::result::Result<(), StoreError> {
            panic!("cache hits must not be written back");
        }
    }

    struct BrokenConversations;

    #[async_trait]
    impl ConversationStore for BrokenConversations {
        fn name(&self) -> &str {
            "broken"
        }
        async fn load(&self, _: &str, _: &str) -> std::result::Result<Vec<Message>, StoreError> {
            Err(StoreError::Unavailable("disk gone".into()))
        }
        async fn save(&self, _: &str, _: &str, _: &[Message]) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("disk gone".into()))
        }
    }

    #[tokio::test]
    async fn cache_hit_skips_reasoning() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let conversations = Arc::new(InMemoryConversations::new());
        let engine = engine(provider.clone())
            .with_cache(Arc::new(HitCache))
            .with_conversations(conversations.clone());

        let result = engine.run("samsung revenue", "t1", "alice").await.unwrap();
        assert_eq!(result.answer, "cached report");
        assert_eq!(result.termination, Termination::CacheHit);
        assert!(result.from_cache());
        assert_eq!(result.steps, 0);
        assert_eq!(provider.call_count(), 0);

        let saved = conversations.load("t1", "alice").await.unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1].origin(), Some(ORIGIN_CACHE));
    }

    #[tokio::test]
    async fn answered_run_writes_back_to_cache() {
        let cache = Arc::new(InMemoryCache::new());
        let provider = Arc::new(SequentialMockProvider::new(vec![make_text_response("4")]));
        let engine = engine(provider).with_cache(cache.clone());

        let result = engine.run("what is 2+2", "t1", "alice").await.unwrap();
        assert_eq!(result.termination, Termination::Answered);

        let hits = cache.query("what is 2+2", "alice", 1).await.unwrap();
        assert_eq!(hits[0].answer, "4");
        assert!(cache.query("what is 2+2", "bob", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn prior_thread_is_folded_and_saved() {
        let conversations = Arc::new(InMemoryConversations::new());
        conversations
            .save(
                "t1",
                "alice",
                &[Message::user("samsung revenue 2023"), Message::assistant("259T won")],
            )
            .await
            .unwrap();

        let provider = Arc::new(SequentialMockProvider::new(vec![make_text_response("up 16%")]));
        let engine = engine(provider.clone()).with_conversations(conversations.clone());
        engine.run("and 2022?", "t1", "alice").await.unwrap();

        let sent = &provider.requests()[0].messages;
        assert_eq!(sent[1].content, "and 2022?");
        assert_eq!(sent[2].origin(), Some(ORIGIN_HISTORY));
        assert!(sent[2].content.contains("Assistant: 259T won"));

        let saved = conversations.load("t1", "alice").await.unwrap();
        assert_eq!(saved[0].content, "samsung revenue 2023");
        assert_eq!(saved.last().unwrap().content, "up 16%");
    }

    #[tokio::test]
    async fn store_failures_degrade() {
        let bus = Arc::new(EventBus::default());
        let mut events = bus.subscribe();
        let provider = Arc::new(SequentialMockProvider::new(vec![make_text_response("fine")]));
        let engine = engine(provider)
            .with_conversations(Arc::new(BrokenConversations))
            .with_event_bus(bus);

        let result = engine.run("q", "t1", "alice").await.unwrap();
        assert_eq!(result.answer, "fine");

        let mut degraded = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event.as_ref(), DomainEvent::CollaboratorDegraded { .. }) {
                degraded += 1;
            }
        }
        assert_eq!(degraded, 2);
    }

    #[tokio::test]
    async fn warning_precedes_reasoning_past_soft_threshold() {
        let limits = EngineConfig {
            soft_step_threshold: 1,
            hard_step_cap: 4,
            ..EngineConfig::default()
        };
        let search = || make_request_response(vec![make_request("web_search", serde_json::json!({}))], "");
        let provider = Arc::new(SequentialMockProvider::new(vec![
            search(),
            search(),
            make_text_response("done"),
        ]));
        let engine = engine(provider.clone()).with_limits(&limits);

        let result = engine.run("q", "t1", "alice").await.unwrap();
        assert_eq!(result.steps, 3);

        let requests = provider.requests();
        let warned = |i: usize| {
            requests[i]
                .messages
                .iter()
                .any(|m| m.origin() == Some(ORIGIN_BUDGET))
        };
        assert!(!warned(0));
        assert!(!warned(1));
        assert!(warned(2));
        let last = requests[2].messages.last().unwrap();
        assert!(last.content.contains("only 2 steps left"));
    }

    #[tokio::test]
    async fn single_policy_failure_is_adapted_to() {
        let provider = Arc::new(SequentialMockProvider::scripted(vec![
            Err(ProviderError::Timeout("60s".into())),
            Ok(make_text_response("recovered")),
        ]));
        let result = engine(provider.clone()).run("q", "t1", "alice").await.unwrap();
        assert_eq!(result.answer, "recovered");
        assert_eq!(result.steps, 2);

        let second = &provider.requests()[1].messages;
        assert!(second.last().unwrap().content.contains("previous reasoning step failed"));
    }

    #[tokio::test]
    async fn repeated_policy_failures_end_the_run() {
        let cache = Arc::new(InMemoryCache::new());
        let provider = Arc::new(SequentialMockProvider::scripted(vec![
            Err(ProviderError::Network("down".into())),
            Err(ProviderError::Network("down".into())),
        ]));
        let result = engine(provider)
            .with_cache(cache.clone())
            .run("q", "t1", "alice")
            .await
            .unwrap();

        assert_eq!(result.termination, Termination::PolicyFailure);
        assert_eq!(result.answer, FALLBACK_ANSWER);
        assert!(cache.query("q", "alice", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_answer_uses_fallback_and_is_not_cached() {
        let cache = Arc::new(InMemoryCache::new());
        let provider = Arc::new(SequentialMockProvider::new(vec![make_text_response("")]));
        let result = engine(provider)
            .with_cache(cache.clone())
            .run("q", "t1", "alice")
            .await
            .unwrap();
        assert_eq!(result.answer, FALLBACK_ANSWER);
        assert!(cache.query("q", "alice", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_run_stops_before_reasoning() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine(provider.clone())
            .run_with_cancel("q", "t1", "alice", cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(provider.call_count(), 0);
    }

    /// Counts starts and finishes, sleeping in between.
    struct SlowCapability {
        started: Arc<AtomicUsize>,
        finished: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Capability for SlowCapability {
        fn name(&self) -> &str {
            "slow_search"
        }
        fn description(&self) -> &str {
            "Takes a while"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn invoke(
            &self,
            _arguments: serde_json::Value,
            _ctx: &InvocationContext,
        ) -> std::result::Result<String, ToolError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(10)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok("slow result".into())
        }
    }

    /// Fires the run's token from inside ACT, then answers at once.
    struct CancellingCapability {
        cancel: CancellationToken,
    }

    #[async_trait]
    impl Capability for CancellingCapability {
        fn name(&self) -> &str {
            "web_search"
        }
        fn description(&self) -> &str {
            "Cancels the run"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn invoke(
            &self,
            _arguments: serde_json::Value,
            _ctx: &InvocationContext,
        ) -> std::result::Result<String, ToolError> {
            self.cancel.cancel();
            Ok("snippet".into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_act_abandons_dispatch() {
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let mut registry = CapabilityRegistry::new();
        registry.register(Box::new(SlowCapability {
            started: started.clone(),
            finished: finished.clone(),
        }));

        let provider = Arc::new(SequentialMockProvider::new(vec![make_request_response(
            vec![make_request("slow_search", serde_json::json!({}))],
            "",
        )]));
        let cache = Arc::new(InMemoryCache::new());
        let conversations = Arc::new(InMemoryConversations::new());
        let engine = Engine::new(provider.clone(), Arc::new(registry), "mock-model")
            .with_capability_retry(RetryPolicy::none())
            .with_cache(cache.clone())
            .with_conversations(conversations.clone());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = engine
            .run_with_cancel("q", "t1", "alice", cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(provider.call_count(), 1);
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert!(conversations.load("t1", "alice").await.unwrap().is_empty());
        assert!(cache.query("q", "alice", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_after_act_skips_next_reasoning_step() {
        let cancel = CancellationToken::new();
        let mut registry = CapabilityRegistry::new();
        registry.register(Box::new(CancellingCapability {
            cancel: cancel.clone(),
        }));

        let provider = Arc::new(SequentialMockProvider::new(vec![make_request_response(
            vec![make_request("web_search", serde_json::json!({}))],
            "",
        )]));
        let conversations = Arc::new(InMemoryConversations::new());
        let engine = Engine::new(provider.clone(), Arc::new(registry), "mock-model")
            .with_conversations(conversations.clone());

        let err = engine
            .run_with_cancel("q", "t1", "alice", cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(provider.call_count(), 1);
        assert!(conversations.load("t1", "alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dispatch_events_are_published() {
        let bus = Arc::new(EventBus::default());
        let mut events = bus.subscribe();
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_request_response(vec![make_request("web_search", serde_json::json!({}))], ""),
            make_text_response("done"),
        ]));
        let cap = FixedCapability::new("web_search", "snippet");
        let counter = cap.counter();
        let mut registry = CapabilityRegistry::new();
        registry.register(Box::new(cap));

        let engine = Engine::new(provider, Arc::new(registry), "mock-model").with_event_bus(bus);
        let result = engine.run("q", "t1", "alice").await.unwrap();
        assert_eq!(result.dispatches, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(match event.as_ref() {
                DomainEvent::RunStarted { .. } => "started",
                DomainEvent::ReasoningStep { .. } => "step",
                DomainEvent::CapabilityDispatched { success, .. } => {
                    assert!(success);
                    "dispatched"
                }
                DomainEvent::RunCompleted { termination, .. } => {
                    assert_eq!(termination, "answered");
                    "completed"
                }
                _ => "other",
            });
        }
        assert_eq!(kinds, vec!["started", "step", "dispatched", "step", "completed"]);
    }

    #[test]
    fn history_folding_keeps_recent_turns() {
        let prior = vec![
            Message::user("one"),
            Message::assistant("two"),
            Message::observation("c1", "tool noise"),
            Message::user("three"),
            Message::assistant(""),
        ];
        let folded = fold_history(&prior, 2).unwrap();
        assert_eq!(folded.content, "Earlier in this conversation:\nAssistant: two\nUser: three");
        assert!(fold_history(&prior, 0).is_none());
        assert!(fold_history(&[], 6).is_none());
    }

    #[test]
    fn last_answer_prefers_candidate_then_history() {
        let history = vec![
            Message::user("q"),
            Message::assistant("partial findings"),
            Message::observation("c1", "obs"),
        ];
        assert_eq!(last_answer(&history, "final"), "final");
        assert_eq!(last_answer(&history, " "), "partial findings");
        assert_eq!(last_answer(&history[..1], ""), FALLBACK_ANSWER);
    }
}
