//! Capability dispatcher.
//!
//! Turns each capability request from a REASON step into exactly one
//! observation message, tagged with the request's correlation id. Unknown
//! names, malformed arguments and failed invocations all become error
//! observations; the loop keeps going so the policy can correct itself.
//! Bulk results over the size criterion are distilled before they are
//! returned.

use crate::distiller::Distiller;
use futures::future::join_all;
use quarry_core::error::ToolError;
use quarry_core::message::{CapabilityRequest, Message};
use quarry_core::retry::RetryPolicy;
use quarry_core::tool::{CapabilityRegistry, InvocationContext};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of dispatching one request.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub capability: String,

    /// The observation appended to history
    pub observation: Message,

    pub success: bool,

    pub duration_ms: u64,

    /// Raw and distilled character counts, when distillation ran
    pub distilled: Option<(usize, usize)>,
}

pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    distiller: Option<Arc<Distiller>>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            distiller: None,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_distiller(mut self, distiller: Arc<Distiller>) -> Self {
        self.distiller = Some(distiller);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Time limit for a single capability attempt.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Dispatch all requests of one turn concurrently.
    ///
    /// The returned observations are in request order regardless of which
    /// capability finishes first.
    pub async fn dispatch_all(
        &self,
        requests: &[CapabilityRequest],
        ctx: &InvocationContext,
    ) -> Vec<Dispatched> {
        join_all(requests.iter().map(|r| self.dispatch(r, ctx))).await
    }

    /// Dispatch one request and produce its observation.
    pub async fn dispatch(&self, request: &CapabilityRequest, ctx: &InvocationContext) -> Dispatched {
        let start = Instant::now();
        let result = self.invoke(request, ctx).await;

        let (content, success, distilled) = match result {
            Ok(raw) => {
                let bulk = self
                    .registry
                    .get(&request.name)
                    .is_some_and(|c| c.bulk_output());
                match &self.distiller {
                    Some(distiller) if distiller.should_distill(bulk, &raw) => {
                        let compact = distiller.distill(&raw, &ctx.query).await;
                        let counts = (raw.chars().count(), compact.chars().count());
                        (compact, true, Some(counts))
                    }
                    _ => (raw, true, None),
                }
            }
            Err(e) => {
                warn!(capability = %request.name, error = %e, "Capability dispatch failed");
                (format!("Error: {e}"), false, None)
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(
            capability = %request.name,
            success,
            duration_ms,
            chars = content.len(),
            "Capability dispatched"
        );

        Dispatched {
            capability: request.name.clone(),
            observation: Message::observation(&request.id, content),
            success,
            duration_ms,
            distilled,
        }
    }

    async fn invoke(&self, request: &CapabilityRequest, ctx: &InvocationContext) -> Result<String, ToolError> {
        let name = request.name.as_str();
        let arguments = request
            .parsed_arguments()
            .map_err(|e| ToolError::invalid(name, format!("malformed arguments: {e}")))?;
        let timeout_secs = self.timeout.as_secs();

        self.retry
            .run(
                |_| {
                    let arguments = arguments.clone();
                    async move {
                        match tokio::time::timeout(self.timeout, self.registry.invoke(name, arguments, ctx)).await {
                            Ok(result) => result,
                            Err(_) => Err(ToolError::Timeout {
                                capability: name.to_string(),
                                timeout_secs,
                            }),
                        }
                    }
                },
                ToolError::is_transient,
            )
            .await
    }
}
