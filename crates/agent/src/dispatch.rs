// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyword dispatch: resolve, run against the token session, settle.
//!
//! Every call runs in its own task so a dropped HTTP request does not abort a
//! keyword halfway. Whatever happens inside the task (explicit failure, panic,
//! timeout, interruption) settles into exactly one [`DispatchResult`].
//!
//! Calls on one token queue on its session lock. The queueing time counts
//! against the call's timeout, and only the call holding the lock is
//! interruptible.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::keyword::output::{Attachment, DispatchResult, Output};
use crate::keyword::{ErrorHook, Keyword, KeywordError, KeywordRegistry, Properties};
use crate::session::{Session, SessionState};
use crate::state::AgentContext;

/// Lifecycle of one keyword call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum InvocationState {
    Pending = 0,
    Running = 1,
    /// Failed; the error hook is capturing diagnostics.
    Diagnosing = 2,
    Succeeded = 3,
    Failed = 4,
}

impl InvocationState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Diagnosing,
            3 => Self::Succeeded,
            _ => Self::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(self, next: Self) -> bool {
        use InvocationState::*;
        matches!(
            (self, next),
            (Pending, Running | Failed)
                | (Running, Succeeded | Failed | Diagnosing)
                | (Diagnosing, Succeeded | Failed)
        )
    }
}

/// An in-flight keyword call.
pub struct Invocation {
    pub token_id: String,
    pub keyword: String,
    pub started_at: Instant,
    state: AtomicU8,
    cancel: CancellationToken,
}

impl Invocation {
    fn new(token_id: &str, keyword: &str, cancel: CancellationToken) -> Self {
        Self {
            token_id: token_id.to_owned(),
            keyword: keyword.to_owned(),
            started_at: Instant::now(),
            state: AtomicU8::new(InvocationState::Pending as u8),
            cancel,
        }
    }

    pub fn state(&self) -> InvocationState {
        InvocationState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` if the transition is legal. Returns whether it moved.
    fn advance(&self, next: InvocationState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if !InvocationState::from_u8(current).can_advance_to(next) {
                tracing::debug!(
                    token_id = %self.token_id,
                    from = ?InvocationState::from_u8(current),
                    to = ?next,
                    "ignored invocation transition"
                );
                return false;
            }
            match self.state.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    tracing::debug!(token_id = %self.token_id, keyword = %self.keyword, state = ?next, "invocation state");
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn interrupt(&self) {
        self.cancel.cancel();
    }
}

/// A `process` request after transport decoding.
#[derive(Debug, Clone, Default)]
pub struct DispatchRequest {
    pub keyword: String,
    pub argument: Value,
    /// Caller-supplied properties; agent and token properties override them.
    pub properties: Properties,
    /// Overrides the dispatcher's default timeout for this call.
    /// `Duration::ZERO` runs the call without a limit.
    pub timeout: Option<Duration>,
}

/// Calls currently holding their token's session, by token id.
type InFlight = Arc<RwLock<HashMap<String, Arc<Invocation>>>>;

/// Runs keyword calls against token sessions.
pub struct Dispatcher {
    context: Arc<AgentContext>,
    registry: Arc<KeywordRegistry>,
    default_timeout: Option<Duration>,
    in_flight: InFlight,
}

impl Dispatcher {
    pub fn new(
        context: Arc<AgentContext>,
        registry: Arc<KeywordRegistry>,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self { context, registry, default_timeout, in_flight: Default::default() }
    }

    pub fn context(&self) -> &Arc<AgentContext> {
        &self.context
    }

    pub fn registry(&self) -> &KeywordRegistry {
        &self.registry
    }

    /// Run one keyword call on `token_id`.
    ///
    /// Errors only for an unknown token or an empty keyword name. Every
    /// keyword-level failure, including an unknown keyword, comes back as a
    /// failed [`DispatchResult`].
    pub async fn process(
        &self,
        token_id: &str,
        request: DispatchRequest,
    ) -> Result<DispatchResult, AgentError> {
        if request.keyword.is_empty() {
            return Err(AgentError::BadRequest);
        }
        let entry = self.context.tokens.get(token_id).await.ok_or(AgentError::TokenNotFound)?;
        if !entry.is_reserved() {
            tracing::debug!(token_id, "processing on a token that is not reserved");
        }

        let Some(keyword) = self.registry.get(&request.keyword) else {
            tracing::warn!(token_id, keyword = %request.keyword, "keyword not found");
            return Ok(DispatchResult::error_message(format!(
                "Unable to find keyword {} in {}",
                request.keyword,
                self.registry.source()
            )));
        };

        let properties = self.merge_properties(request.properties, &entry.properties);
        let budget = request
            .timeout
            .or(self.default_timeout)
            .filter(|limit| !limit.is_zero())
            .map(Budget::starting_now);
        let invocation = Arc::new(Invocation::new(
            token_id,
            &request.keyword,
            self.context.shutdown.child_token(),
        ));

        tracing::info!(token_id, keyword = %request.keyword, "executing keyword");
        let call = Call {
            invocation: Arc::clone(&invocation),
            keyword,
            error_hook: self.registry.error_hook(),
            session: Arc::clone(&entry.session),
            input: request.argument,
            properties,
            budget,
        };
        let task = tokio::spawn(run_invocation(call, Arc::clone(&self.in_flight)));
        let result = match task.await {
            Ok(result) => result,
            Err(e) => {
                let message = format!(
                    "Error in agent '{}' while executing '{}': {e}",
                    self.context.agent_url, invocation.keyword
                );
                tracing::error!(token_id, keyword = %invocation.keyword, err = %e, "invocation task failed");
                invocation.advance(InvocationState::Failed);
                vacate(&self.in_flight, &invocation).await;
                let mut result = DispatchResult::error_message(message);
                let log = Attachment::from_bytes("exception.log", e.to_string().as_bytes());
                result.attachments.push(log);
                result
            }
        };

        let elapsed_ms = invocation.started_at.elapsed().as_millis() as u64;
        if result.is_success() {
            tracing::info!(token_id, keyword = %invocation.keyword, elapsed_ms, "keyword succeeded");
        } else {
            tracing::warn!(
                token_id,
                keyword = %invocation.keyword,
                elapsed_ms,
                error = result.error.as_ref().map(|e| e.message()).unwrap_or_default(),
                "keyword failed"
            );
        }
        Ok(result)
    }

    /// Interrupt the call currently running on `token_id`. Calls still
    /// waiting for the session are left alone. Returns whether there was a
    /// running call to interrupt.
    pub async fn interrupt(&self, token_id: &str) -> Result<bool, AgentError> {
        if self.context.tokens.get(token_id).await.is_none() {
            return Err(AgentError::TokenNotFound);
        }
        match self.in_flight.read().await.get(token_id) {
            Some(invocation) => {
                tracing::info!(token_id, keyword = %invocation.keyword, "interrupting keyword");
                invocation.interrupt();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The call currently holding `token_id`'s session, if any.
    pub async fn in_flight(&self, token_id: &str) -> Option<Arc<Invocation>> {
        self.in_flight.read().await.get(token_id).map(Arc::clone)
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.read().await.len()
    }

    /// Request properties, overridden by agent properties, overridden by the
    /// token group's properties.
    fn merge_properties(&self, mut properties: Properties, token: &Properties) -> Properties {
        for (key, value) in self.context.properties.iter().chain(token.iter()) {
            properties.insert(key.clone(), value.clone());
        }
        properties
    }
}

/// Time limit of one call, counted from when it was accepted.
#[derive(Debug, Clone, Copy)]
struct Budget {
    limit: Duration,
    deadline: tokio::time::Instant,
}

impl Budget {
    fn starting_now(limit: Duration) -> Self {
        Self { limit, deadline: tokio::time::Instant::now() + limit }
    }
}

/// Everything a spawned invocation task owns.
struct Call {
    invocation: Arc<Invocation>,
    keyword: Arc<dyn Keyword>,
    error_hook: Option<Arc<dyn ErrorHook>>,
    session: Arc<Session>,
    input: Value,
    properties: Properties,
    budget: Option<Budget>,
}

/// Settle `call` and drop its in-flight entry, whether or not anyone is
/// still waiting for the result.
async fn run_invocation(call: Call, in_flight: InFlight) -> DispatchResult {
    let invocation = Arc::clone(&call.invocation);
    let result = settle(call, &in_flight).await;
    vacate(&in_flight, &invocation).await;
    result
}

/// Remove `invocation` from the in-flight map unless a later call already
/// took its place.
async fn vacate(in_flight: &InFlight, invocation: &Arc<Invocation>) {
    let mut in_flight = in_flight.write().await;
    if in_flight.get(&invocation.token_id).is_some_and(|current| Arc::ptr_eq(current, invocation)) {
        in_flight.remove(&invocation.token_id);
    }
}

async fn settle(call: Call, in_flight: &InFlight) -> DispatchResult {
    let Call { invocation, keyword, error_hook, session, input, properties, budget } = call;
    let mut output = Output::new(invocation.cancel.clone());

    // The wait for the session counts against the call's budget.
    let mut state = match within(session.lock_owned().map(Ok), &invocation.cancel, budget).await {
        Ok(state) => state,
        Err(error) => {
            tracing::warn!(
                token_id = %invocation.token_id,
                keyword = %invocation.keyword,
                err = %error,
                "gave up waiting for the token session"
            );
            invocation.cancel.cancel();
            invocation.advance(InvocationState::Failed);
            attach_diagnostics(&error, &invocation, &mut output);
            return DispatchResult::failure(&error, output);
        }
    };
    in_flight.write().await.insert(invocation.token_id.clone(), Arc::clone(&invocation));
    invocation.advance(InvocationState::Running);

    let execution = AssertUnwindSafe(keyword.execute(&input, &mut output, &mut state, &properties))
        .catch_unwind()
        .map(|caught| {
            caught.unwrap_or_else(|panic| Err(KeywordError::Fault(panic_message(panic.as_ref()))))
        });
    let outcome = within(execution, &invocation.cancel, budget).await;

    let error = match outcome {
        Ok(payload) => {
            invocation.advance(InvocationState::Succeeded);
            return DispatchResult::success(payload, output);
        }
        Err(error) => error,
    };
    if let KeywordError::TimedOut(after) = &error {
        tracing::warn!(token_id = %invocation.token_id, keyword = %invocation.keyword, ?after, "keyword timed out");
        invocation.cancel.cancel();
    }
    attach_diagnostics(&error, &invocation, &mut output);

    let Some(hook) = error_hook else {
        invocation.advance(InvocationState::Failed);
        return DispatchResult::failure(&error, output);
    };

    invocation.advance(InvocationState::Diagnosing);
    let report = diagnose(
        hook.as_ref(),
        &invocation,
        &error,
        &input,
        &mut output,
        &mut state,
        &properties,
        budget.map(|b| b.limit),
    )
    .await;
    if report {
        invocation.advance(InvocationState::Failed);
        DispatchResult::failure(&error, output)
    } else {
        tracing::info!(
            token_id = %invocation.token_id,
            keyword = %invocation.keyword,
            "error hook marked the failed call successful"
        );
        invocation.advance(InvocationState::Succeeded);
        DispatchResult::success(None, output)
    }
}

/// Await `future` until it settles, the call is interrupted, or the budget
/// runs out.
async fn within<T, F>(
    future: F,
    cancel: &CancellationToken,
    budget: Option<Budget>,
) -> Result<T, KeywordError>
where
    F: Future<Output = Result<T, KeywordError>>,
{
    let guarded = async {
        tokio::select! {
            result = future => result,
            _ = cancel.cancelled() => Err(KeywordError::Interrupted),
        }
    };
    match budget {
        Some(budget) => tokio::time::timeout_at(budget.deadline, guarded)
            .await
            .unwrap_or(Err(KeywordError::TimedOut(budget.limit))),
        None => guarded.await,
    }
}

/// Log attachments for failures the keyword could not report itself.
fn attach_diagnostics(error: &KeywordError, invocation: &Invocation, output: &mut Output) {
    let (name, log) = match error {
        KeywordError::Fault(message) => (
            "exception.log",
            format!(
                "keyword '{}' panicked on token {}: {message}\n",
                invocation.keyword, invocation.token_id
            ),
        ),
        KeywordError::TimedOut(limit) => (
            "interruption.log",
            format!(
                "keyword '{}' on token {} interrupted after {} ms (limit {} ms) in state {:?}\n",
                invocation.keyword,
                invocation.token_id,
                invocation.started_at.elapsed().as_millis(),
                limit.as_millis(),
                invocation.state(),
            ),
        ),
        _ => return,
    };
    output.attach(Attachment::from_bytes(name, log.as_bytes()));
}

/// Run the error hook. Returns whether the failure should be reported; a
/// hook that errors, panics or times out keeps the original failure.
#[allow(clippy::too_many_arguments)]
async fn diagnose(
    hook: &dyn ErrorHook,
    invocation: &Invocation,
    error: &KeywordError,
    input: &Value,
    output: &mut Output,
    session: &mut SessionState,
    properties: &Properties,
    timeout: Option<Duration>,
) -> bool {
    let guarded = AssertUnwindSafe(hook.on_error(error, input, output, session, properties)).catch_unwind();
    let settled = match timeout {
        Some(limit) => tokio::time::timeout(limit, guarded).await.ok(),
        None => Some(guarded.await),
    };
    match settled {
        Some(Ok(Ok(report))) => report,
        Some(Ok(Err(e))) => {
            tracing::warn!(token_id = %invocation.token_id, keyword = %invocation.keyword, err = %e, "error hook failed");
            true
        }
        Some(Err(panic)) => {
            tracing::warn!(
                token_id = %invocation.token_id,
                keyword = %invocation.keyword,
                panic = %panic_message(panic.as_ref()),
                "error hook panicked"
            );
            true
        }
        None => {
            tracing::warn!(token_id = %invocation.token_id, keyword = %invocation.keyword, "error hook timed out");
            true
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "keyword panicked".to_owned()
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
