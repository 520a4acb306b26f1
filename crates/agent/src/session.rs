// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-token session state carried across keyword calls.
//!
//! The agent never looks inside a session. Keywords stash whatever they need
//! (driver handles, cookies, counters) and find it again on the next call
//! against the same token. Values registered with
//! [`SessionState::insert_resource`] are closed when the session is torn down.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

/// A session value holding an external resource that must be released.
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    async fn close(&mut self) -> anyhow::Result<()>;
}

type Handle = Box<dyn Any + Send + Sync>;
type Closer = for<'a> fn(&'a mut Handle) -> BoxFuture<'a, anyhow::Result<()>>;

fn close_as<R: Resource>(handle: &mut Handle) -> BoxFuture<'_, anyhow::Result<()>> {
    match (**handle).downcast_mut::<R>() {
        Some(resource) => resource.close(),
        None => Box::pin(async { Ok(()) }),
    }
}

struct Slot {
    handle: Handle,
    closer: Option<Closer>,
}

/// The mutable contents of a session.
#[derive(Default)]
pub struct SessionState {
    slots: HashMap<String, Slot>,
}

impl SessionState {
    /// Store a plain value, replacing any previous value under `key`.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.slots.insert(key.into(), Slot { handle: Box::new(value), closer: None });
    }

    /// Store a value that is closed on teardown.
    pub fn insert_resource<R: Resource>(&mut self, key: impl Into<String>, resource: R) {
        self.slots
            .insert(key.into(), Slot { handle: Box::new(resource), closer: Some(close_as::<R>) });
    }

    /// Borrow the value under `key` if it exists and has type `T`.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.slots.get(key).and_then(|slot| slot.handle.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.slots.get_mut(key).and_then(|slot| slot.handle.downcast_mut::<T>())
    }

    /// Take the value under `key` out of the session without closing it.
    ///
    /// A value of a different type is left in place.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        if !self.slots.get(key).is_some_and(|slot| slot.handle.is::<T>()) {
            return None;
        }
        let slot = self.slots.remove(key)?;
        slot.handle.downcast::<T>().ok().map(|boxed| *boxed)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Close every resource and drop every value. Close failures are logged
    /// and do not stop the remaining resources from being closed.
    ///
    /// Returns the number of resources that failed to close.
    pub async fn close_all(&mut self, token_id: &str) -> usize {
        let mut failures = 0;
        for (key, mut slot) in self.slots.drain() {
            let Some(closer) = slot.closer else {
                continue;
            };
            tracing::debug!(token_id, key = %key, "closing session resource");
            if let Err(e) = closer(&mut slot.handle).await {
                failures += 1;
                tracing::warn!(token_id, key = %key, err = %e, "failed to close session resource");
            }
        }
        failures
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState").field("keys", &self.slots.keys().collect::<Vec<_>>()).finish()
    }
}

/// Session bound to one token for the token's lifetime.
///
/// The lock is held for the whole of a keyword call, so two calls against the
/// same token run one after the other.
pub struct Session {
    token_id: String,
    state: std::sync::Arc<Mutex<SessionState>>,
}

impl Session {
    pub fn new(token_id: impl Into<String>) -> Self {
        Self { token_id: token_id.into(), state: Default::default() }
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    /// Owned guard for use inside spawned invocation tasks.
    pub async fn lock_owned(&self) -> OwnedMutexGuard<SessionState> {
        std::sync::Arc::clone(&self.state).lock_owned().await
    }

    /// Close held resources and empty the session. The session object itself
    /// stays bound to its token.
    pub async fn teardown(&self) -> usize {
        let mut state = self.state.lock().await;
        if state.is_empty() {
            return 0;
        }
        tracing::info!(token_id = %self.token_id, entries = state.len(), "tearing down session");
        state.close_all(&self.token_id).await
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
