//! Cleanup Manager: a scoped, one-shot resource registry for a single
//! inbound request. axum has no `close`/`finish`/`error` event-emitter to
//! subscribe to the way a Node HTTP response would, so `run` is invoked
//! explicitly at the dispatcher's known terminal points instead of via
//! subscribed listeners.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use tokio::sync::Mutex;

use crate::error::GatewayError;

type CleanupCallback = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send>;

/// One per inbound request. `run` executes every registered callback
/// concurrently and independently, at most once, regardless of how many
/// times it is called or how many terminal events fire.
pub struct CleanupManager {
    profile: String,
    triggered: AtomicBool,
    callbacks: Mutex<Vec<CleanupCallback>>,
}

impl CleanupManager {
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            triggered: AtomicBool::new(false),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Appends a release callback. Callbacks registered after `run` has
    /// already fired are dropped without being invoked, since `run` takes
    /// the whole callback list at the moment it claims the one-shot flag.
    pub async fn register<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: CleanupCallback = Box::new(move || Box::pin(callback()));
        self.callbacks.lock().await.push(boxed);
    }

    /// At-most-once. `cause`, when present, is logged as a single warning
    /// annotated with the profile name. Every registered callback runs
    /// concurrently; a failing callback is caught and logged at warn without
    /// preventing the others from completing.
    pub async fn run(&self, cause: Option<&GatewayError>) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(error) = cause {
            tracing::warn!(profile = %self.profile, error = %error, "request cleanup triggered by error");
        }

        let callbacks = std::mem::take(&mut *self.callbacks.lock().await);
        let results = join_all(callbacks.into_iter().map(|callback| callback())).await;

        for result in results {
            if let Err(error) = result {
                tracing::warn!(profile = %self.profile, error = %error, "cleanup callback failed");
            }
        }
    }
}
