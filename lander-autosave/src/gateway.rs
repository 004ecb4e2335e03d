//! Persistence boundary: where drafts are loaded from and saved to.
//!
//! The engine only needs two asynchronous, fallible, retry-safe calls.
//! [`MemoryGateway`] is an in-process implementation with injectable
//! latency and failures; [`crate::storage::RocksDraftStore`] is durable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::BoxFuture;
use lander_core::DocumentState;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Network or backend not reachable. Retryable.
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
    /// The backend refused the draft.
    #[error("Draft rejected: {0}")]
    Rejected(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Draft load/save API. Saving the same state twice must be harmless.
pub trait PersistenceGateway: Send + Sync {
    /// `Ok(None)` when no draft exists for `token_id`.
    fn load_draft<'a>(
        &'a self,
        token_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<DocumentState>, GatewayError>>;

    fn save_draft<'a>(
        &'a self,
        token_id: &'a str,
        state: &'a DocumentState,
    ) -> BoxFuture<'a, Result<(), GatewayError>>;
}

/// In-memory gateway.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    drafts: Mutex<HashMap<String, DocumentState>>,
    latency_ms: AtomicU64,
    failing_saves: AtomicU32,
    fail_all_saves: AtomicBool,
    fail_loads: AtomicBool,
    loads: AtomicU64,
    saves: AtomicU64,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `latency` (tokio time) before completing.
    pub fn with_latency(latency: Duration) -> Self {
        let gateway = Self::new();
        gateway.set_latency(latency);
        gateway
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Place a draft as if another client had saved it.
    pub fn put_draft(&self, state: DocumentState) {
        self.lock().insert(state.token_id.clone(), state);
    }

    pub fn draft(&self, token_id: &str) -> Option<DocumentState> {
        self.lock().get(token_id).cloned()
    }

    /// The next `n` saves fail with [`GatewayError::Unavailable`].
    pub fn fail_next_saves(&self, n: u32) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_all_saves(&self, fail: bool) {
        self.fail_all_saves.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Completed and failed loads.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    /// Save attempts, including failed ones.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DocumentState>> {
        self.drafts.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn take_save_failure(&self) -> bool {
        if self.fail_all_saves.load(Ordering::SeqCst) {
            return true;
        }
        self.failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl PersistenceGateway for MemoryGateway {
    fn load_draft<'a>(
        &'a self,
        token_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<DocumentState>, GatewayError>> {
        Box::pin(async move {
            self.simulate_latency().await;
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_loads.load(Ordering::SeqCst) {
                return Err(GatewayError::Unavailable("load failed".into()));
            }
            Ok(self.draft(token_id))
        })
    }

    fn save_draft<'a>(
        &'a self,
        token_id: &'a str,
        state: &'a DocumentState,
    ) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(async move {
            self.simulate_latency().await;
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.take_save_failure() {
                return Err(GatewayError::Unavailable("save failed".into()));
            }
            self.lock().insert(token_id.to_string(), state.clone());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> DocumentState {
        DocumentState::new("tok").with_section("hero", [("headline", json!("A"))])
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let gateway = MemoryGateway::new();
        assert_eq!(gateway.load_draft("tok").await.unwrap(), None);

        gateway.save_draft("tok", &doc()).await.unwrap();
        assert_eq!(gateway.load_draft("tok").await.unwrap(), Some(doc()));
        assert_eq!(gateway.save_count(), 1);
        assert_eq!(gateway.load_count(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let gateway = MemoryGateway::new();
        gateway.fail_next_saves(2);

        assert!(gateway.save_draft("tok", &doc()).await.is_err());
        assert!(gateway.save_draft("tok", &doc()).await.is_err());
        assert!(gateway.save_draft("tok", &doc()).await.is_ok());
        assert_eq!(gateway.save_count(), 3);
    }

    #[tokio::test]
    async fn test_failing_loads() {
        let gateway = MemoryGateway::new();
        gateway.set_fail_loads(true);
        assert!(matches!(
            gateway.load_draft("tok").await,
            Err(GatewayError::Unavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_uses_tokio_time() {
        let gateway = MemoryGateway::with_latency(Duration::from_secs(5));
        let start = tokio::time::Instant::now();
        gateway.save_draft("tok", &doc()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
