//! Entitlement checks for paid extensions.
//!
//! Paid and subscription extensions are gated per protected operation
//! against a remote entitlement service. Responses are cached for five
//! minutes so revocation takes effect in bounded time without a network
//! round trip per request. When the service is unreachable, the last known
//! answer is honored (flagged offline); with no history at all, access is
//! denied rather than silently granted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::extension::manifest::PricingKind;

/// How long a fetched entitlement stays fresh.
pub const CACHE_TTL: Duration = Duration::from_secs(300);

/// Timeout for one entitlement request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(4);

/// Wire format of `GET /entitlements/{extension_id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct EntitlementResponse {
    pub has_active_subscription: bool,
    pub status: String,
    #[serde(default)]
    pub period_end: Option<chrono::DateTime<chrono::Utc>>,
}

/// Subscription state as reported, plus the synthetic offline marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Expired,
    Cancelled,
    /// Served from a stale cache entry while the service is unreachable.
    Offline,
    Unknown,
}

impl SubscriptionState {
    fn parse(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "expired" => Self::Expired,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Expired => write!(f, "expired"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Offline => write!(f, "offline"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A verified entitlement, as cached.
#[derive(Debug, Clone)]
pub struct SubscriptionStatus {
    pub extension_id: String,
    pub has_active_subscription: bool,
    pub status: SubscriptionState,
    pub period_end: Option<chrono::DateTime<chrono::Utc>>,
}

/// Outcome of a per-operation entitlement check.
///
/// Denials are distinct so the surface can tell "subscription required"
/// apart from "offline, cannot verify"; neither is a generic failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Free extensions are never checked.
    GrantedFree,
    /// A fresh or freshly fetched entitlement is active.
    Granted,
    /// The service is unreachable; the last known entitlement was active.
    GrantedOffline,
    /// The entitlement exists but is not active.
    DeniedSubscriptionRequired,
    /// The service is unreachable and no prior entitlement is cached.
    DeniedOffline,
}

impl AccessDecision {
    pub fn allowed(&self) -> bool {
        matches!(
            self,
            Self::GrantedFree | Self::Granted | Self::GrantedOffline
        )
    }
}

impl std::fmt::Display for AccessDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GrantedFree => write!(f, "granted (free extension)"),
            Self::Granted => write!(f, "granted"),
            Self::GrantedOffline => write!(f, "granted (offline, last known entitlement)"),
            Self::DeniedSubscriptionRequired => write!(f, "denied: subscription required"),
            Self::DeniedOffline => write!(f, "denied: offline, cannot verify subscription"),
        }
    }
}

/// Client for the remote entitlement service.
#[async_trait::async_trait]
pub trait EntitlementClient: Send + Sync {
    async fn fetch(&self, extension_id: &str) -> Result<EntitlementResponse>;
}

/// HTTP client for the entitlement service.
pub struct HttpEntitlementClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEntitlementClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Subscription(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait::async_trait]
impl EntitlementClient for HttpEntitlementClient {
    async fn fetch(&self, extension_id: &str) -> Result<EntitlementResponse> {
        let url = format!(
            "{}/entitlements/{}",
            self.base_url.trim_end_matches('/'),
            extension_id
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Subscription(format!("entitlement request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| Error::Subscription(format!("entitlement service error: {}", e)))?;
        response
            .json()
            .await
            .map_err(|e| Error::Subscription(format!("invalid entitlement response: {}", e)))
    }
}

struct CacheEntry {
    status: SubscriptionStatus,
    fetched_at: Instant,
}

/// Per-operation entitlement checker with a short-lived cache.
pub struct SubscriptionChecker {
    client: Arc<dyn EntitlementClient>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl SubscriptionChecker {
    pub fn new(client: Arc<dyn EntitlementClient>) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
            ttl: CACHE_TTL,
        }
    }

    /// Override the cache TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Verify access to one protected operation of an extension.
    ///
    /// Must be called per operation, not cached by the caller, so that
    /// revocation propagates within the cache TTL.
    pub async fn verify(&self, extension_id: &str, kind: PricingKind) -> AccessDecision {
        if kind == PricingKind::Free {
            return AccessDecision::GrantedFree;
        }

        if let Some(status) = self.fresh_cached(extension_id).await {
            debug!(extension_id = %extension_id, "entitlement served from cache");
            return Self::decide(&status, false);
        }

        match self.client.fetch(extension_id).await {
            Ok(response) => {
                let status = SubscriptionStatus {
                    extension_id: extension_id.to_string(),
                    has_active_subscription: response.has_active_subscription,
                    status: SubscriptionState::parse(&response.status),
                    period_end: response.period_end,
                };
                self.cache.write().await.insert(
                    extension_id.to_string(),
                    CacheEntry {
                        status: status.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Self::decide(&status, false)
            }
            Err(err) => {
                warn!(extension_id = %extension_id, error = %err, "entitlement service unreachable");
                let stale = self
                    .cache
                    .read()
                    .await
                    .get(extension_id)
                    .map(|entry| entry.status.clone());
                match stale {
                    Some(status) => Self::decide(&status, true),
                    None => AccessDecision::DeniedOffline,
                }
            }
        }
    }

    /// Current entitlement for display purposes, stale entries marked
    /// offline.
    pub async fn cached(&self, extension_id: &str) -> Option<SubscriptionStatus> {
        let cache = self.cache.read().await;
        cache.get(extension_id).map(|entry| {
            let mut status = entry.status.clone();
            if entry.fetched_at.elapsed() >= self.ttl {
                status.status = SubscriptionState::Offline;
            }
            status
        })
    }

    /// Invalidate one cached entitlement, or all of them.
    pub async fn clear_cache(&self, extension_id: Option<&str>) {
        let mut cache = self.cache.write().await;
        match extension_id {
            Some(id) => {
                cache.remove(id);
            }
            None => cache.clear(),
        }
    }

    async fn fresh_cached(&self, extension_id: &str) -> Option<SubscriptionStatus> {
        let cache = self.cache.read().await;
        cache.get(extension_id).and_then(|entry| {
            if entry.fetched_at.elapsed() < self.ttl {
                Some(entry.status.clone())
            } else {
                None
            }
        })
    }

    fn decide(status: &SubscriptionStatus, offline: bool) -> AccessDecision {
        match (status.has_active_subscription, offline) {
            (true, false) => AccessDecision::Granted,
            (true, true) => AccessDecision::GrantedOffline,
            (false, _) => AccessDecision::DeniedSubscriptionRequired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted client: a fixed sequence of responses, then failures.
    struct ScriptedClient {
        responses: Vec<Result<EntitlementResponse>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Result<EntitlementResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl EntitlementClient for ScriptedClient {
        async fn fetch(&self, _extension_id: &str) -> Result<EntitlementResponse> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.get(index) {
                Some(Ok(r)) => Ok(r.clone()),
                Some(Err(_)) | None => {
                    Err(Error::Subscription("connection refused".into()))
                }
            }
        }
    }

    fn active_response() -> Result<EntitlementResponse> {
        Ok(EntitlementResponse {
            has_active_subscription: true,
            status: "active".into(),
            period_end: None,
        })
    }

    fn expired_response() -> Result<EntitlementResponse> {
        Ok(EntitlementResponse {
            has_active_subscription: false,
            status: "expired".into(),
            period_end: None,
        })
    }

    #[tokio::test]
    async fn test_free_extensions_never_hit_the_service() {
        let client = ScriptedClient::new(vec![]);
        let checker = SubscriptionChecker::new(client.clone());
        let decision = checker.verify("notes", PricingKind::Free).await;
        assert_eq!(decision, AccessDecision::GrantedFree);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_fresh_cache_is_reused() {
        let client = ScriptedClient::new(vec![active_response()]);
        let checker = SubscriptionChecker::new(client.clone());

        let first = checker.verify("loyalty", PricingKind::Subscription).await;
        let second = checker.verify("loyalty", PricingKind::Subscription).await;
        assert_eq!(first, AccessDecision::Granted);
        assert_eq!(second, AccessDecision::Granted);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_entries_are_refetched() {
        let client = ScriptedClient::new(vec![active_response(), expired_response()]);
        let checker = SubscriptionChecker::new(client.clone()).with_ttl(Duration::ZERO);

        assert_eq!(
            checker.verify("loyalty", PricingKind::Subscription).await,
            AccessDecision::Granted
        );
        // TTL zero: the cached entry is never fresh, so revocation lands.
        assert_eq!(
            checker.verify("loyalty", PricingKind::Subscription).await,
            AccessDecision::DeniedSubscriptionRequired
        );
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_network_failure_falls_back_to_stale_cache() {
        let client = ScriptedClient::new(vec![active_response()]);
        let checker = SubscriptionChecker::new(client.clone()).with_ttl(Duration::ZERO);

        assert_eq!(
            checker.verify("loyalty", PricingKind::Paid).await,
            AccessDecision::Granted
        );
        // Second call: fetch fails, stale entry honored, flagged offline.
        assert_eq!(
            checker.verify("loyalty", PricingKind::Paid).await,
            AccessDecision::GrantedOffline
        );
        let cached = checker.cached("loyalty").await.unwrap();
        assert_eq!(cached.status, SubscriptionState::Offline);
    }

    #[tokio::test]
    async fn test_network_failure_without_history_denies() {
        let client = ScriptedClient::new(vec![]);
        let checker = SubscriptionChecker::new(client);
        let decision = checker.verify("loyalty", PricingKind::Paid).await;
        assert_eq!(decision, AccessDecision::DeniedOffline);
        assert!(!decision.allowed());
    }

    #[tokio::test]
    async fn test_clear_cache_forces_refetch() {
        let client = ScriptedClient::new(vec![active_response(), expired_response()]);
        let checker = SubscriptionChecker::new(client.clone());

        checker.verify("loyalty", PricingKind::Subscription).await;
        checker.clear_cache(Some("loyalty")).await;
        assert_eq!(
            checker.verify("loyalty", PricingKind::Subscription).await,
            AccessDecision::DeniedSubscriptionRequired
        );
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_clear_all_cache() {
        let client = ScriptedClient::new(vec![active_response(), active_response()]);
        let checker = SubscriptionChecker::new(client.clone());
        checker.verify("loyalty", PricingKind::Paid).await;
        checker.clear_cache(None).await;
        assert!(checker.cached("loyalty").await.is_none());
    }
}
