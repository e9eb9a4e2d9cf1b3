//! The plan and chat cache tiers, their key derivation, and the janitor.

use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::ResponseCache;
use crate::config::CacheConfig;
use crate::model::{PlanRequest, WeeklyPlan};

/// Maximum characters of chat context that participate in the key.
const CHAT_CONTEXT_KEY_CHARS: usize = 200;

/// Both cache tiers, shared by every session.
#[derive(Debug)]
pub struct CacheTiers {
    /// Whole generated plans.
    pub plans: ResponseCache<WeeklyPlan>,
    /// Short free-text chat answers.
    pub chat: ResponseCache<String>,
}

/// Entry counts removed by [`CacheTiers::clear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClearedCounts {
    pub plans: usize,
    pub chat: usize,
}

/// Point-in-time size of each tier.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub plan_entries: usize,
    pub plan_capacity: usize,
    pub plan_ttl_secs: u64,
    pub chat_entries: usize,
    pub chat_capacity: usize,
    pub chat_ttl_secs: u64,
}

impl CacheTiers {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            plans: ResponseCache::new("plans", config.plan_max_entries, config.plan_ttl),
            chat: ResponseCache::new("chat", config.chat_max_entries, config.chat_ttl),
        }
    }

    /// Administrative clear of both tiers.
    pub fn clear(&self) -> ClearedCounts {
        let counts = ClearedCounts {
            plans: self.plans.clear(),
            chat: self.chat.clear(),
        };
        tracing::info!(plans = counts.plans, chat = counts.chat, "cache cleared");
        counts
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            plan_entries: self.plans.len(),
            plan_capacity: self.plans.capacity(),
            plan_ttl_secs: self.plans.ttl().as_secs(),
            chat_entries: self.chat.len(),
            chat_capacity: self.chat.capacity(),
            chat_ttl_secs: self.chat.ttl().as_secs(),
        }
    }

    /// Spawn a background task purging expired entries every `interval`
    /// until `cancel` fires.
    pub fn spawn_janitor(
        self: &Arc<Self>,
        interval: std::time::Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let tiers = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let plans = tiers.plans.purge_expired();
                        let chat = tiers.chat.purge_expired();
                        if plans + chat > 0 {
                            tracing::debug!(plans, chat, "purged expired cache entries");
                        }
                    }
                    _ = cancel.cancelled() => {
                        tracing::debug!("cache janitor stopping");
                        break;
                    }
                }
            }
        })
    }
}

fn digest_key(prefix: &str, bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{prefix}:{}", hex::encode(digest))
}

/// Cache key for a plan request, derived from its normalized form.
pub fn plan_key(request: &PlanRequest) -> String {
    let normalized = request.normalized();
    let bytes = serde_json::to_vec(&normalized)
        .unwrap_or_else(|_| format!("{normalized:?}").into_bytes());
    digest_key("plan", &bytes)
}

/// Cache key for a chat answer: lower-cased message plus truncated context.
pub fn chat_key(message: &str, context: Option<&str>) -> String {
    let message = message.trim().to_lowercase();
    let context: String = context
        .unwrap_or_default()
        .chars()
        .take(CHAT_CONTEXT_KEY_CHARS)
        .collect();
    let bytes = serde_json::to_vec(&(message.as_str(), context.as_str()))
        .unwrap_or_else(|_| format!("{message}\u{1f}{context}").into_bytes());
    digest_key("chat", &bytes)
}
