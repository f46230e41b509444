//! Avatar resolution.
//!
//! Avatars come from an external lookup that maps account ids to image URLs.
//! Producers never wait on it for long and never fail because of it: a slow
//! or failing lookup degrades to the placeholder URL.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Default image for accounts without a resolved avatar.
pub const PLACEHOLDER_AVATAR: &str = "/placeholder.jpg";

/// How long a producer waits for the lookup.
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pluggable avatar lookup.
#[async_trait]
pub trait AvatarResolver: Send + Sync {
    /// Resolve URLs for `account_ids`. Missing entries are allowed.
    async fn resolve(&self, account_ids: &[String]) -> Result<HashMap<String, String>>;
}

/// Resolver that knows no avatars; everything falls back to the placeholder.
pub struct NoAvatars;

#[async_trait]
impl AvatarResolver for NoAvatars {
    async fn resolve(&self, _account_ids: &[String]) -> Result<HashMap<String, String>> {
        Ok(HashMap::new())
    }
}

/// Fixed id-to-URL table.
#[derive(Debug, Clone, Default)]
pub struct StaticAvatars(pub HashMap<String, String>);

#[async_trait]
impl AvatarResolver for StaticAvatars {
    async fn resolve(&self, account_ids: &[String]) -> Result<HashMap<String, String>> {
        Ok(account_ids
            .iter()
            .filter_map(|id| self.0.get(id).map(|url| (id.clone(), url.clone())))
            .collect())
    }
}

/// Resolve what the lookup can within [`RESOLVE_TIMEOUT`]. Errors and
/// timeouts yield an empty map.
pub async fn resolve_or_empty(
    resolver: &dyn AvatarResolver,
    account_ids: &[String],
) -> HashMap<String, String> {
    if account_ids.is_empty() {
        return HashMap::new();
    }
    match tokio::time::timeout(RESOLVE_TIMEOUT, resolver.resolve(account_ids)).await {
        Ok(Ok(resolved)) => resolved,
        Ok(Err(e)) => {
            warn!(error = %e, accounts = account_ids.len(), "Avatar lookup failed");
            HashMap::new()
        }
        Err(_) => {
            warn!(accounts = account_ids.len(), "Avatar lookup timed out");
            HashMap::new()
        }
    }
}
