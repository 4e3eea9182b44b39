//! The permission-check seam (spec §4.3, §7): before the WS multiplexer
//! subscribes a request, it consults this trait the same way the SSE
//! handler consults `SnapshotBuilder` before building the initial frame.
//! Denials never register a subscription and never retry.

use async_trait::async_trait;
use stream_protocol::{PermissionDeniedDetails, ScopeKey};

#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// `Ok(())` admits the subscription; `Err(details)` denies it.
    async fn check(&self, scope: &ScopeKey) -> Result<(), PermissionDeniedDetails>;
}

/// Default checker: every scope is admitted. Used wherever no access
/// control adapter is wired in.
pub struct AllowAll;

#[async_trait]
impl PermissionChecker for AllowAll {
    async fn check(&self, _scope: &ScopeKey) -> Result<(), PermissionDeniedDetails> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_protocol::SubScope;

    #[tokio::test]
    async fn allow_all_admits_every_scope() {
        let scope = ScopeKey::new("", &SubScope::Cluster);
        assert!(AllowAll.check(&scope).await.is_ok());
    }
}
