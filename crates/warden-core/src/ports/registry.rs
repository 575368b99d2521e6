//! Registry port - 分散メンバーシップサービス
//!
//! 本番では ZooKeeper や etcd 相当を想定。登録は ephemeral（所有セッションが
//! 死ぬと消える）で、離脱は購読を通じて peer に通知される。

use std::collections::HashSet;

use async_trait::async_trait;

use crate::domain::{CoordinationError, HostId};

/// Membership change delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    MemberAdded(HostId),
    MemberRemoved(HostId),
}

/// Subscription callback.
///
/// Runs on the registry client's delivery context: it must not block. Hand
/// the event off to a channel and return.
pub type MembershipListener = Box<dyn Fn(MembershipEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Registry capability consumed by the membership coordinator.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Create this host's ephemeral registration.
    async fn register(&self, host: &HostId) -> Result<(), CoordinationError>;

    async fn unregister(&self, host: &HostId) -> Result<(), CoordinationError>;

    /// Keep the registration alive. `NotRegistered` when the session expired.
    async fn renew(&self, host: &HostId) -> Result<(), CoordinationError>;

    async fn list_members(&self) -> Result<HashSet<HostId>, CoordinationError>;

    fn subscribe(&self, listener: MembershipListener) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);

    /// Non-blocking attempt at a named mutual-exclusion lock.
    /// `Ok(false)` when another host holds it.
    async fn try_lock(&self, name: &str, owner: &HostId) -> Result<bool, CoordinationError>;

    async fn unlock(&self, name: &str, owner: &HostId) -> Result<(), CoordinationError>;
}
