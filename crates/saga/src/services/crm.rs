//! CRM sync notifications.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BusinessId, PlanId, SubscriptionId};
use domain::Money;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use crate::error::CrmError;

/// A change the CRM should mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrmSync {
    SubscriptionCreated {
        business_id: BusinessId,
        subscription_id: SubscriptionId,
        plan_id: PlanId,
        amount: Money,
        next_renewal_at: DateTime<Utc>,
    },
    RenewalDateChanged {
        business_id: BusinessId,
        subscription_id: SubscriptionId,
        next_renewal_at: DateTime<Utc>,
    },
}

impl CrmSync {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrmSync::SubscriptionCreated { .. } => "subscription_created",
            CrmSync::RenewalDateChanged { .. } => "renewal_date_changed",
        }
    }

    pub fn business_id(&self) -> BusinessId {
        match self {
            CrmSync::SubscriptionCreated { business_id, .. }
            | CrmSync::RenewalDateChanged { business_id, .. } => *business_id,
        }
    }
}

/// Hands sync requests to the CRM. Callers never wait on the CRM itself.
#[async_trait]
pub trait CrmNotifier: Send + Sync {
    async fn notify(&self, sync: CrmSync) -> Result<(), CrmError>;
}

#[async_trait]
impl<T: CrmNotifier + ?Sized> CrmNotifier for Arc<T> {
    async fn notify(&self, sync: CrmSync) -> Result<(), CrmError> {
        (**self).notify(sync).await
    }
}

/// Attempts per sync before it is abandoned.
pub const CRM_MAX_ATTEMPTS: u32 = 5;

/// Delay before the first retry; doubled after every failed attempt.
pub const CRM_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Sends a sync in the background without waiting for the CRM.
///
/// A failed hand-off is retried with exponential backoff up to
/// [`CRM_MAX_ATTEMPTS`] times, so the CRM may see a sync more than once.
pub fn spawn_sync<C>(crm: C, sync: CrmSync) -> JoinHandle<()>
where
    C: CrmNotifier + 'static,
{
    tokio::spawn(async move {
        let kind = sync.as_str();
        let business_id = sync.business_id();
        let mut backoff = CRM_INITIAL_BACKOFF;

        for attempt in 1..=CRM_MAX_ATTEMPTS {
            match crm.notify(sync.clone()).await {
                Ok(()) => {
                    metrics::counter!("crm_notifications_total", "kind" => kind).increment(1);
                    tracing::debug!(kind, %business_id, attempt, "crm sync queued");
                    return;
                }
                Err(e) if attempt < CRM_MAX_ATTEMPTS => {
                    tracing::warn!(
                        kind,
                        %business_id,
                        attempt,
                        retry_in = ?backoff,
                        error = %e,
                        "crm sync failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    metrics::counter!("crm_notifications_abandoned_total", "kind" => kind)
                        .increment(1);
                    tracing::error!(
                        kind,
                        %business_id,
                        attempts = attempt,
                        error = %e,
                        "crm sync abandoned"
                    );
                }
            }
        }
    })
}

/// Queues sync requests on a channel drained by a forwarding task.
#[derive(Debug, Clone)]
pub struct ChannelCrmNotifier {
    sender: mpsc::Sender<CrmSync>,
}

impl ChannelCrmNotifier {
    /// Creates the notifier and spawns the task that forwards queued syncs.
    ///
    /// Must be called inside a Tokio runtime. The task ends once every
    /// notifier clone is dropped.
    pub fn spawn(capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<CrmSync>(capacity);
        let handle = tokio::spawn(async move {
            while let Some(sync) = receiver.recv().await {
                tracing::info!(
                    kind = sync.as_str(),
                    business_id = %sync.business_id(),
                    "crm sync forwarded"
                );
            }
            tracing::debug!("crm forwarding task stopped");
        });
        (Self { sender }, handle)
    }
}

#[async_trait]
impl CrmNotifier for ChannelCrmNotifier {
    async fn notify(&self, sync: CrmSync) -> Result<(), CrmError> {
        self.sender
            .send(sync)
            .await
            .map_err(|_| CrmError::Unavailable("crm queue closed".to_string()))
    }
}

#[derive(Debug, Default)]
struct InMemoryCrmState {
    syncs: Vec<CrmSync>,
    attempts: usize,
    unavailable: bool,
}

/// Records sync requests for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCrmNotifier {
    state: Arc<RwLock<InMemoryCrmState>>,
    notify: Arc<Notify>,
}

impl InMemoryCrmNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every sync request.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unavailable = unavailable;
    }

    pub fn syncs(&self) -> Vec<CrmSync> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .syncs
            .clone()
    }

    pub fn sync_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .syncs
            .len()
    }

    /// Returns how many sync requests were made, rejected ones included.
    pub fn attempt_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .attempts
    }

    /// Waits until at least `count` syncs were recorded.
    ///
    /// Returns false if that did not happen within `timeout`.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.sync_count() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

#[async_trait]
impl CrmNotifier for InMemoryCrmNotifier {
    async fn notify(&self, sync: CrmSync) -> Result<(), CrmError> {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.attempts += 1;
            if state.unavailable {
                return Err(CrmError::Unavailable("crm offline".to_string()));
            }
            state.syncs.push(sync);
        }
        self.notify.notify_waiters();
        Ok(())
    }
}
