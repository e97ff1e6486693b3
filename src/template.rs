//! Message templates and provider status synchronization.
//!
//! Template CRUD and submission formatting live outside the gateway; this
//! module carries the consumed surface (the model, approval checks) and the
//! recurring status sync against the provider.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::channel::adapter::ChannelAdapter;
use crate::error::{Error, TemplateError};
use crate::store::Store;

/// Provider review status of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateStatus {
    Pending,
    Submitted,
    Approved,
    Rejected,
}

impl TemplateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateStatus::Pending => "PENDING",
            TemplateStatus::Submitted => "SUBMITTED",
            TemplateStatus::Approved => "APPROVED",
            TemplateStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TemplateStatus::Pending),
            "SUBMITTED" => Some(TemplateStatus::Submitted),
            "APPROVED" => Some(TemplateStatus::Approved),
            "REJECTED" => Some(TemplateStatus::Rejected),
            _ => None,
        }
    }
}

/// A message template as known locally.
#[derive(Debug, Clone)]
pub struct Template {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub language: String,
    pub status: TemplateStatus,
    /// Provider-side template id, present once submitted.
    pub remote_id: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pulls provider review decisions back into the local template rows.
pub struct TemplateSync {
    store: Arc<dyn Store>,
    channel: Arc<dyn ChannelAdapter>,
}

impl TemplateSync {
    pub fn new(store: Arc<dyn Store>, channel: Arc<dyn ChannelAdapter>) -> Self {
        Self { store, channel }
    }

    /// Sync every SUBMITTED template. One failing sync never aborts the batch.
    pub async fn sync_submitted(&self) -> Result<usize, Error> {
        let submitted = self
            .store
            .list_templates_by_status(TemplateStatus::Submitted)
            .await?;
        info!(count = submitted.len(), "Syncing submitted templates");

        let mut synced = 0;
        for template in &submitted {
            match self.sync_one(template.id).await {
                Ok(()) => synced += 1,
                Err(e) => {
                    warn!(template_id = %template.id, error = %e, "Template sync failed");
                }
            }
        }
        Ok(synced)
    }

    /// Fetch one template's provider status and apply it locally.
    ///
    /// Only APPROVED and REJECTED are terminal on the provider side; any
    /// other remote status leaves the local row unchanged.
    pub async fn sync_one(&self, template_id: Uuid) -> Result<(), Error> {
        let template = self
            .store
            .get_template(template_id)
            .await?
            .ok_or(TemplateError::NotFound { id: template_id })?;

        if template.remote_id.is_none() {
            return Err(TemplateError::NotSubmitted { id: template_id }.into());
        }

        let account = self
            .store
            .get_channel_account(template.owner_id)
            .await?
            .ok_or_else(|| crate::error::DatabaseError::NotFound {
                entity: "channel_account".into(),
                id: template.owner_id.to_string(),
            })?;

        let Some(remote) = self
            .channel
            .fetch_template_status(&account.business_id, &template.name)
            .await?
        else {
            warn!(template_id = %template_id, "Provider does not know this template");
            return Ok(());
        };

        match remote.status.as_str() {
            "APPROVED" => {
                self.store
                    .update_template_status(template_id, TemplateStatus::Approved, None)
                    .await?;
                info!(template_id = %template_id, "Template approved");
            }
            "REJECTED" => {
                self.store
                    .update_template_status(
                        template_id,
                        TemplateStatus::Rejected,
                        remote.rejection_reason.as_deref(),
                    )
                    .await?;
                info!(template_id = %template_id, "Template rejected");
            }
            other => {
                tracing::debug!(template_id = %template_id, status = other, "Template still in review");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::channel::adapter::{OutboundPayload, RemoteTemplateStatus};
    use crate::error::ChannelError;
    use crate::store::{ChannelAccount, LibSqlStore};

    /// Serves canned template statuses by name; errors for names in `failing`.
    struct MockProvider {
        statuses: Mutex<HashMap<String, RemoteTemplateStatus>>,
        failing: Vec<String>,
    }

    #[async_trait]
    impl ChannelAdapter for MockProvider {
        async fn send(
            &self,
            _sender_channel_id: &str,
            _to: &str,
            _payload: &OutboundPayload,
        ) -> Result<String, ChannelError> {
            unimplemented!("not used in sync tests")
        }

        async fn fetch_template_status(
            &self,
            _business_id: &str,
            template_name: &str,
        ) -> Result<Option<RemoteTemplateStatus>, ChannelError> {
            if self.failing.iter().any(|n| n == template_name) {
                return Err(ChannelError::Http("provider unavailable".into()));
            }
            Ok(self.statuses.lock().unwrap().get(template_name).cloned())
        }
    }

    struct Fixture {
        sync: TemplateSync,
        store: Arc<LibSqlStore>,
        owner_id: Uuid,
    }

    async fn fixture(
        statuses: &[(&str, &str, Option<&str>)],
        failing: &[&str],
    ) -> Fixture {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let owner_id = Uuid::new_v4();
        store
            .upsert_channel_account(&ChannelAccount {
                owner_id,
                channel_id: "pn-100".into(),
                business_id: "waba-1".into(),
            })
            .await
            .unwrap();

        let provider = Arc::new(MockProvider {
            statuses: Mutex::new(
                statuses
                    .iter()
                    .map(|(name, status, reason)| {
                        (
                            name.to_string(),
                            RemoteTemplateStatus {
                                status: status.to_string(),
                                rejection_reason: reason.map(str::to_string),
                            },
                        )
                    })
                    .collect(),
            ),
            failing: failing.iter().map(|n| n.to_string()).collect(),
        });
        let sync = TemplateSync::new(
            store.clone() as Arc<dyn Store>,
            provider as Arc<dyn ChannelAdapter>,
        );
        Fixture {
            sync,
            store,
            owner_id,
        }
    }

    async fn submitted_template(f: &Fixture, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        f.store
            .insert_template(&Template {
                id,
                owner_id: f.owner_id,
                name: name.into(),
                language: "id".into(),
                status: TemplateStatus::Submitted,
                remote_id: Some(format!("rt-{name}")),
                rejection_reason: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn approval_is_applied_locally() {
        let f = fixture(&[("promo", "APPROVED", None)], &[]).await;
        let id = submitted_template(&f, "promo").await;

        f.sync.sync_one(id).await.unwrap();
        let loaded = f.store.get_template(id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TemplateStatus::Approved);
    }

    #[tokio::test]
    async fn rejection_records_the_reason() {
        let f = fixture(&[("promo", "REJECTED", Some("policy violation"))], &[]).await;
        let id = submitted_template(&f, "promo").await;

        f.sync.sync_one(id).await.unwrap();
        let loaded = f.store.get_template(id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TemplateStatus::Rejected);
        assert_eq!(loaded.rejection_reason.as_deref(), Some("policy violation"));
    }

    #[tokio::test]
    async fn unknown_provider_status_leaves_the_row_unchanged() {
        let f = fixture(&[("promo", "IN_APPEAL", None)], &[]).await;
        let id = submitted_template(&f, "promo").await;

        f.sync.sync_one(id).await.unwrap();
        let loaded = f.store.get_template(id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TemplateStatus::Submitted);
    }

    #[tokio::test]
    async fn unsubmitted_template_is_an_error() {
        let f = fixture(&[], &[]).await;
        let id = Uuid::new_v4();
        f.store
            .insert_template(&Template {
                id,
                owner_id: f.owner_id,
                name: "draft".into(),
                language: "id".into(),
                status: TemplateStatus::Pending,
                remote_id: None,
                rejection_reason: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let err = f.sync.sync_one(id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Template(TemplateError::NotSubmitted { .. })
        ));
    }

    #[tokio::test]
    async fn one_failing_sync_does_not_stop_the_batch() {
        let f = fixture(&[("good", "APPROVED", None)], &["bad"]).await;
        let good = submitted_template(&f, "good").await;
        submitted_template(&f, "bad").await;

        let synced = f.sync.sync_submitted().await.unwrap();
        assert_eq!(synced, 1);
        let loaded = f.store.get_template(good).await.unwrap().unwrap();
        assert_eq!(loaded.status, TemplateStatus::Approved);
    }
}
