//! Blast management — create, update, send, cancel and delete campaigns.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::blast::dispatcher::{BlastDispatcher, DispatchOrigin};
use crate::blast::model::{Blast, BlastStatus, BlastUpdate, NewBlast, dedup_recipients};
use crate::blast::scheduler::BlastScheduler;
use crate::error::{BlastError, Error, TemplateError};
use crate::store::Store;
use crate::template::TemplateStatus;

/// Owner-facing blast operations.
pub struct BlastService {
    store: Arc<dyn Store>,
    dispatcher: Arc<BlastDispatcher>,
    scheduler: Arc<BlastScheduler>,
}

impl BlastService {
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: Arc<BlastDispatcher>,
        scheduler: Arc<BlastScheduler>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            scheduler,
        }
    }

    /// Create a blast. A `scheduled_at` makes it SCHEDULED with a live timer;
    /// otherwise it stays DRAFT until sent manually.
    pub async fn create_blast(&self, owner_id: Uuid, input: NewBlast) -> Result<Blast, Error> {
        let recipients = dedup_recipients(&input.recipients);
        if recipients.is_empty() {
            return Err(BlastError::Validation("recipient list is empty".into()).into());
        }
        if input.name.trim().is_empty() {
            return Err(BlastError::Validation("name is empty".into()).into());
        }
        self.approved_template(owner_id, input.template_id).await?;

        let status = if input.scheduled_at.is_some() {
            BlastStatus::Scheduled
        } else {
            BlastStatus::Draft
        };
        let now = Utc::now();
        let blast = Blast {
            id: Uuid::new_v4(),
            owner_id,
            template_id: input.template_id,
            name: input.name,
            status,
            total_recipients: recipients.len() as u32,
            recipients,
            parameters: input.parameters,
            recipient_parameters: input.recipient_parameters,
            scheduled_at: input.scheduled_at,
            sent_count: 0,
            failed_count: 0,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_blast(&blast).await?;

        if let Some(at) = blast.scheduled_at {
            self.scheduler.schedule(blast.id, at);
        }
        info!(blast_id = %blast.id, status = blast.status.as_str(), "Blast created");
        Ok(blast)
    }

    /// Update a pending blast. A new `scheduled_at` re-arms the timer and
    /// moves a DRAFT to SCHEDULED.
    pub async fn update_blast(
        &self,
        owner_id: Uuid,
        blast_id: Uuid,
        update: BlastUpdate,
    ) -> Result<Blast, Error> {
        let mut blast = self.owned_blast(owner_id, blast_id).await?;
        if !blast.status.is_pending() {
            return Err(invalid_state(&blast, "updated").into());
        }

        if let Some(name) = update.name {
            blast.name = name;
        }
        if let Some(recipients) = update.recipients {
            let recipients = dedup_recipients(&recipients);
            if recipients.is_empty() {
                return Err(BlastError::Validation("recipient list is empty".into()).into());
            }
            blast.total_recipients = recipients.len() as u32;
            blast.recipients = recipients;
        }
        if let Some(parameters) = update.parameters {
            blast.parameters = parameters;
        }
        if let Some(recipient_parameters) = update.recipient_parameters {
            blast.recipient_parameters = recipient_parameters;
        }
        if let Some(at) = update.scheduled_at {
            blast.scheduled_at = Some(at);
            blast.status = BlastStatus::Scheduled;
        }
        blast.updated_at = Utc::now();

        self.store.update_blast(&blast).await?;
        if let Some(at) = update.scheduled_at {
            // schedule() replaces any timer already armed for this id.
            self.scheduler.schedule(blast.id, at);
        }
        Ok(blast)
    }

    /// Dispatch a pending blast right now, on the caller's behalf.
    pub async fn send_blast(&self, owner_id: Uuid, blast_id: Uuid) -> Result<Blast, Error> {
        self.owned_blast(owner_id, blast_id).await?;
        self.dispatcher
            .dispatch(blast_id, DispatchOrigin::Manual)
            .await?;
        // A timer may still be armed from an earlier schedule; it would skip
        // anyway, but there is no reason to let it fire.
        self.scheduler.cancel(blast_id);
        self.owned_blast(owner_id, blast_id).await
    }

    /// Withdraw a SCHEDULED blast before its timer fires.
    pub async fn cancel_blast(&self, owner_id: Uuid, blast_id: Uuid) -> Result<(), Error> {
        let blast = self.owned_blast(owner_id, blast_id).await?;
        if blast.status != BlastStatus::Scheduled {
            return Err(invalid_state(&blast, "cancelled").into());
        }
        self.store
            .set_blast_status(blast_id, BlastStatus::Cancelled)
            .await?;
        self.scheduler.cancel(blast_id);
        info!(blast_id = %blast_id, "Blast cancelled");
        Ok(())
    }

    pub async fn delete_blast(&self, owner_id: Uuid, blast_id: Uuid) -> Result<(), Error> {
        let blast = self.owned_blast(owner_id, blast_id).await?;
        if blast.status == BlastStatus::Processing {
            return Err(invalid_state(&blast, "deleted").into());
        }
        self.scheduler.cancel(blast_id);
        self.store.delete_blast(blast_id).await?;
        info!(blast_id = %blast_id, "Blast deleted");
        Ok(())
    }

    pub async fn get_blast(&self, owner_id: Uuid, blast_id: Uuid) -> Result<Blast, Error> {
        self.owned_blast(owner_id, blast_id).await
    }

    pub async fn list_blasts(
        &self,
        owner_id: Uuid,
        status: Option<BlastStatus>,
    ) -> Result<Vec<Blast>, Error> {
        Ok(self.store.list_blasts(owner_id, status).await?)
    }

    async fn owned_blast(&self, owner_id: Uuid, blast_id: Uuid) -> Result<Blast, Error> {
        let blast = self
            .store
            .get_blast(blast_id)
            .await?
            .ok_or(BlastError::NotFound { id: blast_id })?;
        if blast.owner_id != owner_id {
            return Err(BlastError::Forbidden { id: blast_id }.into());
        }
        Ok(blast)
    }

    async fn approved_template(&self, owner_id: Uuid, template_id: Uuid) -> Result<(), Error> {
        let template = self
            .store
            .get_template(template_id)
            .await?
            .ok_or(TemplateError::NotFound { id: template_id })?;
        if template.owner_id != owner_id {
            return Err(TemplateError::Forbidden { id: template_id }.into());
        }
        if template.status != TemplateStatus::Approved {
            return Err(TemplateError::NotApproved {
                id: template_id,
                status: template.status.as_str().to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn invalid_state(blast: &Blast, action: &'static str) -> BlastError {
    BlastError::InvalidState {
        id: blast.id,
        status: blast.status.as_str().to_string(),
        action,
    }
}
