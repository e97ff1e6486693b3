//! Blast dispatcher — runs one campaign's recipient loop to completion.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::blast::model::{Blast, BlastStatus, ComponentParams};
use crate::channel::adapter::{
    ChannelAdapter, OutboundPayload, TemplateComponent, TemplateParameter,
};
use crate::config::GatewayConfig;
use crate::error::{BlastError, Error, TemplateError};
use crate::quota::QuotaGate;
use crate::store::Store;
use crate::template::{Template, TemplateStatus};

/// Who asked for this dispatch.
///
/// A manual request reports precondition failures back to the caller; a
/// scheduler-originated one treats them as already-handled and skips quietly,
/// since the sweep and a live timer may race for the same blast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOrigin {
    Manual,
    Scheduled,
}

/// Executes blasts: precondition checks, the paced recipient loop, and the
/// final outcome record.
pub struct BlastDispatcher {
    store: Arc<dyn Store>,
    channel: Arc<dyn ChannelAdapter>,
    quota: QuotaGate,
    config: GatewayConfig,
}

impl BlastDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        channel: Arc<dyn ChannelAdapter>,
        quota: QuotaGate,
        config: GatewayConfig,
    ) -> Self {
        Self {
            store,
            channel,
            quota,
            config,
        }
    }

    /// Dispatch one blast to its full recipient list.
    ///
    /// Per-recipient failures never abort the loop; they are counted and the
    /// blast is finalized FAILED only when every recipient failed.
    pub async fn dispatch(&self, blast_id: Uuid, origin: DispatchOrigin) -> Result<(), Error> {
        let blast = self
            .store
            .get_blast(blast_id)
            .await?
            .ok_or(BlastError::NotFound { id: blast_id })?;

        if !blast.status.is_pending() {
            if origin == DispatchOrigin::Scheduled {
                // The sweep and a live timer can both pick the same blast up;
                // whoever comes second finds it already moved on.
                info!(blast_id = %blast_id, status = blast.status.as_str(), "Blast already handled, skipping");
                return Ok(());
            }
            return Err(BlastError::InvalidState {
                id: blast_id,
                status: blast.status.as_str().to_string(),
                action: "dispatched",
            }
            .into());
        }
        if origin == DispatchOrigin::Manual {
            if let Some(scheduled_at) = blast.scheduled_at {
                if scheduled_at > Utc::now() {
                    return Err(BlastError::NotYetDue {
                        id: blast_id,
                        scheduled_at,
                    }
                    .into());
                }
            }
        }

        let account = self
            .store
            .get_channel_account(blast.owner_id)
            .await?
            .ok_or(BlastError::NoChannelAccount {
                owner_id: blast.owner_id,
            })?;

        let template = self
            .store
            .get_template(blast.template_id)
            .await?
            .ok_or(TemplateError::NotFound {
                id: blast.template_id,
            })?;
        if template.status != TemplateStatus::Approved {
            return Err(TemplateError::NotApproved {
                id: template.id,
                status: template.status.as_str().to_string(),
            }
            .into());
        }

        // One conditional update claims the blast (DRAFT/SCHEDULED →
        // PROCESSING), so concurrent dispatchers cannot both run the loop.
        // It also makes the blast visibly in-flight before the first send.
        if !self.store.claim_blast_for_dispatch(blast_id).await? {
            if origin == DispatchOrigin::Scheduled {
                info!(blast_id = %blast_id, "Blast claimed elsewhere, skipping");
                return Ok(());
            }
            let status = self
                .store
                .get_blast(blast_id)
                .await?
                .map(|b| b.status.as_str().to_string())
                .unwrap_or_else(|| "DELETED".to_string());
            return Err(BlastError::InvalidState {
                id: blast_id,
                status,
                action: "dispatched",
            }
            .into());
        }
        info!(
            blast_id = %blast_id,
            recipients = blast.recipients.len(),
            template = %template.name,
            "Blast dispatch started"
        );

        let (sent, failed) = self.run_recipient_loop(&blast, &template, &account.channel_id).await;

        let total = blast.recipients.len() as u32;
        let status = if sent == 0 && total > 0 {
            BlastStatus::Failed
        } else {
            BlastStatus::Completed
        };
        self.store
            .finalize_blast(blast_id, status, sent, failed, Utc::now())
            .await?;
        info!(
            blast_id = %blast_id,
            status = status.as_str(),
            sent,
            failed,
            "Blast dispatch finished"
        );
        Ok(())
    }

    async fn run_recipient_loop(
        &self,
        blast: &Blast,
        template: &Template,
        channel_id: &str,
    ) -> (u32, u32) {
        let mut sent: u32 = 0;
        let mut failed: u32 = 0;

        for recipient in &blast.recipients {
            let params = blast.parameters_for(recipient);
            let payload = OutboundPayload::Template {
                name: template.name.clone(),
                language: template.language.clone(),
                components: build_components(params),
            };

            match self.send_one(blast, channel_id, recipient, &payload).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    failed += 1;
                    warn!(blast_id = %blast.id, recipient, error = %e, "Blast send failed");
                }
            }

            // Fixed pacing keeps us under the provider's per-second ceiling.
            tokio::time::sleep(self.config.blast_pacing).await;
        }
        (sent, failed)
    }

    async fn send_one(
        &self,
        blast: &Blast,
        channel_id: &str,
        recipient: &str,
        payload: &OutboundPayload,
    ) -> Result<(), Error> {
        // Each recipient spends one quota unit; exhaustion mid-blast fails
        // the remaining recipients without aborting the loop.
        self.quota.check_and_deduct(blast.owner_id).await?;
        self.channel.send(channel_id, recipient, payload).await?;
        Ok(())
    }
}

/// Translate stored substitution values into wire template components.
///
/// Header values that look like URLs become media links; anything else is a
/// text parameter.
fn build_components(params: &ComponentParams) -> Vec<TemplateComponent> {
    let mut components = Vec::new();
    if !params.header.is_empty() {
        components.push(TemplateComponent {
            kind: "header",
            parameters: params
                .header
                .iter()
                .map(|v| {
                    if v.starts_with("http://") || v.starts_with("https://") {
                        TemplateParameter::MediaLink(v.clone())
                    } else {
                        TemplateParameter::Text(v.clone())
                    }
                })
                .collect(),
        });
    }
    if !params.body.is_empty() {
        components.push(TemplateComponent {
            kind: "body",
            parameters: params
                .body
                .iter()
                .map(|v| TemplateParameter::Text(v.clone()))
                .collect(),
        });
    }
    components
}
