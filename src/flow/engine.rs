//! Flow engine — maps an inbound message plus persisted conversation state
//! to an outbound response and a state transition.
//!
//! `handle_inbound` never propagates errors: the webhook layer must always
//! acknowledge the provider, whatever happened internally.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::channel::adapter::{ChannelAdapter, OutboundPayload};
use crate::error::{DatabaseError, Error, FlowError, QuotaError};
use crate::flow::model::{InboundMessage, NodeContent, ROOT_NODE_ID};
use crate::quota::QuotaGate;
use crate::store::{Direction, Store};

/// Sent when no node matches the trigger key.
const UNKNOWN_COMMAND_TEXT: &str =
    "Unknown command. Type \"root\" to see the available menu.";

/// Sent instead of the resolved node when the owner's quota is used up.
const QUOTA_EXHAUSTED_TEXT: &str =
    "Sorry, we cannot reply right now: this account's message quota has been used up.";

/// Best-effort fallback for any other internal failure.
const FALLBACK_TEXT: &str = "Sorry, something went wrong. Please try again later.";

/// Routes inbound messages through the owner's active flow.
pub struct FlowEngine {
    store: Arc<dyn Store>,
    channel: Arc<dyn ChannelAdapter>,
    quota: QuotaGate,
}

impl FlowEngine {
    pub fn new(store: Arc<dyn Store>, channel: Arc<dyn ChannelAdapter>, quota: QuotaGate) -> Self {
        Self {
            store,
            channel,
            quota,
        }
    }

    /// Handle one inbound message, end to end.
    ///
    /// Failures are caught here: the engine attempts a best-effort notice to
    /// the sender and swallows a secondary failure from that fallback.
    pub async fn handle_inbound(&self, channel_id: &str, from: &str, message: InboundMessage) {
        if let Err(e) = self.process(channel_id, from, &message).await {
            warn!(channel_id, from, error = %e, "Inbound processing failed");

            let notice = match &e {
                Error::Quota(QuotaError::Exhausted { .. }) => QUOTA_EXHAUSTED_TEXT,
                _ => FALLBACK_TEXT,
            };
            let payload = OutboundPayload::Text {
                body: notice.to_string(),
            };
            if let Err(send_err) = self.channel.send(channel_id, from, &payload).await {
                warn!(channel_id, from, error = %send_err, "Fallback notice failed");
            }
        }
    }

    async fn process(
        &self,
        channel_id: &str,
        from: &str,
        message: &InboundMessage,
    ) -> Result<(), Error> {
        let account = self
            .store
            .get_channel_account_by_channel_id(channel_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "channel_account".into(),
                id: channel_id.to_string(),
            })?;
        let owner_id = account.owner_id;

        self.quota.check_and_deduct(owner_id).await?;

        let trigger = message
            .trigger_key()
            .ok_or_else(|| FlowError::UnsupportedMessageType {
                kind: message.log_content(),
            })?;

        let flow = self
            .store
            .get_active_flow(owner_id)
            .await?
            .ok_or(FlowError::NoActiveFlow { owner_id })?;

        self.store
            .insert_chat_log(
                owner_id,
                from,
                Direction::In,
                &message.log_content(),
                Some(&trigger),
            )
            .await?;

        let state = self.store.get_chat_state(owner_id, from).await?;

        let resolved = match &state {
            // First contact: direct node id, else the root node.
            None => flow
                .nodes
                .get_key_value(&trigger)
                .or_else(|| flow.nodes.get_key_value(ROOT_NODE_ID)),
            // Known counterparty: node scoped to the current state label
            // first, then a global node id lookup.
            Some(state) => flow
                .nodes
                .get_key_value(&trigger)
                .filter(|(_, node)| node.state == state.current_state)
                .or_else(|| flow.nodes.get_key_value(&trigger)),
        };

        let Some((node_id, node)) = resolved else {
            // No node resolved: fixed notice, no state transition.
            let payload = OutboundPayload::Text {
                body: UNKNOWN_COMMAND_TEXT.to_string(),
            };
            self.channel.send(channel_id, from, &payload).await?;
            self.store
                .insert_chat_log(owner_id, from, Direction::Out, UNKNOWN_COMMAND_TEXT, None)
                .await?;
            debug!(owner_id = %owner_id, trigger, "No node resolved");
            return Ok(());
        };

        let payload = build_payload(node_id, &node.content)?;
        self.channel.send(channel_id, from, &payload).await?;

        if let Some(followup) = &node.followup {
            let followup_payload = build_payload(node_id, followup)?;
            self.channel.send(channel_id, from, &followup_payload).await?;
        }

        self.store
            .insert_chat_log(
                owner_id,
                from,
                Direction::Out,
                &out_log_content(&payload),
                Some(&node.state),
            )
            .await?;
        self.store
            .upsert_chat_state(owner_id, from, &node.state)
            .await?;

        debug!(owner_id = %owner_id, node_id, state = %node.state, "Transition complete");
        Ok(())
    }
}

/// Build the outbound payload for one node content variant.
pub fn build_payload(node_id: &str, content: &NodeContent) -> Result<OutboundPayload, FlowError> {
    use crate::flow::model::InteractiveContent;

    Ok(match content {
        NodeContent::Text(body) => OutboundPayload::Text { body: body.clone() },
        NodeContent::Image { link, caption } => OutboundPayload::Image {
            link: link.clone(),
            caption: caption.clone(),
        },
        NodeContent::Document {
            link,
            filename,
            caption,
        } => OutboundPayload::Document {
            link: link.clone(),
            filename: filename.clone(),
            caption: caption.clone(),
        },
        NodeContent::Location {
            latitude,
            longitude,
            name,
            address,
        } => OutboundPayload::Location {
            latitude: *latitude,
            longitude: *longitude,
            name: name.clone(),
            address: address.clone(),
        },
        NodeContent::Interactive(InteractiveContent::Button { body, buttons }) => {
            // Flows predating validation may still carry an oversized row.
            if buttons.is_empty() || buttons.len() > crate::flow::model::MAX_REPLY_BUTTONS {
                return Err(FlowError::UnsupportedNodeVariant {
                    node_id: node_id.to_string(),
                    reason: format!("{} reply buttons", buttons.len()),
                });
            }
            OutboundPayload::InteractiveButtons {
                body: body.clone(),
                buttons: buttons.clone(),
            }
        }
        NodeContent::Interactive(InteractiveContent::List {
            body,
            button,
            sections,
        }) => {
            if sections.is_empty() {
                return Err(FlowError::UnsupportedNodeVariant {
                    node_id: node_id.to_string(),
                    reason: "empty list sections".into(),
                });
            }
            OutboundPayload::InteractiveList {
                body: body.clone(),
                button: button.clone(),
                sections: sections.clone(),
            }
        }
    })
}

/// Loggable text form of an outbound payload.
fn out_log_content(payload: &OutboundPayload) -> String {
    match payload {
        OutboundPayload::Text { body } => body.clone(),
        other => format!("[{}]", other.kind()),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
