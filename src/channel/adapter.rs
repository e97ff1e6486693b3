//! `ChannelAdapter` — the boundary trait over the external delivery transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// One reply button of an interactive button message (at most three per node).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyButton {
    pub id: String,
    pub title: String,
}

/// One selectable row of an interactive list section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// A titled section of an interactive list message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<ListRow>,
}

/// A positional substitution value for one template component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateParameter {
    Text(String),
    /// Media reference for header substitution (URL-like values).
    MediaLink(String),
}

/// Parameters for one declared template component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateComponent {
    /// Component kind as declared by the template ("header" or "body").
    pub kind: &'static str,
    pub parameters: Vec<TemplateParameter>,
}

/// A fully-built outbound message, one variant per supported wire shape.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundPayload {
    Text {
        body: String,
    },
    Image {
        link: String,
        caption: String,
    },
    Document {
        link: String,
        filename: String,
        caption: String,
    },
    Location {
        latitude: f64,
        longitude: f64,
        name: String,
        address: String,
    },
    InteractiveButtons {
        body: String,
        buttons: Vec<ReplyButton>,
    },
    InteractiveList {
        body: String,
        button: String,
        sections: Vec<ListSection>,
    },
    Template {
        name: String,
        language: String,
        components: Vec<TemplateComponent>,
    },
}

impl OutboundPayload {
    /// Short wire-type tag, used for chat logging.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundPayload::Text { .. } => "text",
            OutboundPayload::Image { .. } => "image",
            OutboundPayload::Document { .. } => "document",
            OutboundPayload::Location { .. } => "location",
            OutboundPayload::InteractiveButtons { .. } | OutboundPayload::InteractiveList { .. } => {
                "interactive"
            }
            OutboundPayload::Template { .. } => "template",
        }
    }
}

/// Status of a template as reported by the provider.
#[derive(Debug, Clone)]
pub struct RemoteTemplateStatus {
    pub status: String,
    pub rejection_reason: Option<String>,
}

/// Boundary abstraction over the external message-delivery transport.
///
/// `sender_channel_id` is the provider-side identity of the owner's sending
/// number; `to` is the counterparty address.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Send one message. Returns the provider message id.
    async fn send(
        &self,
        sender_channel_id: &str,
        to: &str,
        payload: &OutboundPayload,
    ) -> Result<String, ChannelError>;

    /// Look up the provider-side status of a submitted template by name.
    /// Returns `None` when the provider does not know the template.
    async fn fetch_template_status(
        &self,
        business_id: &str,
        template_name: &str,
    ) -> Result<Option<RemoteTemplateStatus>, ChannelError>;
}
