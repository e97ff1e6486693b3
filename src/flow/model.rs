//! Flow data model — an owner's conversational decision tree.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::adapter::{ListSection, ReplyButton};
use crate::error::FlowError;

/// Maximum reply buttons the provider accepts on one interactive message.
pub const MAX_REPLY_BUTTONS: usize = 3;

/// The node id a fresh conversation falls back to.
pub const ROOT_NODE_ID: &str = "root";

/// An owner's conversational decision tree, keyed by node identifiers.
#[derive(Debug, Clone)]
pub struct Flow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub nodes: HashMap<String, Node>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One step of a flow: content to send plus the state label it represents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Conversation-state label this node represents.
    pub state: String,
    #[serde(flatten)]
    pub content: NodeContent,
    /// Menu-style branching: trigger token → target node identifier.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub options: HashMap<String, String>,
    /// Secondary content block sent right after the primary content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followup: Option<NodeContent>,
}

/// Variant-specific node payload, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum NodeContent {
    Text(String),
    Image {
        link: String,
        #[serde(default)]
        caption: String,
    },
    Document {
        link: String,
        filename: String,
        #[serde(default)]
        caption: String,
    },
    Location {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        name: String,
        #[serde(default)]
        address: String,
    },
    Interactive(InteractiveContent),
}

/// Interactive node payload, tagged by `subtype`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subtype", rename_all = "lowercase")]
pub enum InteractiveContent {
    Button {
        body: String,
        buttons: Vec<ReplyButton>,
    },
    List {
        body: String,
        /// Label of the list-opening button.
        button: String,
        sections: Vec<ListSection>,
    },
}

/// A classified inbound message as delivered by the webhook layer.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Text { body: String },
    /// Reply to an interactive message, carrying the selected button/row id.
    InteractiveReply { id: String },
    /// Anything the flow engine does not handle (media, stickers, ...).
    Unsupported { kind: String },
}

impl InboundMessage {
    /// The normalized trigger key used to look up the next node.
    pub fn trigger_key(&self) -> Option<String> {
        match self {
            InboundMessage::Text { body } => Some(body.trim().to_lowercase()),
            InboundMessage::InteractiveReply { id } => Some(id.clone()),
            InboundMessage::Unsupported { .. } => None,
        }
    }

    /// Loggable text form of the message.
    pub fn log_content(&self) -> String {
        match self {
            InboundMessage::Text { body } => body.clone(),
            InboundMessage::InteractiveReply { id } => format!("[reply] {id}"),
            InboundMessage::Unsupported { kind } => format!("[unsupported:{kind}]"),
        }
    }
}

/// Validate a node graph at flow creation/update time.
///
/// Checks the constraints serde cannot express: button count, non-empty
/// list sections, and `options` targets referencing existing nodes.
pub fn validate_nodes(nodes: &HashMap<String, Node>) -> Result<(), FlowError> {
    if nodes.is_empty() {
        return Err(FlowError::Validation("flow has no nodes".into()));
    }

    for (id, node) in nodes {
        validate_content(id, &node.content)?;
        if let Some(followup) = &node.followup {
            validate_content(id, followup)?;
        }
        for target in node.options.values() {
            if !nodes.contains_key(target) {
                return Err(FlowError::Validation(format!(
                    "node {id} option targets unknown node {target}"
                )));
            }
        }
    }
    Ok(())
}

fn validate_content(id: &str, content: &NodeContent) -> Result<(), FlowError> {
    match content {
        NodeContent::Interactive(InteractiveContent::Button { buttons, .. }) => {
            if buttons.is_empty() || buttons.len() > MAX_REPLY_BUTTONS {
                return Err(FlowError::Validation(format!(
                    "node {id} must carry between 1 and {MAX_REPLY_BUTTONS} reply buttons"
                )));
            }
        }
        NodeContent::Interactive(InteractiveContent::List { sections, .. }) => {
            if sections.is_empty() || sections.iter().any(|s| s.rows.is_empty()) {
                return Err(FlowError::Validation(format!(
                    "node {id} list sections must be non-empty"
                )));
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_node(state: &str, body: &str) -> Node {
        Node {
            state: state.into(),
            content: NodeContent::Text(body.into()),
            options: HashMap::new(),
            followup: None,
        }
    }

    #[test]
    fn node_json_round_trip() {
        let raw = json!({
            "type": "interactive",
            "state": "menu",
            "content": {
                "subtype": "button",
                "body": "Pick one",
                "buttons": [
                    { "id": "info", "title": "Info" },
                    { "id": "order", "title": "Order" }
                ]
            },
            "options": { "info": "info_node" }
        });
        // options target only checked by validate_nodes, not deserialization
        let node: Node = serde_json::from_value(raw).unwrap();
        assert_eq!(node.state, "menu");
        match &node.content {
            NodeContent::Interactive(InteractiveContent::Button { buttons, .. }) => {
                assert_eq!(buttons.len(), 2);
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_rejected_at_parse_time() {
        let raw = json!({ "type": "sticker", "state": "root", "content": "x" });
        assert!(serde_json::from_value::<Node>(raw).is_err());
    }

    #[test]
    fn interactive_without_subtype_is_rejected() {
        let raw = json!({
            "type": "interactive",
            "state": "root",
            "content": { "body": "Pick one" }
        });
        assert!(serde_json::from_value::<Node>(raw).is_err());
    }

    #[test]
    fn validate_rejects_too_many_buttons() {
        let mut nodes = HashMap::new();
        nodes.insert(
            "root".to_string(),
            Node {
                state: "root".into(),
                content: NodeContent::Interactive(InteractiveContent::Button {
                    body: "Pick".into(),
                    buttons: (0..4)
                        .map(|i| ReplyButton {
                            id: format!("b{i}"),
                            title: format!("B{i}"),
                        })
                        .collect(),
                }),
                options: HashMap::new(),
                followup: None,
            },
        );
        assert!(validate_nodes(&nodes).is_err());
    }

    #[test]
    fn validate_rejects_dangling_option_target() {
        let mut nodes = HashMap::new();
        let mut node = text_node("root", "hi");
        node.options.insert("1".into(), "missing".into());
        nodes.insert("root".to_string(), node);
        assert!(validate_nodes(&nodes).is_err());
    }

    #[test]
    fn validate_accepts_well_formed_graph() {
        let mut nodes = HashMap::new();
        let mut root = text_node("root", "Welcome");
        root.options.insert("1".into(), "help".into());
        nodes.insert("root".to_string(), root);
        nodes.insert("help".to_string(), text_node("help", "Help text"));
        assert!(validate_nodes(&nodes).is_ok());
    }

    #[test]
    fn trigger_key_normalizes_text() {
        let msg = InboundMessage::Text {
            body: "  MeNu \n".into(),
        };
        assert_eq!(msg.trigger_key().unwrap(), "menu");
    }

    #[test]
    fn trigger_key_uses_reply_id_verbatim() {
        let msg = InboundMessage::InteractiveReply {
            id: "Row_2".into(),
        };
        assert_eq!(msg.trigger_key().unwrap(), "Row_2");
    }
}
