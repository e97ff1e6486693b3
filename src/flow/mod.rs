//! Conversation flow definitions and the flow engine.

pub mod engine;
pub mod model;
pub mod service;

pub use engine::FlowEngine;
pub use model::{Flow, InboundMessage, Node, NodeContent, validate_nodes};
pub use service::{FlowService, FlowUpdate};
