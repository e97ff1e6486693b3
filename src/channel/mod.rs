//! Channel abstraction for outbound message delivery.

pub mod adapter;
pub mod cloud;

pub use adapter::{
    ChannelAdapter, ListRow, ListSection, OutboundPayload, RemoteTemplateStatus, ReplyButton,
    TemplateComponent, TemplateParameter,
};
pub use cloud::{CloudApiChannel, CloudApiConfig};
