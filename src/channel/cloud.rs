//! Cloud API channel — concrete `ChannelAdapter` over the provider's Graph API.

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use async_trait::async_trait;

use crate::channel::adapter::{
    ChannelAdapter, OutboundPayload, RemoteTemplateStatus, TemplateParameter,
};
use crate::error::ChannelError;

/// Connection settings for the Cloud API.
#[derive(Debug, Clone)]
pub struct CloudApiConfig {
    /// API origin, e.g. `https://graph.facebook.com`.
    pub base_url: String,
    /// API version segment, e.g. `v19.0`.
    pub api_version: String,
    pub access_token: SecretString,
}

/// Cloud API channel adapter.
pub struct CloudApiChannel {
    config: CloudApiConfig,
    client: reqwest::Client,
}

impl CloudApiChannel {
    pub fn new(config: CloudApiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{path}",
            self.config.base_url, self.config.api_version
        )
    }

    /// Build the provider message body for a payload variant.
    fn message_body(to: &str, payload: &OutboundPayload) -> Value {
        let mut body = json!({
            "messaging_product": "whatsapp",
            "to": to,
        });

        let (kind, content) = match payload {
            OutboundPayload::Text { body } => ("text", json!({ "body": body })),
            OutboundPayload::Image { link, caption } => {
                ("image", json!({ "link": link, "caption": caption }))
            }
            OutboundPayload::Document {
                link,
                filename,
                caption,
            } => (
                "document",
                json!({ "link": link, "filename": filename, "caption": caption }),
            ),
            OutboundPayload::Location {
                latitude,
                longitude,
                name,
                address,
            } => (
                "location",
                json!({
                    "latitude": latitude,
                    "longitude": longitude,
                    "name": name,
                    "address": address,
                }),
            ),
            OutboundPayload::InteractiveButtons { body, buttons } => (
                "interactive",
                json!({
                    "type": "button",
                    "body": { "text": body },
                    "action": {
                        "buttons": buttons.iter().map(|b| json!({
                            "type": "reply",
                            "reply": { "id": b.id, "title": b.title },
                        })).collect::<Vec<_>>(),
                    },
                }),
            ),
            OutboundPayload::InteractiveList {
                body,
                button,
                sections,
            } => (
                "interactive",
                json!({
                    "type": "list",
                    "body": { "text": body },
                    "action": {
                        "button": button,
                        "sections": sections.iter().map(|s| json!({
                            "title": s.title,
                            "rows": s.rows.iter().map(|r| json!({
                                "id": r.id,
                                "title": r.title,
                                "description": r.description,
                            })).collect::<Vec<_>>(),
                        })).collect::<Vec<_>>(),
                    },
                }),
            ),
            OutboundPayload::Template {
                name,
                language,
                components,
            } => (
                "template",
                json!({
                    "name": name,
                    "language": { "code": language },
                    "components": components.iter().map(|c| json!({
                        "type": c.kind,
                        "parameters": c.parameters.iter().map(|p| match p {
                            TemplateParameter::Text(text) => {
                                json!({ "type": "text", "text": text })
                            }
                            TemplateParameter::MediaLink(link) => {
                                json!({ "type": "image", "image": { "link": link } })
                            }
                        }).collect::<Vec<_>>(),
                    })).collect::<Vec<_>>(),
                }),
            ),
        };

        body["type"] = json!(kind);
        body[kind] = content;
        body
    }
}

#[async_trait]
impl ChannelAdapter for CloudApiChannel {
    async fn send(
        &self,
        sender_channel_id: &str,
        to: &str,
        payload: &OutboundPayload,
    ) -> Result<String, ChannelError> {
        let url = self.api_url(&format!("{sender_channel_id}/messages"));
        let body = Self::message_body(to, payload);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.config.access_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        let status = resp.status();
        let value: Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::InvalidResponse(e.to_string()))?;

        if !status.is_success() {
            let code = value["error"]["code"]
                .as_i64()
                .map(|c| c.to_string())
                .unwrap_or_else(|| status.as_u16().to_string());
            let message = value["error"]["message"]
                .as_str()
                .unwrap_or("unknown provider error")
                .to_string();
            return Err(ChannelError::Rejected { code, message });
        }

        value["messages"][0]["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                ChannelError::InvalidResponse("send response carried no message id".into())
            })
    }

    async fn fetch_template_status(
        &self,
        business_id: &str,
        template_name: &str,
    ) -> Result<Option<RemoteTemplateStatus>, ChannelError> {
        let url = self.api_url(&format!(
            "{business_id}/message_templates?name={template_name}"
        ));

        let resp = self
            .client
            .get(&url)
            .bearer_auth(self.config.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ChannelError::Http(format!(
                "template lookup returned {}",
                resp.status()
            )));
        }

        let value: Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::InvalidResponse(e.to_string()))?;

        let Some(remote) = value["data"].as_array().and_then(|d| d.first()) else {
            return Ok(None);
        };

        let status = remote["status"]
            .as_str()
            .ok_or_else(|| ChannelError::InvalidResponse("template entry without status".into()))?
            .to_string();
        let rejection_reason = remote["quality_score"]["reason"]
            .as_str()
            .map(str::to_string);

        Ok(Some(RemoteTemplateStatus {
            status,
            rejection_reason,
        }))
    }
}
