//! WhatsApp Cloud API integration: the inbound webhook payload model and
//! the outbound messenger port with its HTTP implementation.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::serde_as;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WhatsAppSettings {
    #[serde(default = "default_api_url")]
    pub api_url: Url,
    pub access_token: String,
    /// Business phone number the platform sends from.
    pub phone_number_id: String,
    /// Shared secret echoed back during webhook subscription.
    pub verify_token: String,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub request_timeout: Duration,
}

fn default_api_url() -> Url {
    Url::parse("https://graph.facebook.com/v19.0/").expect("should be a valid url")
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Error, Debug)]
pub enum MessengerError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("cloud api rejected the message: {status} {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Outbound messaging port; the platform client behind it is an external
/// collaborator.
#[async_trait::async_trait]
pub trait OutboundMessenger: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), MessengerError>;
    async fn send_template(
        &self,
        to: &str,
        template: &str,
        parameters: &[String],
    ) -> Result<(), MessengerError>;
}

pub struct CloudApiClient {
    http: reqwest::Client,
    api_url: Url,
    access_token: String,
    sender_phone_number_id: String,
}

impl CloudApiClient {
    pub fn new(settings: &WhatsAppSettings) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            http,
            api_url: settings.api_url.clone(),
            access_token: settings.access_token.clone(),
            sender_phone_number_id: settings.phone_number_id.clone(),
        })
    }

    async fn post_message(&self, body: serde_json::Value) -> Result<(), MessengerError> {
        let url = self
            .api_url
            .join(&format!("{}/messages", self.sender_phone_number_id))
            .expect("message path should be a valid url");

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MessengerError::Rejected { status, body });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl OutboundMessenger for CloudApiClient {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), MessengerError> {
        self.post_message(json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": body },
        }))
        .await
    }

    async fn send_template(
        &self,
        to: &str,
        template: &str,
        parameters: &[String],
    ) -> Result<(), MessengerError> {
        let parameters = parameters
            .iter()
            .map(|text| json!({ "type": "text", "text": text }))
            .collect::<Vec<_>>();
        self.post_message(json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "template",
            "template": {
                "name": template,
                "language": { "code": "pt_BR" },
                "components": [{ "type": "body", "parameters": parameters }],
            },
        }))
        .await
    }
}

/// Webhook subscription handshake query (`hub.*` parameters).
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: String,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: String,
    #[serde(rename = "hub.challenge")]
    pub challenge: String,
}

impl VerifyQuery {
    pub fn matches(&self, verify_token: &str) -> bool {
        self.mode == "subscribe" && self.verify_token == verify_token
    }
}

/// Inbound webhook payload: `entry[].changes[].value.messages[]`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WebhookPayload {
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

impl WebhookPayload {
    /// Flattens the nesting into (business phone number id, message) pairs.
    pub fn messages(&self) -> impl Iterator<Item = (&str, &InboundMessage)> {
        self.entry
            .iter()
            .flat_map(|entry| &entry.changes)
            .flat_map(|change| {
                let phone_number_id = change.value.metadata.phone_number_id.as_str();
                change
                    .value
                    .messages
                    .iter()
                    .map(move |message| (phone_number_id, message))
            })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WebhookEntry {
    pub id: String,
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WebhookChange {
    pub field: String,
    pub value: WebhookChangeValue,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WebhookChangeValue {
    pub metadata: WebhookMetadata,
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WebhookMetadata {
    #[serde(default)]
    pub display_phone_number: Option<String>,
    pub phone_number_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InboundMessage {
    /// Sender phone number.
    pub from: String,
    pub id: String,
    /// Unix seconds, as a string on the wire.
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<ButtonContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactive: Option<InteractiveContent>,
}

impl InboundMessage {
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        let seconds = self.timestamp.parse::<i64>().ok()?;
        Utc.timestamp_opt(seconds, 0).single()
    }

    /// The participant's answer, normalized across text, button and
    /// interactive message shapes.
    pub fn reply_keyword(&self) -> Option<String> {
        let raw = if let Some(button) = &self.button {
            button.payload.as_deref().unwrap_or(&button.text)
        } else if let Some(interactive) = &self.interactive {
            interactive.button_reply.as_ref()?.id.as_str()
        } else if let Some(text) = &self.text {
            &text.body
        } else {
            return None;
        };
        Some(raw.trim().to_lowercase())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TextContent {
    pub body: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LocationContent {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ButtonContent {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InteractiveContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_reply: Option<ButtonReply>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ButtonReply {
    pub id: String,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"{
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "102290129340398",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "metadata": {
                        "display_phone_number": "15550783881",
                        "phone_number_id": "106540352242922"
                    },
                    "contacts": [{"profile": {"name": "Ana"}, "wa_id": "5511999990000"}],
                    "messages": [
                        {
                            "from": "5511999990000",
                            "id": "wamid.HBgLMTY0NjcwNDM1OTUVAgASGBQzQTdCNTg5RjY1NUMwRUYyRjU1NQA=",
                            "timestamp": "1715342400",
                            "type": "location",
                            "location": {"latitude": -23.5505, "longitude": -46.6333}
                        },
                        {
                            "from": "5511999990000",
                            "id": "wamid.HBgLMTY0NjcwNDM1OTUVAgASGBQzQTdCNTg5RjY1NUMwRUYyRjU1NgA=",
                            "timestamp": "1715342460",
                            "type": "button",
                            "button": {"text": "Confirm", "payload": "CONFIRM"}
                        }
                    ]
                }
            }]
        }]
    }"#;

    #[test]
    fn parses_a_cloud_api_event_payload() {
        let payload: WebhookPayload = serde_json::from_str(SAMPLE).unwrap();
        let messages = payload.messages().collect::<Vec<_>>();
        assert_eq!(messages.len(), 2);

        let (phone_number_id, location_msg) = messages[0];
        assert_eq!(phone_number_id, "106540352242922");
        assert_eq!(location_msg.from, "5511999990000");
        assert_eq!(location_msg.kind, "location");
        let location = location_msg.location.as_ref().unwrap();
        assert_eq!(location.latitude, -23.5505);
        assert_eq!(location.longitude, -46.6333);
        assert_eq!(
            location_msg.timestamp_utc().unwrap(),
            "2024-05-10T12:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );

        let (_, button_msg) = messages[1];
        assert_eq!(button_msg.reply_keyword().as_deref(), Some("confirm"));
    }

    #[test]
    fn reply_keyword_prefers_structured_content_over_text() {
        let message: InboundMessage = serde_json::from_str(
            r#"{
                "from": "5511999990000",
                "id": "wamid.x",
                "timestamp": "1715342400",
                "type": "interactive",
                "interactive": {"type": "button_reply", "button_reply": {"id": "decline", "title": "No"}}
            }"#,
        )
        .unwrap();
        assert_eq!(message.reply_keyword().as_deref(), Some("decline"));

        let message: InboundMessage = serde_json::from_str(
            r#"{"from": "1", "id": "wamid.y", "timestamp": "1715342400", "type": "text", "text": {"body": "  YES "}}"#,
        )
        .unwrap();
        assert_eq!(message.reply_keyword().as_deref(), Some("yes"));
    }

    #[test]
    fn verify_query_requires_the_subscribe_mode_and_matching_token() {
        let query = VerifyQuery {
            mode: "subscribe".into(),
            verify_token: "sekret".into(),
            challenge: "1158201444".into(),
        };
        assert!(query.matches("sekret"));
        assert!(!query.matches("other"));

        let bad_mode = VerifyQuery {
            mode: "unsubscribe".into(),
            ..query
        };
        assert!(!bad_mode.matches("sekret"));
    }

    #[test]
    fn unknown_payload_fields_are_tolerated() {
        // the cloud api adds fields over time; parsing must not break
        let payload: WebhookPayload =
            serde_json::from_str(r#"{"object": "whatsapp_business_account", "entry": []}"#)
                .unwrap();
        assert!(payload.messages().next().is_none());
    }
}
