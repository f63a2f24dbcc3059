use super::WebhookError;
use dsps_types::Message;
use serde::{Deserialize, Serialize};

pub const WEBHOOK_BODY_TYPE: &str = "dsps.channel.outgoing-webhook";

/// JSON payload POSTed (or PUT) to webhook endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookBody {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "channelID")]
    pub channel_id: String,
    #[serde(rename = "messageID")]
    pub message_id: String,
    pub content: serde_json::Value,
}

pub fn encode_webhook_body(msg: &Message) -> Result<String, WebhookError> {
    let body = WebhookBody {
        kind: WEBHOOK_BODY_TYPE.to_string(),
        channel_id: msg.channel_id().to_string(),
        message_id: msg.message_id().to_string(),
        content: msg.content.clone(),
    };
    serde_json::to_string(&body).map_err(WebhookError::Body)
}
