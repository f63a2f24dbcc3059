use super::{Client, WebhookError};
use async_trait::async_trait;
use dsps_telemetry::{log_event, CATEGORY_OUTGOING_WEBHOOK};
use dsps_types::{Context, Message};
use futures::future::join_all;
use std::fmt;

/// Sends every message to each wrapped client in turn.
pub struct MultiplexClient {
    clients: Vec<Box<dyn Client>>,
}

impl MultiplexClient {
    pub fn new(clients: Vec<Box<dyn Client>>) -> Self {
        Self { clients }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait]
impl Client for MultiplexClient {
    /// Every client is tried even if an earlier one failed; the last error wins.
    async fn send(&self, ctx: &Context, msg: &Message) -> Result<(), WebhookError> {
        let mut last_error: Option<WebhookError> = None;
        for client in &self.clients {
            if let Err(err) = client.send(ctx, msg).await {
                if let Some(previous) = &last_error {
                    log_event!(
                        warn,
                        CATEGORY_OUTGOING_WEBHOOK,
                        "multiple error on outgoing-webhook multiplexer",
                        error = %previous
                    );
                }
                last_error = Some(WebhookError::Client {
                    client: client.to_string(),
                    source: Box::new(err),
                });
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn close(&self) {
        join_all(self.clients.iter().map(|c| c.close())).await;
    }
}

impl fmt::Display for MultiplexClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.clients.iter().map(ToString::to_string).collect();
        f.write_str(&names.join(", "))
    }
}
