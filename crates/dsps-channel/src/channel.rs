use crate::atom::ChannelAtom;
use crate::webhook::{Client, MultiplexClient};
use crate::ChannelError;
use async_trait::async_trait;
use dsps_types::{BoxError, Channel, ChannelId, Context, Message};
use std::time::Duration;

/// A resolved channel: every atom whose regex accepts the id contributes to it.
pub struct ChannelImpl {
    id: ChannelId,
    expire: Duration,
    webhook: MultiplexClient,
}

impl ChannelImpl {
    pub(crate) fn new(id: ChannelId, atoms: &[&ChannelAtom]) -> Result<Self, ChannelError> {
        let mut expire = Duration::ZERO;
        let mut clients: Vec<Box<dyn Client>> = Vec::with_capacity(atoms.len() * 2);
        for atom in atoms {
            let env = atom.template_env_of(&id).ok_or_else(|| ChannelError::Evaluate {
                regex: atom.to_string(),
                channel_id: id.to_string(),
            })?;
            expire = expire.max(atom.expire());

            for tpl in &atom.webhook_templates {
                let client = tpl.new_client(&env).map_err(|source| ChannelError::WebhookSetup {
                    target: format!("channel \"{id}\""),
                    source,
                })?;
                clients.push(Box::new(client));
            }
        }
        Ok(Self {
            id,
            expire,
            webhook: MultiplexClient::new(clients),
        })
    }

    pub fn webhook(&self) -> &MultiplexClient {
        &self.webhook
    }
}

#[async_trait]
impl Channel for ChannelImpl {
    fn id(&self) -> &ChannelId {
        &self.id
    }

    fn expire(&self) -> Duration {
        self.expire
    }

    async fn send_outgoing_webhook(&self, ctx: &Context, msg: &Message) -> Result<(), BoxError> {
        self.webhook.send(ctx, msg).await.map_err(Into::into)
    }
}
