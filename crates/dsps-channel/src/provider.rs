//! Resolution of channel ids against the configured channel list.

use crate::atom::ChannelAtom;
use crate::cache::CachedChannelProvider;
use crate::channel::ChannelImpl;
use crate::config::ChannelsConfig;
use crate::ChannelError;
use dsps_telemetry::{Sentry, Telemetry};
use dsps_types::{ChannelId, ChannelProvider, SharedChannel, StorageError, SystemClock};
use std::sync::Arc;

/// Collaborators of the channel provider.
#[derive(Clone)]
pub struct ProviderDeps {
    pub clock: Arc<dyn SystemClock>,
    pub telemetry: Telemetry,
    pub sentry: Arc<dyn Sentry>,
}

/// Build the cached provider for `config` (already postprocessed).
pub fn new_channel_provider(
    config: &ChannelsConfig,
    deps: ProviderDeps,
) -> Result<CachedChannelProvider<ChannelProviderImpl>, ChannelError> {
    let mut atoms = Vec::with_capacity(config.len());
    for (i, channel) in config.iter().enumerate() {
        let atom = ChannelAtom::new(channel, &deps, true).map_err(|e| ChannelError::At {
            path: format!("channels[{i}]"),
            source: Box::new(e),
        })?;
        atoms.push(atom);
    }
    Ok(CachedChannelProvider::new(
        ChannelProviderImpl { atoms },
        Arc::clone(&deps.clock),
    ))
}

/// Uncached provider. Every call builds a new channel.
pub struct ChannelProviderImpl {
    atoms: Vec<ChannelAtom>,
}

impl ChannelProvider for ChannelProviderImpl {
    fn get(&self, id: &ChannelId) -> Result<SharedChannel, StorageError> {
        let found: Vec<&ChannelAtom> = self.atoms.iter().filter(|atom| atom.is_match(id)).collect();
        if found.is_empty() {
            return Err(StorageError::InvalidChannel(id.to_string()));
        }
        let channel = ChannelImpl::new(id.clone(), &found)?;
        Ok(Arc::new(channel))
    }

    fn no_file_pressure(&self) -> usize {
        self.atoms.iter().map(ChannelAtom::no_file_pressure).sum()
    }

    fn shutdown(&self) {
        for atom in &self.atoms {
            atom.shutdown();
        }
    }
}
