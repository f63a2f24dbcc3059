//! Collaborators every storage engine needs.

use dsps_sync::DaemonSystemDeps;
use dsps_telemetry::{Sentry, Telemetry};
use dsps_types::{ChannelProvider, ConfigError, SystemClock};
use std::sync::Arc;

#[derive(Clone)]
pub struct StorageDeps {
    pub clock: Arc<dyn SystemClock>,
    pub channel_provider: Arc<dyn ChannelProvider>,
    pub telemetry: Telemetry,
    pub sentry: Arc<dyn Sentry>,
}

impl StorageDeps {
    pub fn builder() -> StorageDepsBuilder {
        StorageDepsBuilder::default()
    }

    pub(crate) fn daemon_deps(&self) -> DaemonSystemDeps {
        DaemonSystemDeps {
            telemetry: self.telemetry.clone(),
            sentry: Arc::clone(&self.sentry),
        }
    }
}

/// Collects dependencies; `build` fails when any of them is missing.
#[derive(Default)]
pub struct StorageDepsBuilder {
    clock: Option<Arc<dyn SystemClock>>,
    channel_provider: Option<Arc<dyn ChannelProvider>>,
    telemetry: Option<Telemetry>,
    sentry: Option<Arc<dyn Sentry>>,
}

impl StorageDepsBuilder {
    pub fn clock(mut self, clock: Arc<dyn SystemClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn channel_provider(mut self, provider: Arc<dyn ChannelProvider>) -> Self {
        self.channel_provider = Some(provider);
        self
    }

    pub fn telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn sentry(mut self, sentry: Arc<dyn Sentry>) -> Self {
        self.sentry = Some(sentry);
        self
    }

    pub fn build(self) -> Result<StorageDeps, ConfigError> {
        let missing = |field: &'static str| ConfigError::MissingDependency {
            owner: "StorageDeps",
            field,
        };
        Ok(StorageDeps {
            clock: self.clock.ok_or_else(|| missing("SystemClock"))?,
            channel_provider: self.channel_provider.ok_or_else(|| missing("ChannelProvider"))?,
            telemetry: self.telemetry.ok_or_else(|| missing("Telemetry"))?,
            sentry: self.sentry.ok_or_else(|| missing("Sentry"))?,
        })
    }
}
