use super::client::{ClientImpl, ClientParts};
use super::retry::Retry;
use super::WebhookError;
use crate::config::OutgoingWebhookConfig;
use dsps_telemetry::{log_event, Sentry, Telemetry, CATEGORY_OUTGOING_WEBHOOK};
use dsps_types::{TemplateEnv, TemplateString};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Factory of [`ClientImpl`]s for one webhook configuration.
///
/// Owns the HTTP client (and so the connection pool) that every client it creates
/// shares. The pool is released once the template is closed and the last client
/// created from it is dropped.
pub struct ClientTemplate {
    config: OutgoingWebhookConfig,
    url: TemplateString,
    http: Mutex<Option<reqwest::Client>>,

    telemetry: Telemetry,
    sentry: Arc<dyn Sentry>,
}

impl ClientTemplate {
    pub fn new(
        config: &OutgoingWebhookConfig,
        telemetry: Telemetry,
        sentry: Arc<dyn Sentry>,
    ) -> Result<Self, WebhookError> {
        let url = config.url.clone().ok_or(WebhookError::MissingUrl)?;
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(config.connection.max)
            .pool_idle_timeout(config.connection.max_idle_time)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .timeout(config.timeout)
            .build()
            .map_err(WebhookError::HttpClient)?;
        Ok(Self {
            config: config.clone(),
            url,
            http: Mutex::new(Some(http)),
            telemetry,
            sentry,
        })
    }

    /// Client bound to a channel's template environment.
    pub fn new_client(&self, env: &TemplateEnv) -> Result<ClientImpl, WebhookError> {
        let http = self.http.lock().clone().ok_or(WebhookError::Closed)?;
        ClientImpl::new(
            ClientParts {
                method: &self.config.method,
                url: &self.url,
                headers: &self.config.headers,
                timeout: self.config.timeout,
                retry: Retry::new(&self.config.retry),
                http,
                telemetry: self.telemetry.clone(),
                sentry: Arc::clone(&self.sentry),
            },
            env,
        )
    }

    /// Release the template's handle on the connection pool.
    pub fn close(&self) {
        if self.http.lock().take().is_some() {
            log_event!(debug, CATEGORY_OUTGOING_WEBHOOK, "outgoing webhook template closed", url = %self.url);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.http.lock().is_none()
    }

    /// Estimated maximum number of file descriptors used by the pool.
    pub fn no_file_pressure(&self) -> usize {
        self.config.connection.max
    }
}

impl fmt::Debug for ClientTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTemplate")
            .field("url", &self.url)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl fmt::Display for ClientTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.config.method, self.url)
    }
}
