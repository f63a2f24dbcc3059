use super::WebhookError;
use crate::config::OutgoingWebhookRetryConfig;
use dsps_telemetry::{log_event, Breadcrumb, BreadcrumbLevel, Sentry, CATEGORY_OUTGOING_WEBHOOK};
use dsps_types::Context;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Outcome of one HTTP attempt.
pub(crate) struct Attempt {
    pub method: String,
    pub url: String,
    pub result: Result<reqwest::Response, WebhookError>,
}

#[derive(Debug, Error)]
#[error("outgoing webhook failed: {0}")]
struct WebhookFailed(String);

#[derive(Debug, Clone)]
pub(crate) struct Retry {
    count: usize,
    interval: Duration,
    interval_multiplier: f64,
    interval_jitter: Duration,
}

impl Retry {
    pub fn new(cfg: &OutgoingWebhookRetryConfig) -> Self {
        Self {
            count: cfg.count,
            interval: cfg.interval,
            interval_multiplier: cfg.interval_multiplier,
            interval_jitter: cfg.interval_jitter,
        }
    }

    /// Run `attempt` until it succeeds, fails permanently or runs out of retries.
    ///
    /// Response bodies are drained here so the connection can be reused.
    pub async fn run<F, Fut>(
        &self,
        ctx: &Context,
        sentry: &dyn Sentry,
        description: &str,
        mut attempt: F,
    ) -> Result<(), WebhookError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Attempt>,
    {
        let mut attempts = 0usize;
        loop {
            let Attempt { method, url, result } = attempt().await;

            let mut data = serde_json::Map::new();
            data.insert("method".into(), method.into());
            data.insert("url".into(), url.into());
            if let Ok(res) = &result {
                data.insert("status_code".into(), res.status().as_u16().into());
            }
            sentry.add_breadcrumb(Breadcrumb {
                kind: "http".into(),
                category: CATEGORY_OUTGOING_WEBHOOK.into(),
                level: BreadcrumbLevel::Info,
                message: "Outgoing webhook".into(),
                data,
            });

            let err = match result {
                Ok(res) => {
                    let status = res.status().as_u16();
                    if let Err(e) = res.bytes().await {
                        log_event!(debug, CATEGORY_OUTGOING_WEBHOOK, "failed to read response body", error = %e);
                    }
                    if (200..=299).contains(&status) {
                        return Ok(());
                    }
                    WebhookError::Status(status)
                }
                Err(WebhookError::Canceled(cause)) => return Err(WebhookError::Canceled(cause)),
                Err(e) => e,
            };
            attempts += 1;

            if attempts > self.count || !should_retry(&err) {
                log_event!(warn, CATEGORY_OUTGOING_WEBHOOK, "outgoing webhook failed", webhook = %description, error = %err);
                sentry.record_error(&WebhookFailed(err.to_string()));
                return Err(err);
            }

            let wait = self.retry_wait(attempts);
            log_event!(
                info,
                CATEGORY_OUTGOING_WEBHOOK,
                "retrying outgoing webhook",
                webhook = %description,
                wait_ms = wait.as_millis() as u64,
                error = %err
            );
            ctx.run(tokio::time::sleep(wait)).await?;
        }
    }

    /// `interval * multiplier^attempt`, shifted by a uniform jitter in `[-jitter, +jitter]`.
    fn retry_wait(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let mut nanos = self.interval.as_nanos() as f64 * self.interval_multiplier.powi(exponent);
        nanos += (rand::random::<f64>() * 2.0 - 1.0) * self.interval_jitter.as_nanos() as f64;
        if !nanos.is_finite() || nanos <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(nanos.round().min(u64::MAX as f64) as u64)
    }
}

fn should_retry(err: &WebhookError) -> bool {
    match err {
        WebhookError::Status(status) => should_retry_status(*status),
        _ => true,
    }
}

pub(crate) fn should_retry_status(status: u16) -> bool {
    !matches!(status, 401..=403 | 405..=407 | 410..=418 | 426 | 431 | 451 | 501)
}
