use super::body::encode_webhook_body;
use super::retry::{Attempt, Retry};
use super::{Client, WebhookError};
use async_trait::async_trait;
use dsps_telemetry::{log_event, Sentry, Telemetry, CATEGORY_OUTGOING_WEBHOOK};
use dsps_types::{Context, Message, TemplateEnv, TemplateString};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Everything a client needs from its template.
pub(crate) struct ClientParts<'a> {
    pub method: &'a str,
    pub url: &'a TemplateString,
    pub headers: &'a BTreeMap<String, TemplateString>,
    pub timeout: Duration,
    pub retry: Retry,
    pub http: reqwest::Client,
    pub telemetry: Telemetry,
    pub sentry: Arc<dyn Sentry>,
}

/// Webhook client bound to one channel. Shares the HTTP pool of its template.
pub struct ClientImpl {
    closed: AtomicBool,

    method: reqwest::Method,
    url: String,
    headers: HeaderMap,

    timeout: Duration,
    retry: Retry,

    http: reqwest::Client,
    telemetry: Telemetry,
    sentry: Arc<dyn Sentry>,
}

impl ClientImpl {
    pub(crate) fn new(parts: ClientParts<'_>, env: &TemplateEnv) -> Result<Self, WebhookError> {
        let method = reqwest::Method::from_bytes(parts.method.as_bytes()).map_err(|e| WebhookError::InvalidHeader {
            name: "method".into(),
            reason: e.to_string(),
        })?;
        let url = parts.url.execute(env).map_err(|source| WebhookError::UrlTemplate {
            template: parts.url.to_string(),
            source,
        })?;

        // User headers are inserted after the default ones and replace them.
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, template) in parts.headers {
            let value = template.execute(env).map_err(|source| WebhookError::HeaderTemplate {
                name: name.clone(),
                template: template.to_string(),
                source,
            })?;
            let invalid = |reason: String| WebhookError::InvalidHeader {
                name: name.clone(),
                reason,
            };
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
            let header_value = HeaderValue::from_str(&value).map_err(|e| invalid(e.to_string()))?;
            headers.insert(header_name, header_value);
        }

        Ok(Self {
            closed: AtomicBool::new(false),
            method,
            url,
            headers,
            timeout: parts.timeout,
            retry: parts.retry,
            http: parts.http,
            telemetry: parts.telemetry,
            sentry: parts.sentry,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn attempt(&self, ctx: &Context, body: &str) -> Attempt {
        let mut span = self.telemetry.start_http_span(self.method.as_str(), &self.url);
        let request = self
            .http
            .request(self.method.clone(), &self.url)
            .timeout(self.timeout)
            .headers(self.headers.clone())
            .body(body.to_string())
            .send()
            .instrument(span.span().clone());

        let result = match ctx.run(request).await {
            Err(cause) => {
                span.record_error(&cause);
                Err(WebhookError::Canceled(cause))
            }
            Ok(Err(e)) => {
                span.record_error(&e);
                Err(WebhookError::Transport(e))
            }
            Ok(Ok(res)) => {
                log_event!(
                    debug,
                    CATEGORY_OUTGOING_WEBHOOK,
                    "received outgoing webhook response",
                    status = res.status().as_u16(),
                    content_length = res.content_length()
                );
                span.set_status_code(res.status().as_u16());
                Ok(res)
            }
        };
        Attempt {
            method: self.method.to_string(),
            url: self.url.clone(),
            result,
        }
    }
}

#[async_trait]
impl Client for ClientImpl {
    async fn send(&self, ctx: &Context, msg: &Message) -> Result<(), WebhookError> {
        if self.is_closed() {
            return Err(WebhookError::Closed);
        }
        log_event!(
            debug,
            CATEGORY_OUTGOING_WEBHOOK,
            "sending outgoing webhook",
            channel = %msg.channel_id(),
            message = %msg.message_id(),
            url = %self.url
        );

        let body = encode_webhook_body(msg)?;
        let body = body.as_str();
        let description = format!("outgoing-webhook to {}", self.url);
        self.retry
            .run(ctx, self.sentry.as_ref(), &description, || self.attempt(ctx, body))
            .await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl fmt::Debug for ClientImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientImpl")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl fmt::Display for ClientImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutgoingWebhookConfig;
    use crate::webhook::ClientTemplate;
    use axum::extract::State;
    use axum::http::{HeaderMap as AxumHeaders, Method, StatusCode, Uri};
    use axum::Router;
    use dsps_telemetry::{BreadcrumbLevel, StubSentry};
    use dsps_types::{ChannelId, MessageId, MessageLocator};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone)]
    struct Received {
        method: Method,
        path: String,
        headers: AxumHeaders,
        body: serde_json::Value,
    }

    #[derive(Clone)]
    struct ServerState {
        statuses: Arc<Vec<u16>>,
        calls: Arc<AtomicUsize>,
        received: Arc<Mutex<Vec<Received>>>,
    }

    /// Serves `statuses` in order, repeating the last one.
    async fn start_server(statuses: Vec<u16>) -> (String, ServerState) {
        let state = ServerState {
            statuses: Arc::new(statuses),
            calls: Arc::new(AtomicUsize::new(0)),
            received: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new().fallback(handler).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), state)
    }

    async fn handler(
        State(state): State<ServerState>,
        method: Method,
        uri: Uri,
        headers: AxumHeaders,
        body: String,
    ) -> StatusCode {
        let n = state.calls.fetch_add(1, Ordering::SeqCst);
        state.received.lock().push(Received {
            method,
            path: uri.path().to_string(),
            headers,
            body: serde_json::from_str(&body).unwrap_or(serde_json::Value::Null),
        });
        let status = state.statuses.get(n).or(state.statuses.last()).copied().unwrap_or(204);
        StatusCode::from_u16(status).unwrap()
    }

    fn template(config: serde_json::Value, sentry: &StubSentry) -> ClientTemplate {
        let mut cfg: OutgoingWebhookConfig = serde_json::from_value(config).unwrap();
        cfg.postprocess().unwrap();
        ClientTemplate::new(&cfg, Telemetry::without_metrics(), Arc::new(sentry.clone())).unwrap()
    }

    fn message() -> Message {
        Message::new(
            MessageLocator::new(ChannelId::new("chat-room-1234").unwrap(), MessageId::new("msg-1").unwrap()),
            json!({"hi": "hello"}),
        )
    }

    #[tokio::test]
    async fn test_send_expands_templates() {
        let (base, state) = start_server(vec![200]).await;
        let sentry = StubSentry::new();
        let tpl = template(
            json!({
                "method": "PUT",
                "url": format!("{base}/you-got-message/room/{{{{.channel.id}}}}"),
                "timeout": "3s",
                "headers": {
                    "User-Agent": "My DSPS server",
                    "X-Room-ID": "{{.channel.id}}",
                    "Content-Type": "application/vnd.dsps+json",
                },
            }),
            &sentry,
        );
        let client = tpl.new_client(&json!({"channel": {"id": "1234"}})).unwrap();
        assert_eq!(client.to_string(), format!("PUT {base}/you-got-message/room/1234"));

        client.send(&Context::background(), &message()).await.unwrap();

        let received = state.received.lock().clone();
        assert_eq!(received.len(), 1);
        let req = &received[0];
        assert_eq!(req.method, Method::PUT);
        assert_eq!(req.path, "/you-got-message/room/1234");
        assert_eq!(req.headers["user-agent"], "My DSPS server");
        assert_eq!(req.headers["x-room-id"], "1234");
        assert_eq!(req.headers["content-type"], "application/vnd.dsps+json");
        assert_eq!(
            req.body,
            json!({
                "type": "dsps.channel.outgoing-webhook",
                "channelID": "chat-room-1234",
                "messageID": "msg-1",
                "content": {"hi": "hello"},
            })
        );
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let (base, state) = start_server(vec![500, 500, 500, 204]).await;
        let sentry = StubSentry::new();
        let tpl = template(
            json!({
                "url": format!("{base}/hook"),
                "retry": {"count": 3, "interval": "10ms", "intervalMultiplier": 1.0, "intervalJitter": "1ms"},
            }),
            &sentry,
        );
        let client = tpl.new_client(&json!({"channel": {}})).unwrap();
        client.send(&Context::background(), &message()).await.unwrap();

        assert_eq!(state.calls.load(Ordering::SeqCst), 4);
        assert!(state.received.lock().iter().all(|r| r.method == Method::POST));

        let breadcrumbs = sentry.breadcrumbs();
        assert_eq!(breadcrumbs.len(), 4);
        let codes: Vec<u64> = breadcrumbs
            .iter()
            .map(|b| b.data["status_code"].as_u64().unwrap())
            .collect();
        assert_eq!(codes, vec![500, 500, 500, 204]);
        for b in &breadcrumbs {
            assert_eq!(b.kind, "http");
            assert_eq!(b.level, BreadcrumbLevel::Info);
            assert_eq!(b.message, "Outgoing webhook");
            assert_eq!(b.data["method"], "POST");
            assert_eq!(b.data["url"], format!("{base}/hook"));
        }
        assert!(sentry.errors().is_empty());
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let (base, state) = start_server(vec![503]).await;
        let sentry = StubSentry::new();
        let tpl = template(
            json!({
                "url": format!("{base}/hook"),
                "retry": {"count": 2, "interval": "5ms", "intervalMultiplier": 1.0, "intervalJitter": "1ms"},
            }),
            &sentry,
        );
        let client = tpl.new_client(&json!({})).unwrap();
        let err = client.send(&Context::background(), &message()).await.unwrap_err();

        assert_eq!(err.to_string(), "status code 503 returned");
        assert_eq!(state.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            sentry.last_error().as_deref(),
            Some("outgoing webhook failed: status code 503 returned")
        );
    }

    #[tokio::test]
    async fn test_no_retry_on_permanent_status() {
        let (base, state) = start_server(vec![403, 204]).await;
        let sentry = StubSentry::new();
        let tpl = template(json!({"url": format!("{base}/hook")}), &sentry);
        let client = tpl.new_client(&json!({})).unwrap();
        let err = client.send(&Context::background(), &message()).await.unwrap_err();

        assert!(matches!(err, WebhookError::Status(403)));
        assert_eq!(state.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_client_rejects_send() {
        let sentry = StubSentry::new();
        let tpl = template(json!({"url": "http://127.0.0.1:9/hook"}), &sentry);
        let client = tpl.new_client(&json!({})).unwrap();
        client.close().await;
        let err = client.send(&Context::background(), &message()).await.unwrap_err();
        assert_eq!(err.to_string(), "outgoing-webhook client already closed");
        assert!(sentry.breadcrumbs().is_empty());
    }

    #[tokio::test]
    async fn test_template_expansion_errors() {
        let sentry = StubSentry::new();
        let tpl = template(json!({"url": "http://localhost/{{.channel.id}}"}), &sentry);
        let err = tpl.new_client(&json!({"channel": {}})).unwrap_err();
        assert!(err.to_string().starts_with("failed to expand template of webhook URL"));

        let tpl = template(
            json!({"url": "http://localhost/", "headers": {"X-Id": "{{.channel.id}}"}}),
            &sentry,
        );
        let err = tpl.new_client(&json!({"channel": {}})).unwrap_err();
        assert!(matches!(err, WebhookError::HeaderTemplate { ref name, .. } if name == "X-Id"));
    }

    #[tokio::test]
    async fn test_transport_failures_leave_breadcrumbs() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        drop(listener);

        let sentry = StubSentry::new();
        let tpl = template(
            json!({
                "url": url,
                "retry": {"count": 1, "interval": "1ms", "intervalMultiplier": 1.0, "intervalJitter": "1ms"},
            }),
            &sentry,
        );
        let client = tpl.new_client(&json!({})).unwrap();
        let err = client.send(&Context::background(), &message()).await.unwrap_err();
        assert!(matches!(err, WebhookError::Transport(_)), "{err}");

        let breadcrumbs = sentry.breadcrumbs();
        assert_eq!(breadcrumbs.len(), 2);
        for b in &breadcrumbs {
            assert_eq!(b.data["method"], "POST");
            assert_eq!(b.data["url"], url.as_str());
            assert!(b.data.get("status_code").is_none());
        }
        assert_eq!(sentry.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_canceled_context_stops_retrying() {
        let (base, state) = start_server(vec![500]).await;
        let sentry = StubSentry::new();
        let tpl = template(
            json!({
                "url": format!("{base}/hook"),
                "retry": {"count": 3, "interval": "10s", "intervalJitter": "1ms"},
            }),
            &sentry,
        );
        let client = tpl.new_client(&json!({})).unwrap();
        let ctx = Context::background().with_timeout(Duration::from_millis(300));
        let err = client.send(&ctx, &message()).await.unwrap_err();

        assert!(matches!(err, WebhookError::Canceled(_)));
        assert_eq!(state.calls.load(Ordering::SeqCst), 1);
        assert!(sentry.errors().is_empty());
    }
}
