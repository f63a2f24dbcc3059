//! Outgoing webhook delivery through a resolved channel.

#[cfg(test)]
mod tests {
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::Router;
    use dsps_channel::{new_channel_provider, postprocess_channels_config, ChannelsConfig, ProviderDeps};
    use dsps_telemetry::{StubSentry, Telemetry};
    use dsps_types::{ChannelId, ChannelProvider, Context, Message, MessageId, MessageLocator, StubSystemClock};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Endpoint {
        statuses: Arc<Vec<u16>>,
        calls: Arc<AtomicUsize>,
        bodies: Arc<Mutex<Vec<Value>>>,
    }

    async fn respond(State(endpoint): State<Endpoint>, body: String) -> StatusCode {
        let n = endpoint.calls.fetch_add(1, Ordering::SeqCst);
        endpoint
            .bodies
            .lock()
            .push(serde_json::from_str(&body).unwrap_or(Value::Null));
        let status = endpoint.statuses.get(n).or(endpoint.statuses.last()).copied().unwrap_or(204);
        StatusCode::from_u16(status).unwrap()
    }

    async fn start_endpoint(statuses: Vec<u16>) -> (String, Endpoint) {
        let endpoint = Endpoint {
            statuses: Arc::new(statuses),
            ..Default::default()
        };
        let app = Router::new().fallback(respond).with_state(endpoint.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), endpoint)
    }

    #[tokio::test]
    async fn test_scenario_webhook_retries_until_success() {
        let (base, endpoint) = start_endpoint(vec![500, 500, 500, 204]).await;
        let sentry = StubSentry::new();
        let mut channels: ChannelsConfig = serde_json::from_value(json!([{
            "regex": "hook-.+",
            "webhooks": [{
                "url": format!("{base}/hook"),
                "retry": {"count": 3, "interval": "1ms", "intervalMultiplier": 1.0, "intervalJitter": "1ms"},
            }],
        }]))
        .unwrap();
        postprocess_channels_config(&mut channels).unwrap();
        let provider = new_channel_provider(
            &channels,
            ProviderDeps {
                clock: Arc::new(StubSystemClock::default()),
                telemetry: Telemetry::without_metrics(),
                sentry: Arc::new(sentry.clone()),
            },
        )
        .unwrap();

        let id = ChannelId::new("hook-1").unwrap();
        let channel = provider.get(&id).unwrap();
        let msg = Message::new(
            MessageLocator::new(id.clone(), MessageId::new("m1").unwrap()),
            json!({"hi": "hello"}),
        );
        channel.send_outgoing_webhook(&Context::background(), &msg).await.unwrap();

        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 4);
        let statuses: Vec<u64> = sentry
            .breadcrumbs()
            .iter()
            .filter_map(|b| b.data.get("status_code").and_then(Value::as_u64))
            .collect();
        assert_eq!(statuses.iter().filter(|s| **s == 500).count(), 3);
        assert!(sentry.errors().is_empty());
        assert_eq!(
            endpoint.bodies.lock().last().cloned().unwrap(),
            json!({
                "type": "dsps.channel.outgoing-webhook",
                "channelID": "hook-1",
                "messageID": "m1",
                "content": {"hi": "hello"},
            })
        );
    }

    #[tokio::test]
    async fn test_channel_without_webhooks_sends_nothing() {
        let mut channels = ChannelsConfig::new();
        postprocess_channels_config(&mut channels).unwrap();
        let provider = new_channel_provider(
            &channels,
            ProviderDeps {
                clock: Arc::new(StubSystemClock::default()),
                telemetry: Telemetry::without_metrics(),
                sentry: Arc::new(StubSentry::new()),
            },
        )
        .unwrap();
        let id = ChannelId::new("anything").unwrap();
        let channel = provider.get(&id).unwrap();
        let msg = Message::new(MessageLocator::new(id, MessageId::new("m1").unwrap()), json!(null));
        channel.send_outgoing_webhook(&Context::background(), &msg).await.unwrap();
        assert_eq!(provider.no_file_pressure(), 0);
    }
}
