//! In-process stand-in for Redis used by unit tests.
//!
//! Keeps string values and their TTLs in a map, evaluates the storage's three Lua
//! scripts natively, fans PUBLISH out to PSUBSCRIBE streams, and can be told to fail
//! the next N calls of a command.

use async_trait::async_trait;
use dsps_types::Context;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::connection::{RedisCmd, RedisCmdError, RedisScript};

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct FakeState {
    values: HashMap<String, String>,
    ttls: HashMap<String, u64>,
    calls: Vec<String>,
    failures: HashMap<&'static str, usize>,
    hooks: HashMap<&'static str, Vec<Hook>>,
    subscribers: Vec<mpsc::UnboundedSender<String>>,
    stalled: Vec<mpsc::UnboundedSender<String>>,
    loaded_scripts: Vec<String>,
}

#[derive(Default)]
pub(crate) struct FakeRedisCmd {
    state: Mutex<FakeState>,
}

pub(crate) fn mocked_error() -> RedisCmdError {
    RedisCmdError::Redis((redis::ErrorKind::ResponseError, "Mocked redis error").into())
}

impl FakeRedisCmd {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `command` (e.g. `"MGET"`, `"EVAL publishMessageScript"`).
    pub(crate) fn fail_next(&self, command: &'static str, times: usize) {
        *self.state.lock().failures.entry(command).or_default() += times;
    }

    /// Run `hook` when `command` is called next.
    pub(crate) fn on_next(&self, command: &'static str, hook: impl FnOnce() + Send + 'static) {
        self.state.lock().hooks.entry(command).or_default().push(Box::new(hook));
    }

    /// End every PSUBSCRIBE stream, as if the connection dropped.
    pub(crate) fn drop_subscriptions(&self) {
        self.state.lock().subscribers.clear();
    }

    /// Keep every PSUBSCRIBE stream open but stop delivering to it (half-open connection).
    pub(crate) fn stall_subscriptions(&self) {
        let mut state = self.state.lock();
        let stalled = std::mem::take(&mut state.subscribers);
        state.stalled.extend(stalled);
    }

    /// Deliver a PUBLISH notification to the PSUBSCRIBE streams without recording a call.
    pub(crate) fn notify(&self, channel: &str) {
        self.state
            .lock()
            .subscribers
            .retain(|tx| tx.unbounded_send(channel.to_string()).is_ok());
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub(crate) fn count_calls(&self, command: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| c.as_str() == command).count()
    }

    pub(crate) fn value(&self, key: &str) -> Option<String> {
        self.state.lock().values.get(key).cloned()
    }

    pub(crate) fn ttl(&self, key: &str) -> Option<u64> {
        self.state.lock().ttls.get(key).copied()
    }

    pub(crate) fn set_value(&self, key: &str, value: &str) {
        self.state.lock().values.insert(key.to_string(), value.to_string());
    }

    pub(crate) fn remove_value(&self, key: &str) {
        let mut state = self.state.lock();
        state.values.remove(key);
        state.ttls.remove(key);
    }

    pub(crate) fn loaded_scripts(&self) -> Vec<String> {
        self.state.lock().loaded_scripts.clone()
    }

    fn begin(&self, command: &'static str) -> Result<(), RedisCmdError> {
        let hooks = {
            let mut state = self.state.lock();
            state.calls.push(command.to_string());
            state.hooks.remove(command).unwrap_or_default()
        };
        for hook in hooks {
            hook();
        }
        let mut state = self.state.lock();
        match state.failures.get_mut(command) {
            Some(n) if *n > 0 => {
                *n -= 1;
                Err(mocked_error())
            }
            _ => Ok(()),
        }
    }
}

fn set(state: &mut FakeState, key: &str, value: String, ttl: Option<u64>) {
    state.values.insert(key.to_string(), value);
    match ttl {
        Some(ttl) => state.ttls.insert(key.to_string(), ttl),
        None => state.ttls.remove(key),
    };
}

fn int_arg(args: &[String], i: usize) -> i64 {
    args[i].parse().expect("numeric script argument")
}

fn eval_publish_message(state: &mut FakeState, keys: &[String], args: &[String]) -> Option<String> {
    let (clock_key, prefix, dedup_key) = (&keys[0], &keys[1], &keys[2]);
    let ttl = int_arg(args, 0) as u64;
    let (clock_min, clock_max) = (int_arg(args, 2), int_arg(args, 3));

    let old_clock: i64 = state.values.get(clock_key).map_or(0, |v| v.parse().expect("clock"));
    let mut next_clock = old_clock + 1;
    if next_clock > clock_max {
        next_clock = clock_min;
    }
    set(state, clock_key, next_clock.to_string(), Some(ttl));

    if state.values.contains_key(dedup_key) {
        set(state, clock_key, old_clock.to_string(), Some(ttl));
        return None;
    }
    set(state, dedup_key, next_clock.to_string(), Some(ttl));
    set(state, &format!("{prefix}{next_clock}"), args[1].clone(), Some(ttl));
    Some("OK".into())
}

fn eval_ack(state: &mut FakeState, keys: &[String], args: &[String]) -> Option<String> {
    let ttl = int_arg(args, 0) as u64;
    let acknowledged = int_arg(args, 1);
    let Some(channel_clock) = state.values.get(&keys[0]).map(|v| v.parse::<i64>().expect("clock")) else {
        return Some("channel-not-found".into());
    };
    let Some(sbsc_clock) = state.values.get(&keys[1]).map(|v| v.parse::<i64>().expect("clock")) else {
        return Some("subscription-not-found".into());
    };
    let valid = if channel_clock < sbsc_clock {
        sbsc_clock < acknowledged || acknowledged <= channel_clock
    } else {
        sbsc_clock < acknowledged && acknowledged <= channel_clock
    };
    if !valid {
        return Some("stale".into());
    }
    set(state, &keys[1], acknowledged.to_string(), Some(ttl));
    state.ttls.insert(keys[0].clone(), ttl);
    Some("OK".into())
}

fn eval_create_subscriber(state: &mut FakeState, keys: &[String], args: &[String]) -> Option<String> {
    let ttl = int_arg(args, 0) as u64;
    let clock = match state.values.get(&keys[0]) {
        Some(v) => {
            let clock = v.clone();
            state.ttls.insert(keys[0].clone(), ttl);
            clock
        }
        None => {
            set(state, &keys[0], "0".into(), Some(ttl));
            "0".into()
        }
    };
    if state.values.contains_key(&keys[1]) {
        return None;
    }
    set(state, &keys[1], clock, Some(ttl));
    Some("OK".into())
}

#[async_trait]
impl RedisCmd for FakeRedisCmd {
    async fn ping(&self, _ctx: &Context) -> Result<(), RedisCmdError> {
        self.begin("PING")
    }

    async fn publish(&self, _ctx: &Context, channel: &str, _message: &str) -> Result<(), RedisCmdError> {
        self.begin("PUBLISH")?;
        self.notify(channel);
        Ok(())
    }

    async fn get(&self, _ctx: &Context, key: &str) -> Result<Option<String>, RedisCmdError> {
        self.begin("GET")?;
        Ok(self.value(key))
    }

    async fn mget(&self, _ctx: &Context, keys: &[String]) -> Result<Vec<Option<String>>, RedisCmdError> {
        self.begin("MGET")?;
        let state = self.state.lock();
        Ok(keys.iter().map(|k| state.values.get(k).cloned()).collect())
    }

    async fn set_ex(&self, _ctx: &Context, key: &str, value: &str, ttl_sec: u64) -> Result<(), RedisCmdError> {
        self.begin("SET")?;
        set(&mut self.state.lock(), key, value.to_string(), Some(ttl_sec));
        Ok(())
    }

    async fn expire(&self, _ctx: &Context, keys: &[String], ttl_sec: u64) -> Result<(), RedisCmdError> {
        self.begin("EXPIRE")?;
        let mut state = self.state.lock();
        for key in keys {
            if state.values.contains_key(key) {
                state.ttls.insert(key.clone(), ttl_sec);
            }
        }
        Ok(())
    }

    async fn del(&self, _ctx: &Context, key: &str) -> Result<(), RedisCmdError> {
        self.begin("DEL")?;
        self.remove_value(key);
        Ok(())
    }

    async fn load_script(&self, _ctx: &Context, script: &RedisScript) -> Result<(), RedisCmdError> {
        self.begin("SCRIPT LOAD")?;
        self.state.lock().loaded_scripts.push(script.name().to_string());
        Ok(())
    }

    async fn run_script(
        &self,
        _ctx: &Context,
        script: &RedisScript,
        keys: &[String],
        args: &[String],
    ) -> Result<Option<String>, RedisCmdError> {
        let command = match script.name() {
            "publishMessageScript" => "EVAL publishMessageScript",
            "ackScript" => "EVAL ackScript",
            "createSubscriberScript" => "EVAL createSubscriberScript",
            other => panic!("unknown script {other}"),
        };
        self.begin(command)?;
        let mut state = self.state.lock();
        Ok(match script.name() {
            "publishMessageScript" => eval_publish_message(&mut state, keys, args),
            "ackScript" => eval_ack(&mut state, keys, args),
            _ => eval_create_subscriber(&mut state, keys, args),
        })
    }

    async fn psubscribe(&self, _ctx: &Context, pattern: &str) -> Result<BoxStream<'static, String>, RedisCmdError> {
        assert_eq!(pattern, "dsps.c.*");
        self.begin("PSUBSCRIBE")?;
        let (tx, rx) = mpsc::unbounded();
        self.state.lock().subscribers.push(tx);
        Ok(rx.boxed())
    }

    fn close(&self) {
        self.state.lock().calls.push("CLOSE".into());
    }
}
