use chrono::{DateTime, Utc};
use dsps_telemetry::{log_event, CATEGORY_STORAGE};
use dsps_types::clock::sub_duration;
use dsps_types::{Context, StorageError};
use serde::Serialize;

use super::Inner;

#[derive(Debug, Clone, Default, Serialize)]
pub struct OnmemoryStat {
    pub gc: GcStat,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcStat {
    pub total_count: u64,
    pub last_start_at: Option<DateTime<Utc>>,
    pub last_gc_sec: f64,
    pub evicted: EvictedStat,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictedStat {
    pub subscribers: u64,
    pub messages: u64,
    pub jwt_revocations: u64,
}

fn check(ctx: &Context) -> Result<(), StorageError> {
    match ctx.err() {
        Some(cause) => Err(cause.into()),
        None => Ok(()),
    }
}

impl Inner {
    pub(crate) async fn gc(&self, ctx: &Context) -> Result<(), StorageError> {
        let mut state = self.state.lock(ctx).await?;
        let started = std::time::Instant::now();
        let now = self.clock.now();
        {
            let mut stat = self.stat.lock();
            stat.gc.total_count += 1;
            stat.gc.last_start_at = Some(now);
        }

        let mut evicted = EvictedStat::default();
        let result = (|| -> Result<(), StorageError> {
            for ch in state.channels.values_mut() {
                check(ctx)?;
                let expire_before = sub_duration(now, ch.channel.expire());

                let before = ch.subscribers.len();
                ch.subscribers.retain(|_, sbsc| sbsc.last_activity >= expire_before);
                evicted.subscribers += (before - ch.subscribers.len()) as u64;

                for sbsc in ch.subscribers.values_mut() {
                    sbsc.queue.retain(|msg| msg.expire_at >= expire_before);
                }

                check(ctx)?;
                let before = ch.log.len();
                ch.log.retain(|_, msg| msg.expire_at >= expire_before);
                evicted.messages += (before - ch.log.len()) as u64;
            }

            check(ctx)?;
            let before = state.revoked_jwts.len();
            state.revoked_jwts.retain(|_, exp| exp.to_time() >= now);
            evicted.jwt_revocations += (before - state.revoked_jwts.len()) as u64;
            Ok(())
        })();
        drop(state);

        let mut stat = self.stat.lock();
        stat.gc.last_gc_sec = started.elapsed().as_secs_f64();
        stat.gc.evicted.subscribers += evicted.subscribers;
        stat.gc.evicted.messages += evicted.messages;
        stat.gc.evicted.jwt_revocations += evicted.jwt_revocations;
        drop(stat);

        if let Err(e) = &result {
            log_event!(warn, CATEGORY_STORAGE, "Onmemory storage GC failed", error = %e);
        }
        result
    }
}
