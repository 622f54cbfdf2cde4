use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use pyrnado_core::SettlementStore;
use pyrnado_platform::{
    PgStore, RedisBus, SETTLEMENTS_CHANNEL, ServiceConfig, SettlementScheduledEvent,
    apply_schema, connect_database,
};
use redis::Msg;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "pyrnado_ops=info".to_string()),
        )
        .init();

    let config = ServiceConfig::worker_from_env()?;
    let pool = connect_database(&config.database_url).await?;
    apply_schema(&pool).await?;
    let redis = RedisBus::connect(&config.redis_url)?;
    let store = PgStore::new(pool, config.settlement.delay());
    let batch_size = config.settlement.batch_size;

    let mut pubsub = redis.client().get_async_pubsub().await?;
    pubsub.subscribe(SETTLEMENTS_CHANNEL).await?;
    let mut messages = pubsub.on_message();

    let mut ticker = interval(config.settlement.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        poll_secs = config.settlement.poll_secs,
        "settlement executor subscribed to {SETTLEMENTS_CHANNEL}"
    );

    loop {
        tokio::select! {
            msg = messages.next() => {
                let msg = msg.with_context(|| {
                    format!("{SETTLEMENTS_CHANNEL} stream ended unexpectedly")
                })?;
                log_nudge(&msg);
            }
            _ = ticker.tick() => {}
        }

        if let Err(err) = sweep(&store, Utc::now(), batch_size).await {
            error!("settlement sweep failed: {err:#}");
        }
    }
}

/// A nudge only shortens the wait; the sweep below decides what is due.
fn log_nudge(msg: &Msg) {
    let parsed = msg
        .get_payload::<String>()
        .map_err(anyhow::Error::from)
        .and_then(|payload| {
            serde_json::from_str::<SettlementScheduledEvent>(&payload).map_err(Into::into)
        });
    match parsed {
        Ok(event) => info!(task_id = %event.task_id, "settlement nudge received"),
        Err(err) => warn!("ignoring malformed settlement nudge: {err:#}"),
    }
}

/// Applies every task due at `now` and reports how many settled.
async fn sweep(store: &dyn SettlementStore, now: DateTime<Utc>, limit: i64) -> Result<usize> {
    let outcomes = store.run_due_settlements(now, limit).await?;
    let mut applied = 0;
    for outcome in &outcomes {
        match &outcome.error {
            None => {
                applied += 1;
                info!(
                    task_id = %outcome.task_id,
                    reference_id = %outcome.reference_id,
                    "{} settlement applied",
                    outcome.kind.as_str()
                );
            }
            Some(reason) => warn!(
                task_id = %outcome.task_id,
                reference_id = %outcome.reference_id,
                "{} settlement failed, will retry: {reason}",
                outcome.kind.as_str()
            ),
        }
    }
    Ok(applied)
}
