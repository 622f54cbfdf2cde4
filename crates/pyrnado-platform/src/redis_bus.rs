use anyhow::Result;
use async_trait::async_trait;
use pyrnado_core::SettlementNotifier;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SETTLEMENTS_CHANNEL: &str = "settlements.scheduled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementScheduledEvent {
    pub task_id: Uuid,
}

#[derive(Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(payload)?;
        let _: i64 = connection.publish(channel, serialized).await?;
        Ok(())
    }
}

#[async_trait]
impl SettlementNotifier for RedisBus {
    async fn settlement_scheduled(&self, task_id: Uuid) -> Result<()> {
        self.publish_json(SETTLEMENTS_CHANNEL, &SettlementScheduledEvent { task_id })
            .await
    }
}
