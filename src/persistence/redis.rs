use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde_json::Value;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use super::Persister;

/// Redis-backed persister.
///
/// Row tables land in sorted sets keyed `{strategy}:{table}` with the row
/// timestamp as score, so time-range queries stay cheap. Models go to plain
/// keys. Writes are spawned off the caller's task; a Redis hiccup costs the
/// payload, never the trading loop.
pub struct RedisPersister {
    conn: ConnectionManager,
}

impl RedisPersister {
    /// Connect with a 5 second cap on the attempt
    pub async fn new(redis_url: &str) -> anyhow::Result<Self> {
        let client = Client::open(redis_url)?;
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| anyhow::anyhow!("Redis connection timeout after 5 seconds"))??;

        tracing::info!("Connected to Redis at {}", redis_url);
        Ok(Self { conn })
    }

    fn row_score(row: &Value) -> f64 {
        row.get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<chrono::DateTime<Utc>>().ok())
            .map(|ts| ts.timestamp_millis() as f64)
            .unwrap_or_else(|| Utc::now().timestamp_millis() as f64)
    }
}

impl Persister for RedisPersister {
    fn save_snapshot(&self, strategy: &str, tables: &[(String, Value)]) {
        for (table, rows) in tables {
            let key = format!("{strategy}:{table}");
            let rows = match rows {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            let mut conn = self.conn.clone();
            tokio::spawn(async move {
                let count = rows.len();
                for row in rows {
                    let score = Self::row_score(&row);
                    let value = row.to_string();
                    if let Err(e) = conn.zadd::<_, _, _, ()>(&key, value, score).await {
                        warn!("Failed to save rows to {}: {}", key, e);
                        return;
                    }
                }
                debug!("Saved {} rows to {}", count, key);
            });
        }
    }

    fn save_model(&self, name: &str, bytes: &[u8]) {
        let key = format!("model:{name}");
        let payload = bytes.to_vec();
        let mut conn = self.conn.clone();
        tokio::spawn(async move {
            match conn.set::<_, _, ()>(&key, payload).await {
                Ok(()) => debug!("Saved model to {}", key),
                Err(e) => warn!("Failed to save model to {}: {}", key, e),
            }
        });
    }
}
