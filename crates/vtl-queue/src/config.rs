//! Queue configuration.

use std::time::Duration;

/// Stream names, consumer groups and delivery limits.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream carrying raw-interval change records
    pub change_feed_stream: String,
    /// Consumer group of the forwarding relay
    pub relay_group: String,
    /// Prefix of the contribution shard streams (`{prefix}:{shard}`)
    pub contribution_stream_prefix: String,
    /// Consumer group of the aggregate updater
    pub aggregator_group: String,
    /// Number of contribution shard streams
    pub contribution_shards: u32,
    /// Dead letter stream name
    pub dlq_stream: String,
    /// Deliveries allowed before a message is dead-lettered
    pub max_deliveries: u64,
    /// How long a group read blocks waiting for messages
    pub block_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            change_feed_stream: "vtl:raw-changes".to_string(),
            relay_group: "vtl:relay".to_string(),
            contribution_stream_prefix: "vtl:contributions".to_string(),
            aggregator_group: "vtl:aggregators".to_string(),
            contribution_shards: 4,
            dlq_stream: "vtl:dlq".to_string(),
            max_deliveries: 5,
            block_timeout: Duration::from_millis(5000),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            change_feed_stream: std::env::var("QUEUE_CHANGE_FEED_STREAM")
                .unwrap_or(defaults.change_feed_stream),
            relay_group: std::env::var("QUEUE_RELAY_GROUP").unwrap_or(defaults.relay_group),
            contribution_stream_prefix: std::env::var("QUEUE_CONTRIBUTION_STREAM")
                .unwrap_or(defaults.contribution_stream_prefix),
            aggregator_group: std::env::var("QUEUE_AGGREGATOR_GROUP")
                .unwrap_or(defaults.aggregator_group),
            contribution_shards: std::env::var("QUEUE_CONTRIBUTION_SHARDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.contribution_shards),
            dlq_stream: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream),
            max_deliveries: std::env::var("QUEUE_MAX_DELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_deliveries),
            block_timeout: Duration::from_millis(
                std::env::var("QUEUE_BLOCK_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.block_timeout.as_millis() as u64),
            ),
        }
    }

    /// Stream name of one contribution shard.
    pub fn contribution_stream(&self, shard: u32) -> String {
        format!("{}:{}", self.contribution_stream_prefix, shard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        std::env::remove_var("QUEUE_CONTRIBUTION_SHARDS");
        std::env::remove_var("QUEUE_MAX_DELIVERIES");
        std::env::remove_var("QUEUE_CHANGE_FEED_STREAM");

        let config = QueueConfig::from_env();
        assert_eq!(config.contribution_shards, 4);
        assert_eq!(config.max_deliveries, 5);
        assert_eq!(config.change_feed_stream, "vtl:raw-changes");
    }

    #[test]
    #[serial]
    fn test_zero_shards_falls_back_to_default() {
        std::env::set_var("QUEUE_CONTRIBUTION_SHARDS", "0");
        assert_eq!(QueueConfig::from_env().contribution_shards, 4);

        std::env::set_var("QUEUE_CONTRIBUTION_SHARDS", "16");
        assert_eq!(QueueConfig::from_env().contribution_shards, 16);

        std::env::remove_var("QUEUE_CONTRIBUTION_SHARDS");
    }

    #[test]
    fn test_contribution_stream_names() {
        let config = QueueConfig::default();
        assert_eq!(config.contribution_stream(0), "vtl:contributions:0");
        assert_eq!(config.contribution_stream(3), "vtl:contributions:3");
    }
}
