//! One Redis stream read through a consumer group.
//!
//! Entries stay pending until acknowledged. Pending entries idle past a
//! threshold are reclaimed by another consumer; the delivery count Redis
//! keeps per entry decides when an entry is dead-lettered instead.

use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};

/// One message handed to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Stream entry ID
    pub id: String,
    /// Serialized message body
    pub payload: String,
    /// Times this entry has been delivered, this delivery included
    pub delivery_count: u64,
}

/// An entry that cannot be handed to a consumer, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    /// The entry as far as it could be read; `payload` lists its raw fields
    pub delivery: Delivery,
    pub reason: String,
}

/// Entries returned by one read or claim.
#[derive(Debug, Default)]
pub struct ReadBatch {
    pub deliveries: Vec<Delivery>,
    /// Entries to dead-letter instead of processing
    pub rejected: Vec<Rejected>,
}

impl ReadBatch {
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty() && self.rejected.is_empty()
    }

    fn push(&mut self, entry: Result<Delivery, Rejected>) {
        match entry {
            Ok(delivery) => self.deliveries.push(delivery),
            Err(rejected) => self.rejected.push(rejected),
        }
    }
}

/// A stream plus the consumer group reading it.
#[derive(Clone)]
pub struct StreamQueue {
    client: redis::Client,
    stream: String,
    group: String,
    payload_field: &'static str,
}

impl StreamQueue {
    pub fn new(
        client: redis::Client,
        stream: impl Into<String>,
        group: impl Into<String>,
        payload_field: &'static str,
    ) -> Self {
        Self {
            client,
            stream: stream.into(),
            group: group.into(),
            payload_field,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(format!("{}: {}", self.stream, e)))
    }

    /// Create the consumer group (and the stream) if missing.
    ///
    /// The group starts at the beginning of the stream so entries written
    /// before the first consumer came up are still delivered.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!(stream = %self.stream, group = %self.group, "Created consumer group"),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream = %self.stream, group = %self.group, "Consumer group already exists");
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Append an entry. `payload` goes under the queue's payload field,
    /// followed by any extra fields.
    pub async fn publish(&self, payload: &str, extra: &[(&str, &str)]) -> QueueResult<String> {
        let mut conn = self.connection().await?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream).arg("*").arg(self.payload_field).arg(payload);
        for (field, value) in extra {
            cmd.arg(*field).arg(*value);
        }

        let id: String = cmd.query_async(&mut conn).await?;
        debug!(stream = %self.stream, id = %id, "Published entry");
        Ok(id)
    }

    /// Read up to `count` never-delivered entries, blocking up to `block_ms`.
    pub async fn read_group(
        &self,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> QueueResult<ReadBatch> {
        let mut conn = self.connection().await?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.stream)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut batch = ReadBatch::default();
        for entry in reply.into_iter().flat_map(|r| r.keys).flat_map(|key| key.ids) {
            batch.push(self.delivery(entry, 1));
        }
        Ok(batch)
    }

    /// Acknowledge and delete entries.
    pub async fn ack(&self, ids: &[String]) -> QueueResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;

        conn.xack::<_, _, _, ()>(&self.stream, &self.group, ids).await?;
        conn.xdel::<_, _, ()>(&self.stream, ids).await?;

        debug!(stream = %self.stream, count = ids.len(), "Acknowledged entries");
        Ok(())
    }

    /// Take over entries pending longer than `min_idle_ms` on any consumer.
    pub async fn claim_stale(
        &self,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<ReadBatch> {
        let mut conn = self.connection().await?;

        let pending: StreamPendingCountReply = conn
            .xpending_count(&self.stream, &self.group, "-", "+", count)
            .await?;

        let stale: Vec<(String, u64)> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms as u64 >= min_idle_ms)
            .map(|p| (p.id, p.times_delivered as u64))
            .collect();

        if stale.is_empty() {
            return Ok(ReadBatch::default());
        }

        let ids: Vec<&str> = stale.iter().map(|(id, _)| id.as_str()).collect();
        let claimed: StreamClaimReply = conn
            .xclaim(&self.stream, &self.group, consumer, min_idle_ms, &ids)
            .await?;

        // Entries deleted while pending come back without fields.
        let mut batch = ReadBatch::default();
        for entry in claimed.ids {
            let previous = stale
                .iter()
                .find(|(id, _)| *id == entry.id)
                .map(|(_, n)| *n)
                .unwrap_or(0);
            if entry.map.is_empty() {
                warn!(stream = %self.stream, id = %entry.id, "Claimed entry has no fields, acknowledging");
                self.ack(std::slice::from_ref(&entry.id)).await?;
                continue;
            }
            batch.push(self.delivery(entry, previous + 1));
        }

        if !batch.is_empty() {
            info!(
                stream = %self.stream,
                count = batch.deliveries.len(),
                rejected = batch.rejected.len(),
                "Claimed stale entries"
            );
        }
        Ok(batch)
    }

    /// Copy an entry to `dlq_stream` with the failure reason, then ack it.
    pub async fn dead_letter(&self, dlq_stream: &str, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XADD")
            .arg(dlq_stream)
            .arg("*")
            .arg("source_stream")
            .arg(&self.stream)
            .arg("original_id")
            .arg(&delivery.id)
            .arg("payload")
            .arg(&delivery.payload)
            .arg("error")
            .arg(reason)
            .arg("delivery_count")
            .arg(delivery.delivery_count)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(std::slice::from_ref(&delivery.id)).await?;

        warn!(
            stream = %self.stream,
            id = %delivery.id,
            deliveries = delivery.delivery_count,
            "Moved entry to dead letter stream: {}",
            reason
        );
        Ok(())
    }

    /// Number of entries currently in the stream.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        Ok(conn.xlen(&self.stream).await?)
    }

    /// Map an entry to a delivery, or reject it when the payload field is
    /// missing or not a string.
    fn delivery(&self, entry: StreamId, delivery_count: u64) -> Result<Delivery, Rejected> {
        match entry.get::<String>(self.payload_field) {
            Some(payload) => Ok(Delivery {
                id: entry.id,
                payload,
                delivery_count,
            }),
            None => {
                let mut fields: Vec<&String> = entry.map.keys().collect();
                fields.sort();
                let fields = fields.iter().map(|f| f.as_str()).collect::<Vec<_>>().join(",");
                warn!(
                    stream = %self.stream,
                    id = %entry.id,
                    fields = %fields,
                    "Entry has no usable {} field",
                    self.payload_field
                );
                Err(Rejected {
                    reason: QueueError::malformed(
                        &entry.id,
                        format!("missing field {}", self.payload_field),
                    )
                    .to_string(),
                    delivery: Delivery {
                        id: entry.id,
                        payload: fields,
                        delivery_count,
                    },
                })
            }
        }
    }
}
