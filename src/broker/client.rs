use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};

use crate::config::BrokerKeys;
use crate::error::Result;
use crate::model::{Alert, LogEntry};

/// Uniform access to the broker's four primitives: append-trimmed stream,
/// numeric time series, hash map, and publish/subscribe — over a single
/// connection per service, per §4.A. Each service owns one instance; the
/// adapter MUST NOT be shared across unrelated lifecycles.
#[derive(Clone)]
pub struct BrokerAdapter {
    service_name: String,
    url: String,
    conn: ConnectionManager,
    stats: std::sync::Arc<BrokerStats>,
}

#[derive(Debug, Default)]
pub struct BrokerStats {
    pub operations: AtomicU64,
    pub errors: AtomicU64,
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

impl BrokerAdapter {
    /// Connects to the broker. Fails with `PipelineError::Broker` if the
    /// broker is unreachable — a Fatal error at startup (§7).
    pub async fn connect(service_name: impl Into<String>, url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        let service_name = service_name.into();
        let adapter = Self {
            service_name: service_name.clone(),
            url: url.to_string(),
            conn,
            stats: std::sync::Arc::new(BrokerStats::default()),
        };
        adapter
            .log_op("connect", None, format!("connected as {service_name}"), 0.0)
            .await;
        Ok(adapter)
    }

    pub fn stats(&self) -> &BrokerStats {
        &self.stats
    }

    /// Publishes a structured log entry on `channel:logs`. This is the
    /// mechanism by which the Alert/Log Sink observes operation counts
    /// without sharing in-process state with the caller, per §9's note
    /// that cross-worker coordination flows through the broker's pub/sub.
    /// Failures here are swallowed (logging must never fail the caller's
    /// real operation).
    async fn log_op(&self, operation: &str, key: Option<&str>, message: String, duration_ms: f64) {
        self.stats.operations.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("broker_operations_total", "operation" => operation.to_string(), "service" => self.service_name.clone())
            .increment(1);
        let entry = LogEntry {
            timestamp_ms: now_ms(),
            service: self.service_name.clone(),
            level: "INFO".to_string(),
            operation: operation.to_string(),
            key: key.map(|k| k.to_string()),
            message,
            duration_ms: Some(duration_ms),
            aggregated_count: None,
        };
        if let Ok(payload) = serde_json::to_string(&entry) {
            let mut conn = self.conn.clone();
            if let Err(e) = conn
                .publish::<_, _, i64>(BrokerKeys::CHANNEL_LOGS, payload)
                .await
            {
                tracing::debug!(error = %e, "failed to publish log entry");
            }
        }
    }

    // ==================== Stream Operations ====================

    const STREAM_RETENTION_MS: i64 = 24 * 60 * 60 * 1000;

    /// Atomically appends to a stream, applying approximate time-based
    /// retention by trimming entries older than `now - retention`.
    pub async fn stream_append(
        &self,
        key: &str,
        fields: Vec<(String, String)>,
    ) -> Result<String> {
        let start = Instant::now();
        let min_id = format!("{}-0", now_ms() - Self::STREAM_RETENTION_MS);

        let mut conn = self.conn.clone();
        let entry_id: String = redis::cmd("XADD")
            .arg(key)
            .arg("MINID")
            .arg("~")
            .arg(&min_id)
            .arg("*")
            .arg(fields)
            .query_async(&mut conn)
            .await?;

        let duration = start.elapsed().as_secs_f64() * 1000.0;
        self.log_op(
            "stream_write",
            Some(key),
            format!("added entry {entry_id}"),
            duration,
        )
        .await;
        Ok(entry_id)
    }

    /// Reads from one or more streams, blocking up to `block_ms`.
    /// `cursor == "$"` means "only entries newer than call time".
    pub async fn stream_read(
        &self,
        cursors: &[(String, String)],
        max_count: usize,
        block_ms: usize,
    ) -> Result<Vec<(String, Vec<(String, HashMap<String, String>)>)>> {
        let start = Instant::now();
        let keys: Vec<&str> = cursors.iter().map(|(k, _)| k.as_str()).collect();
        let ids: Vec<&str> = cursors.iter().map(|(_, v)| v.as_str()).collect();

        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XREAD");
        cmd.arg("COUNT").arg(max_count).arg("BLOCK").arg(block_ms);
        cmd.arg("STREAMS");
        for k in &keys {
            cmd.arg(k);
        }
        for id in &ids {
            cmd.arg(id);
        }

        let raw: RedisResult<redis::streams::StreamReadReply> = cmd.query_async(&mut conn).await;
        let reply = match raw {
            Ok(r) => r,
            Err(e) if e.to_string().contains("Response was nil") => {
                redis::streams::StreamReadReply { keys: vec![] }
            }
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::with_capacity(reply.keys.len());
        let mut total_entries = 0usize;
        for stream_key in reply.keys {
            let mut entries = Vec::with_capacity(stream_key.ids.len());
            for id in stream_key.ids {
                let mut fields = HashMap::new();
                for (field, value) in id.map {
                    if let redis::Value::Data(bytes) = value {
                        fields.insert(field, String::from_utf8_lossy(&bytes).to_string());
                    }
                }
                entries.push((id.id, fields));
            }
            total_entries += entries.len();
            out.push((stream_key.key, entries));
        }

        let duration = start.elapsed().as_secs_f64() * 1000.0;
        self.log_op(
            "stream_read",
            Some(&keys.join(",")),
            format!("read {total_entries} entries"),
            duration,
        )
        .await;
        Ok(out)
    }

    /// Inclusive ascending range read. `-`/`+` denote beginning/end.
    pub async fn stream_range(
        &self,
        key: &str,
        from_id: &str,
        to_id: &str,
        max: Option<usize>,
    ) -> Result<Vec<(String, HashMap<String, String>)>> {
        let start = Instant::now();
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XRANGE");
        cmd.arg(key).arg(from_id).arg(to_id);
        if let Some(max) = max {
            cmd.arg("COUNT").arg(max);
        }
        let reply: Vec<(String, HashMap<String, String>)> = cmd.query_async(&mut conn).await?;
        let duration = start.elapsed().as_secs_f64() * 1000.0;
        self.log_op(
            "stream_xrange",
            Some(key),
            format!("read {} entries", reply.len()),
            duration,
        )
        .await;
        Ok(reply)
    }

    /// Returns the id of the most recently added entry, or `None` if the
    /// stream doesn't exist yet. Used to resolve a `"$"` cursor to a
    /// concrete exclusive starting point at bootstrap time, the same way
    /// a live `$`-blocked `XREAD` would only see entries added afterward.
    pub async fn stream_last_id(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let reply: Vec<(String, HashMap<String, String>)> = redis::cmd("XREVRANGE")
            .arg(key)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;
        Ok(reply.into_iter().next().map(|(id, _)| id))
    }

    // ==================== TimeSeries Operations ====================

    /// Appends a `(timestamp, value)` sample. Creates the series on first
    /// write with the given retention and a keep-latest duplicate policy.
    pub async fn ts_append(&self, key: &str, ts_ms: i64, value: f64, retention_ms: i64) -> Result<()> {
        let start = Instant::now();
        let mut conn = self.conn.clone();
        let res: RedisResult<i64> = redis::cmd("TS.ADD")
            .arg(key)
            .arg(ts_ms)
            .arg(value)
            .arg("RETENTION")
            .arg(retention_ms)
            .arg("ON_DUPLICATE")
            .arg("LAST")
            .query_async(&mut conn)
            .await;

        if let Err(e) = res {
            // Key may not exist yet on some broker configurations; create
            // then retry once.
            let msg = e.to_string();
            if msg.contains("TSDB") || msg.contains("ERR") {
                let _: () = redis::cmd("TS.CREATE")
                    .arg(key)
                    .arg("RETENTION")
                    .arg(retention_ms)
                    .arg("DUPLICATE_POLICY")
                    .arg("LAST")
                    .query_async(&mut conn)
                    .await?;
                let _: i64 = redis::cmd("TS.ADD")
                    .arg(key)
                    .arg(ts_ms)
                    .arg(value)
                    .query_async(&mut conn)
                    .await?;
            } else {
                return Err(e.into());
            }
        }

        let duration = start.elapsed().as_secs_f64() * 1000.0;
        self.log_op("ts_write", Some(key), format!("added value at {ts_ms}"), duration)
            .await;
        Ok(())
    }

    /// Ascending range query, optionally bucket-aggregated.
    pub async fn ts_range(
        &self,
        key: &str,
        from_ms: i64,
        to_ms: i64,
        agg: Option<(&str, i64)>,
    ) -> Result<Vec<(i64, f64)>> {
        let start = Instant::now();
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("TS.RANGE");
        cmd.arg(key).arg(from_ms).arg(to_ms);
        if let Some((agg_fn, bucket_ms)) = agg {
            cmd.arg("AGGREGATION").arg(agg_fn).arg(bucket_ms);
        }
        let raw: RedisResult<Vec<(i64, f64)>> = cmd.query_async(&mut conn).await;
        let result = raw.unwrap_or_default();
        let duration = start.elapsed().as_secs_f64() * 1000.0;
        self.log_op(
            "ts_read",
            Some(key),
            format!("retrieved {} samples", result.len()),
            duration,
        )
        .await;
        Ok(result)
    }

    // ==================== Hash Operations ====================

    pub async fn hash_put(&self, key: &str, fields: Vec<(String, String)>) -> Result<()> {
        let start = Instant::now();
        let mut conn = self.conn.clone();
        let n = fields.len();
        let _: () = conn.hset_multiple(key, &fields).await?;
        let duration = start.elapsed().as_secs_f64() * 1000.0;
        self.log_op("hash_write", Some(key), format!("set {n} fields"), duration)
            .await;
        Ok(())
    }

    pub async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let start = Instant::now();
        let mut conn = self.conn.clone();
        let result: HashMap<String, String> = conn.hgetall(key).await?;
        let duration = start.elapsed().as_secs_f64() * 1000.0;
        self.log_op(
            "hash_read",
            Some(key),
            format!("got {} fields", result.len()),
            duration,
        )
        .await;
        Ok(result)
    }

    pub async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let result: Option<String> = conn.hget(key, field).await?;
        Ok(result)
    }

    // ==================== Pub/Sub Operations ====================

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let subscribers: i64 = conn.publish(channel, payload).await?;
        Ok(subscribers)
    }

    /// Returns a raw multiplexed connection for building a dedicated
    /// subscription; the broker requires its own connection for pub/sub,
    /// separate from the shared `ConnectionManager` used for commands.
    pub async fn subscribe_connection(&self) -> Result<redis::aio::PubSub> {
        let client = redis::Client::open(self.url.as_str())?;
        let pubsub = client.get_async_connection().await?.into_pubsub();
        Ok(pubsub)
    }

    // ==================== Alert Operations (Hot Storage) ====================

    pub async fn add_alert(&self, alert: &Alert, ttl_hours: i64) -> Result<String> {
        let mut conn = self.conn.clone();
        let key = BrokerKeys::alert(&alert.id);
        let fields = alert.to_broker_fields();
        let _: () = conn.hset_multiple(&key, &fields).await?;
        let _: () = conn.expire(&key, ttl_hours * 3600).await?;
        let _: () = conn
            .zadd(BrokerKeys::ALERTS_ACTIVE, &alert.id, alert.timestamp_ms)
            .await?;
        self.log_op("alert_write", Some(&key), format!("added alert {}", alert.id), 0.0)
            .await;
        Ok(alert.id.clone())
    }

    pub async fn list_active_alerts(&self, limit: usize, symbol: Option<&str>) -> Result<Vec<Alert>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .zrevrange(BrokerKeys::ALERTS_ACTIVE, 0, limit as isize - 1)
            .await?;

        let mut alerts = Vec::new();
        for id in ids {
            let fields: HashMap<String, String> = conn.hgetall(BrokerKeys::alert(&id)).await?;
            if fields.is_empty() {
                // Stale index entry whose hash has expired; best-effort prune.
                let _: RedisResult<i64> = conn.zrem(BrokerKeys::ALERTS_ACTIVE, &id).await;
                continue;
            }
            if let Some(alert) = Alert::from_broker_fields(&fields) {
                if symbol.map_or(true, |s| alert.symbol.eq_ignore_ascii_case(s)) {
                    alerts.push(alert);
                }
            }
        }
        Ok(alerts)
    }

    pub async fn ack_alert(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let key = BrokerKeys::alert(id);
        let exists: bool = conn.exists(&key).await?;
        if exists {
            let _: () = conn.hset(&key, "acknowledged", "1").await?;
        }
        Ok(exists)
    }

    /// Removes a single alert's hash and active-set entry, e.g. once the
    /// archivist has durably copied it into cold storage.
    pub async fn remove_alert(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(BrokerKeys::alert(id)).await?;
        let _: () = conn.zrem(BrokerKeys::ALERTS_ACTIVE, id).await?;
        Ok(())
    }

    pub async fn prune_alerts(&self, max_age_hours: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        let min_ts = now_ms() - max_age_hours * 3600 * 1000;
        let removed: i64 = conn
            .zrembyscore(BrokerKeys::ALERTS_ACTIVE, "-inf", min_ts)
            .await?;
        Ok(removed)
    }

    // ==================== Pipelined batch writes ====================

    /// Begins a batch of writes spanning multiple primitives. Flush is
    /// atomic only within the underlying `MULTI`/`EXEC`; failure of any
    /// operation fails the whole batch. Used whenever >= 2 writes target
    /// the same flush window (§4.A design note).
    pub fn pipeline(&self) -> BrokerPipeline {
        BrokerPipeline {
            conn: self.conn.clone(),
            pipe: redis::pipe(),
            ops: 0,
        }
    }
}

pub struct BrokerPipeline {
    conn: ConnectionManager,
    pipe: redis::Pipeline,
    ops: usize,
}

impl BrokerPipeline {
    pub fn stream_append(&mut self, key: &str, fields: &[(String, String)], retention_ms: i64) -> &mut Self {
        let min_id = format!("{}-0", now_ms() - retention_ms);
        self.pipe
            .cmd("XADD")
            .arg(key)
            .arg("MINID")
            .arg("~")
            .arg(&min_id)
            .arg("*")
            .arg(fields)
            .ignore();
        self.ops += 1;
        self
    }

    pub fn ts_append(&mut self, key: &str, ts_ms: i64, value: f64, retention_ms: i64) -> &mut Self {
        self.pipe
            .cmd("TS.ADD")
            .arg(key)
            .arg(ts_ms)
            .arg(value)
            .arg("RETENTION")
            .arg(retention_ms)
            .arg("ON_DUPLICATE")
            .arg("LAST")
            .ignore();
        self.ops += 1;
        self
    }

    pub fn len(&self) -> usize {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops == 0
    }

    /// Executes the accumulated commands against the shared connection.
    pub async fn execute(&mut self) -> Result<()> {
        if self.ops == 0 {
            return Ok(());
        }
        let _: () = self.pipe.query_async(&mut self.conn).await?;
        Ok(())
    }
}

impl std::fmt::Debug for BrokerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerAdapter")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_positive_and_increasing() {
        let a = now_ms();
        let b = now_ms();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[tokio::test]
    async fn test_stream_and_alert_round_trip() -> Result<()> {
        let adapter = match BrokerAdapter::connect("test_service", "redis://localhost:6379").await
        {
            Ok(a) => a,
            Err(_) => return Ok(()), // no broker available in this environment
        };

        let key = "stream:ticks:TESTUSDT";
        adapter
            .stream_append(key, vec![("price".to_string(), "100.5".to_string())])
            .await?;

        let entries = adapter
            .stream_range(key, "-", "+", Some(10))
            .await?;
        assert!(!entries.is_empty());

        let alert = Alert {
            id: "test-alert-1".into(),
            alert_type: crate::model::AlertType::ZScoreHigh,
            symbol: "TESTUSDT".into(),
            message: "test".into(),
            timestamp_ms: now_ms(),
            severity: crate::model::AlertSeverity::Warning,
            value: Some(3.0),
            threshold: Some(2.0),
            acknowledged: false,
        };
        adapter.add_alert(&alert, 1).await?;
        let active = adapter.list_active_alerts(10, Some("TESTUSDT")).await?;
        assert!(active.iter().any(|a| a.id == alert.id));

        Ok(())
    }
}
