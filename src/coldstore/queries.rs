use chrono::{DateTime, TimeZone, Utc};
use deadpool_postgres::Pool;

use crate::error::Result;
use crate::model::{Alert, AlertSeverity, AlertType, AnalyticsSnapshot, DataValidityStatus, OhlcBar, Tick};

fn to_datetime(ts_ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts_ms).single().unwrap_or_else(Utc::now)
}

/// Bulk-inserts ticks for a single symbol via `UNNEST`-based batch insert,
/// the `tokio-postgres` idiom for multi-row writes (no `COPY` support for
/// structured batches without a dedicated sink type).
pub async fn insert_ticks_batch(pool: &Pool, symbol: &str, ticks: &[Tick]) -> Result<u64> {
    if ticks.is_empty() {
        return Ok(0);
    }
    let client = pool.get().await?;

    let symbols: Vec<&str> = ticks.iter().map(|_| symbol).collect();
    let trade_ids: Vec<i64> = ticks.iter().map(|t| t.trade_id).collect();
    let prices: Vec<f64> = ticks.iter().map(|t| t.price).collect();
    let qtys: Vec<f64> = ticks.iter().map(|t| t.qty).collect();
    let times: Vec<DateTime<Utc>> = ticks.iter().map(|t| to_datetime(t.timestamp_ms)).collect();
    let makers: Vec<bool> = ticks.iter().map(|t| t.is_buyer_maker).collect();

    let rows = client
        .execute(
            "INSERT INTO ticks (symbol, trade_id, price, qty, time, is_buyer_maker)
             SELECT * FROM UNNEST($1::text[], $2::bigint[], $3::double precision[],
                                   $4::double precision[], $5::timestamptz[], $6::boolean[])
             ON CONFLICT (symbol, time, trade_id) DO NOTHING",
            &[&symbols, &trade_ids, &prices, &qtys, &times, &makers],
        )
        .await?;
    Ok(rows)
}

pub async fn insert_ohlc_batch(pool: &Pool, symbol: &str, interval: &str, bars: &[OhlcBar]) -> Result<u64> {
    if bars.is_empty() {
        return Ok(0);
    }
    let client = pool.get().await?;

    let symbols: Vec<&str> = bars.iter().map(|_| symbol).collect();
    let intervals: Vec<&str> = bars.iter().map(|_| interval).collect();
    let times: Vec<DateTime<Utc>> = bars.iter().map(|b| to_datetime(b.timestamp_ms)).collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let counts: Vec<i32> = bars.iter().map(|b| b.trade_count as i32).collect();

    let rows = client
        .execute(
            "INSERT INTO ohlc (symbol, interval, time, open, high, low, close, volume, trade_count)
             SELECT * FROM UNNEST($1::text[], $2::text[], $3::timestamptz[], $4::double precision[],
                                   $5::double precision[], $6::double precision[], $7::double precision[],
                                   $8::double precision[], $9::integer[])
             ON CONFLICT (symbol, interval, time) DO UPDATE SET
                open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low,
                close = EXCLUDED.close, volume = EXCLUDED.volume, trade_count = EXCLUDED.trade_count",
            &[&symbols, &intervals, &times, &opens, &highs, &lows, &closes, &volumes, &counts],
        )
        .await?;
    Ok(rows)
}

pub async fn insert_analytics_snapshot(pool: &Pool, snapshot: &AnalyticsSnapshot) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            "INSERT INTO analytics_snapshots (
                symbol, pair_symbol, time, last_price, price_change_pct, vwap, spread,
                hedge_ratio, z_score, correlation, adf_statistic, adf_pvalue, is_stationary,
                validity_status, tick_count
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
            &[
                &snapshot.symbol,
                &snapshot.pair_symbol,
                &to_datetime(snapshot.timestamp_ms),
                &snapshot.last_price,
                &snapshot.price_change_pct,
                &snapshot.vwap,
                &snapshot.spread,
                &snapshot.hedge_ratio,
                &snapshot.z_score,
                &snapshot.correlation,
                &snapshot.adf_statistic,
                &snapshot.adf_pvalue,
                &snapshot.is_stationary,
                &snapshot.validity_status.as_str(),
                &(snapshot.tick_count as i32),
            ],
        )
        .await?;
    Ok(())
}

pub async fn archive_alert(pool: &Pool, alert: &Alert) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            "INSERT INTO alerts_history (id, alert_type, symbol, message, time, severity, value, threshold, acknowledged)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (id) DO UPDATE SET acknowledged = EXCLUDED.acknowledged",
            &[
                &alert.id,
                &alert.alert_type.as_str(),
                &alert.symbol,
                &alert.message,
                &to_datetime(alert.timestamp_ms),
                &alert.severity.as_str(),
                &alert.value,
                &alert.threshold,
                &alert.acknowledged,
            ],
        )
        .await?;
    Ok(())
}

pub async fn get_ticks(
    pool: &Pool,
    symbol: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Tick>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT trade_id, price, qty, time, is_buyer_maker FROM ticks
             WHERE symbol = $1 AND time >= $2 AND time <= $3
             ORDER BY time DESC LIMIT $4",
            &[&symbol, &from, &to, &limit],
        )
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let time: DateTime<Utc> = row.get(3);
            Tick {
                trade_id: row.get(0),
                price: row.get(1),
                qty: row.get(2),
                timestamp_ms: time.timestamp_millis(),
                is_buyer_maker: row.get(4),
            }
        })
        .collect())
}

pub async fn get_ohlc(
    pool: &Pool,
    symbol: &str,
    interval: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<OhlcBar>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT time, open, high, low, close, volume, trade_count FROM ohlc
             WHERE symbol = $1 AND interval = $2 AND time >= $3 AND time <= $4
             ORDER BY time ASC LIMIT $5",
            &[&symbol, &interval, &from, &to, &limit],
        )
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let time: DateTime<Utc> = row.get(0);
            let count: i32 = row.get(6);
            OhlcBar {
                timestamp_ms: time.timestamp_millis(),
                open: row.get(1),
                high: row.get(2),
                low: row.get(3),
                close: row.get(4),
                volume: row.get(5),
                trade_count: count as u32,
            }
        })
        .collect())
}

/// Computes OHLC bars on demand from raw ticks via `time_bucket`, the
/// TimescaleDB aggregation primitive (falls back to plain `date_trunc`-like
/// bucketing if the extension is absent, since `time_bucket` is also
/// provided as a plain SQL function by the extension only — callers on a
/// bare Postgres instance should rely on `get_ohlc` against
/// already-archived bars instead).
pub async fn compute_ohlc_from_ticks(
    pool: &Pool,
    symbol: &str,
    bucket: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<OhlcBar>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT
                time_bucket($1::interval, time) AS bucket,
                (array_agg(price ORDER BY time ASC))[1] AS open,
                (array_agg(price ORDER BY time DESC))[1] AS close,
                MAX(price) AS high,
                MIN(price) AS low,
                SUM(qty) AS volume,
                COUNT(*) AS trade_count
             FROM ticks
             WHERE symbol = $2 AND time >= $3 AND time <= $4
             GROUP BY bucket
             ORDER BY bucket ASC
             LIMIT $5",
            &[&bucket, &symbol, &from, &to, &limit],
        )
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let time: DateTime<Utc> = row.get(0);
            let count: i64 = row.get(6);
            OhlcBar {
                timestamp_ms: time.timestamp_millis(),
                open: row.get(1),
                close: row.get(2),
                high: row.get(3),
                low: row.get(4),
                volume: row.get(5),
                trade_count: count as u32,
            }
        })
        .collect())
}

pub async fn get_pair_analytics_history(
    pool: &Pool,
    symbol_a: &str,
    symbol_b: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<AnalyticsSnapshot>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT symbol, pair_symbol, time, last_price, price_change_pct, vwap, spread,
                    hedge_ratio, z_score, correlation, adf_statistic, adf_pvalue, is_stationary,
                    validity_status, tick_count
             FROM analytics_snapshots
             WHERE symbol = $1 AND pair_symbol = $2 AND time >= $3 AND time <= $4
             ORDER BY time ASC LIMIT $5",
            &[&symbol_a, &symbol_b, &from, &to, &limit],
        )
        .await?;

    Ok(rows.into_iter().map(row_to_snapshot).collect())
}

fn row_to_snapshot(row: tokio_postgres::Row) -> AnalyticsSnapshot {
    let time: DateTime<Utc> = row.get(2);
    let tick_count: i32 = row.get(14);
    let validity: String = row.get(13);
    AnalyticsSnapshot {
        symbol: row.get(0),
        pair_symbol: row.get(1),
        timestamp_ms: time.timestamp_millis(),
        last_price: row.get(3),
        price_change_pct: row.get(4),
        vwap: row.get(5),
        spread: row.get(6),
        hedge_ratio: row.get(7),
        z_score: row.get(8),
        correlation: row.get(9),
        adf_statistic: row.get(10),
        adf_pvalue: row.get(11),
        is_stationary: row.get(12),
        data_freshness_ms: 0,
        validity_status: match validity.as_str() {
            "insufficient" => DataValidityStatus::Insufficient,
            "warming_up" => DataValidityStatus::WarmingUp,
            _ => DataValidityStatus::Valid,
        },
        tick_count: tick_count.max(0) as usize,
    }
}

pub async fn get_alerts_history(
    pool: &Pool,
    symbol: Option<&str>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    limit: i64,
) -> Result<Vec<Alert>> {
    let client = pool.get().await?;

    let mut sql = String::from(
        "SELECT id, alert_type, symbol, message, time, severity, value, threshold, acknowledged
         FROM alerts_history WHERE 1 = 1",
    );
    let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = Vec::new();
    let symbol_owned;
    if let Some(s) = symbol {
        symbol_owned = s.to_string();
        params.push(&symbol_owned);
        sql.push_str(&format!(" AND symbol = ${}", params.len()));
    }
    if let Some(from) = &from {
        params.push(from);
        sql.push_str(&format!(" AND time >= ${}", params.len()));
    }
    if let Some(to) = &to {
        params.push(to);
        sql.push_str(&format!(" AND time <= ${}", params.len()));
    }
    sql.push_str(" ORDER BY time DESC LIMIT $");
    sql.push_str(&(params.len() + 1).to_string());
    params.push(&limit);

    let rows = client.query(sql.as_str(), &params).await?;

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let time: DateTime<Utc> = row.get(4);
            let alert_type: String = row.get(1);
            let severity: String = row.get(5);
            Some(Alert {
                id: row.get(0),
                alert_type: AlertType::parse(&alert_type)?,
                symbol: row.get(2),
                message: row.get(3),
                timestamp_ms: time.timestamp_millis(),
                severity: AlertSeverity::parse(&severity)?,
                value: row.get(6),
                threshold: row.get(7),
                acknowledged: row.get(8),
            })
        })
        .collect())
}
