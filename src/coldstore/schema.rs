use deadpool_postgres::Pool;

/// Idempotent schema bootstrap. Table creation and indexing must succeed;
/// hypertable conversion is best-effort and never aborts startup, since a
/// bare Postgres instance (no TimescaleDB extension) is a legitimate
/// deployment target for small setups.
pub async fn init_schema(pool: &Pool) -> crate::error::Result<()> {
    let client = pool.get().await?;

    client
        .batch_execute(
            "CREATE TABLE IF NOT EXISTS ticks (
                symbol TEXT NOT NULL,
                trade_id BIGINT NOT NULL,
                price DOUBLE PRECISION NOT NULL,
                qty DOUBLE PRECISION NOT NULL,
                time TIMESTAMPTZ NOT NULL,
                is_buyer_maker BOOLEAN NOT NULL,
                PRIMARY KEY (symbol, time, trade_id)
            );

            CREATE TABLE IF NOT EXISTS ohlc (
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                time TIMESTAMPTZ NOT NULL,
                open DOUBLE PRECISION NOT NULL,
                high DOUBLE PRECISION NOT NULL,
                low DOUBLE PRECISION NOT NULL,
                close DOUBLE PRECISION NOT NULL,
                volume DOUBLE PRECISION NOT NULL,
                trade_count INTEGER NOT NULL,
                PRIMARY KEY (symbol, interval, time)
            );

            CREATE TABLE IF NOT EXISTS analytics_snapshots (
                symbol TEXT NOT NULL,
                pair_symbol TEXT,
                time TIMESTAMPTZ NOT NULL,
                last_price DOUBLE PRECISION,
                price_change_pct DOUBLE PRECISION,
                vwap DOUBLE PRECISION,
                spread DOUBLE PRECISION,
                hedge_ratio DOUBLE PRECISION,
                z_score DOUBLE PRECISION,
                correlation DOUBLE PRECISION,
                adf_statistic DOUBLE PRECISION,
                adf_pvalue DOUBLE PRECISION,
                is_stationary BOOLEAN,
                validity_status TEXT,
                tick_count INTEGER
            );

            CREATE TABLE IF NOT EXISTS alerts_history (
                id TEXT PRIMARY KEY,
                alert_type TEXT NOT NULL,
                symbol TEXT NOT NULL,
                message TEXT NOT NULL,
                time TIMESTAMPTZ NOT NULL,
                severity TEXT NOT NULL,
                value DOUBLE PRECISION,
                threshold DOUBLE PRECISION,
                acknowledged BOOLEAN NOT NULL
            );",
        )
        .await?;

    for (table, time_col) in [
        ("ticks", "time"),
        ("ohlc", "time"),
        ("analytics_snapshots", "time"),
        ("alerts_history", "time"),
    ] {
        let stmt = format!(
            "SELECT create_hypertable('{table}', '{time_col}', if_not_exists => TRUE, migrate_data => TRUE)"
        );
        if let Err(e) = client.execute(stmt.as_str(), &[]).await {
            tracing::warn!(table, error = %e, "hypertable conversion skipped (TimescaleDB extension may be absent)");
        }
    }

    client
        .batch_execute(
            "CREATE INDEX IF NOT EXISTS idx_ticks_symbol_time ON ticks (symbol, time DESC);
             CREATE INDEX IF NOT EXISTS idx_ohlc_symbol_interval_time ON ohlc (symbol, interval, time DESC);",
        )
        .await?;

    Ok(())
}
