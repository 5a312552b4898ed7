//! Backend health check command.

use std::time::Instant;

use anyhow::{Context, Result};
use console::style;

use crate::state::AppState;

/// Ping the backend and report round-trip latency. Unreachable is an error.
pub async fn ping(state: &AppState, json: bool) -> Result<()> {
    let store_config = state.store.config();
    let started = Instant::now();
    state
        .store
        .ping()
        .await
        .with_context(|| format!("Backend {}:{} is unreachable", store_config.host, store_config.port))?;
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "host": store_config.host,
            "port": store_config.port,
            "database": store_config.database,
            "tls": store_config.tls,
            "ok": true,
            "latency_ms": latency_ms,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}:{}/{} responded in {:.1}ms",
        style("ok").green(),
        style(&store_config.host).cyan(),
        store_config.port,
        store_config.database,
        latency_ms,
    );
    println!();

    Ok(())
}
