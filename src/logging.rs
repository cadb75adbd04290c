// src/logging.rs
// Logger setup for binaries and dry-run harnesses

use crate::settings::LogSettings;

/// Installs the process logger. `RUST_LOG` takes precedence over `settings.level`.
///
/// Engine events are `tracing` records forwarded through the `log` facade, so the
/// plain `env_logger` backend sees them. With the `observability` feature and
/// `settings.json` set, a JSON `tracing-subscriber` is installed instead.
pub fn init(settings: &LogSettings) -> anyhow::Result<()> {
    #[cfg(feature = "observability")]
    if settings.json {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.level));
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install JSON subscriber: {}", e))?;
        return Ok(());
    }

    env_logger::Builder::new()
        .parse_filters(&settings.level)
        .parse_env("RUST_LOG")
        .try_init()?;

    #[cfg(not(feature = "observability"))]
    if settings.json {
        log::warn!("JSON logs need the `observability` feature, using plain output");
    }
    Ok(())
}

/// Starts the Prometheus exporter when `settings.metrics_addr` is set.
pub fn init_metrics(settings: &LogSettings) -> anyhow::Result<()> {
    let Some(addr) = settings.metrics_addr else {
        return Ok(());
    };

    #[cfg(feature = "observability")]
    {
        crate::metrics::install_prometheus_exporter(addr)?;
        log::info!("metrics exporter listening on {}", addr);
    }

    #[cfg(not(feature = "observability"))]
    log::warn!("metrics listener {} ignored, build with the `observability` feature", addr);

    Ok(())
}
