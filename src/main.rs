/// Main entry point for the market-data sync service
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use marketsync::config::load_config;
use marketsync::provider::{HttpMarketDataProvider, MarketDataProvider};
use marketsync::store::{JsonlMarketStore, MarketStore};
use marketsync::sync::{CancelFlag, SyncSummary, Synchronizer};
use marketsync::types::{Config, Instrument};
use marketsync::Result;

/// Application state
struct SyncApp {
    config: Arc<Config>,
    provider: Arc<HttpMarketDataProvider>,
    synchronizer: Synchronizer,
    cancel: CancelFlag,
}

impl SyncApp {
    async fn new(config_path: &str) -> Result<Self> {
        // Load configuration
        let config = Arc::new(load_config(config_path)?);

        // Initialize logging
        tracing_subscriber::fmt()
            .with_env_filter(format!("marketsync={},info", config.log_level))
            .init();

        info!("Starting market data sync...");
        info!("Configuration loaded from {}", config_path);

        let store = Arc::new(JsonlMarketStore::open(&config.store.data_dir).await?);
        let provider = Arc::new(HttpMarketDataProvider::new(&config.provider)?);
        let synchronizer = Synchronizer::new(
            Arc::clone(&provider) as Arc<dyn MarketDataProvider>,
            Arc::clone(&store) as Arc<dyn MarketStore>,
            &config,
        )?;

        Ok(SyncApp {
            config,
            provider,
            synchronizer,
            cancel: CancelFlag::new(),
        })
    }

    async fn run(&self) -> Result<()> {
        self.setup_shutdown_handler();

        // The provider session lives for exactly one run and is released on
        // every exit path
        self.provider.connect().await?;
        let result = self.sync_all().await;
        self.provider.close().await;
        result
    }

    fn setup_shutdown_handler(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Shutdown requested, finishing in-flight work...");
                cancel.cancel();
            }
        });
    }

    async fn sync_all(&self) -> Result<()> {
        let instruments = self.tracked_instruments().await?;
        if instruments.is_empty() {
            warn!("No instruments to synchronize");
            return Ok(());
        }

        info!("🚀 Synchronizing {} instruments", instruments.len());

        let bars = self
            .synchronizer
            .synchronize_bars(&instruments, &self.cancel)
            .await?;
        self.save_summary(&bars).await.ok();

        if self.cancel.is_cancelled() {
            warn!("Skipping dividend sync after cancellation");
            return Ok(());
        }

        let dividends = self
            .synchronizer
            .synchronize_dividends(&instruments, &self.cancel)
            .await?;
        self.save_summary(&dividends).await.ok();

        Ok(())
    }

    /// Provider listing filtered down to the configured universe
    async fn tracked_instruments(&self) -> Result<Vec<Instrument>> {
        let listed = self.provider.list_instruments().await?;
        if self.config.instruments.is_empty() {
            return Ok(listed);
        }

        let tracked: Vec<Instrument> = listed
            .into_iter()
            .filter(|instrument| {
                self.config
                    .instruments
                    .iter()
                    .any(|symbol| symbol.eq_ignore_ascii_case(&instrument.symbol))
            })
            .collect();

        for symbol in &self.config.instruments {
            if !tracked
                .iter()
                .any(|instrument| instrument.symbol.eq_ignore_ascii_case(symbol))
            {
                warn!("Configured symbol {} not found in provider listing", symbol);
            }
        }

        Ok(tracked)
    }

    /// Save run summary to disk
    async fn save_summary(&self, summary: &SyncSummary) -> Result<()> {
        let filename = format!(
            "{}/sync_summary_{}_{}.json",
            self.config.store.data_dir,
            summary.kind.as_str(),
            summary.started_at.format("%Y%m%d_%H%M%S")
        );

        let json = serde_json::to_string_pretty(summary)?;
        tokio::fs::write(&filename, json).await?;

        info!("💾 Saved sync summary to {}", filename);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let app = SyncApp::new(&config_path)
        .await
        .with_context(|| format!("failed to start with config {}", config_path))?;

    app.run().await.context("sync run failed")?;

    info!("Done");
    Ok(())
}
