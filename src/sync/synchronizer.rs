/// Incremental synchronization of bars and dividends against the store
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::provider::MarketDataProvider;
use crate::store::MarketStore;
use crate::sync::batcher::{BatchRun, CancelFlag, QuotaBatcher};
use crate::sync::retry::RetryingCaller;
use crate::sync::window::WindowPlanner;
use crate::types::{Config, DataKind, FetchTask, Instrument, SyncCursor};
use crate::utils::time::{market_today, parse_timezone};

/// Outcome of one synchronization run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSummary {
    pub run_id: String,
    pub kind: DataKind,
    pub started_at: DateTime<Utc>,
    pub duration_sec: i64,
    pub instruments_total: usize,
    /// Every planned window fetched and persisted
    pub instruments_synced: usize,
    /// At least one window failed or was left undispatched; safe to retry
    /// by re-running the same synchronization
    pub instruments_partial: usize,
    /// Nothing to fetch: the store was already current
    pub instruments_current: usize,
    pub windows_planned: usize,
    pub windows_failed: usize,
    /// Windows left undispatched by cancellation
    pub windows_skipped: usize,
    pub records_upserted: usize,
    pub cancelled: bool,
    pub errors: Vec<String>,
}

/// Drives one data kind at a time from cursor derivation through planning,
/// quota-batched fetching, and keyed upserts.
///
/// Re-running after a partial failure is safe: cursors are re-derived from
/// whatever the store holds, so only the still-missing windows are fetched.
pub struct Synchronizer {
    provider: Arc<dyn MarketDataProvider>,
    store: Arc<dyn MarketStore>,
    planner: WindowPlanner,
    batcher: QuotaBatcher,
    retry: RetryingCaller,
    exchange_tz: Tz,
}

impl Synchronizer {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<dyn MarketStore>,
        config: &Config,
    ) -> Result<Self> {
        let exchange_tz = parse_timezone(&config.provider.exchange_timezone)?;
        let settings = &config.sync;

        Ok(Synchronizer {
            provider,
            store,
            planner: WindowPlanner::new(settings.epoch_floor, settings.max_window_span_days),
            batcher: QuotaBatcher::new(
                settings.quota_per_window,
                Duration::from_secs(settings.window_cooldown_sec),
                settings.max_concurrency,
            ),
            retry: RetryingCaller::new(
                settings.max_attempts,
                Duration::from_secs(settings.retry_cooldown_sec),
                Duration::from_secs(settings.call_timeout_sec),
            ),
            exchange_tz,
        })
    }

    /// Completed/total fetch tasks of the run in flight
    pub fn progress(&self) -> (usize, usize) {
        self.batcher.progress()
    }

    pub async fn synchronize_bars(
        &self,
        instruments: &[Instrument],
        cancel: &CancelFlag,
    ) -> Result<SyncSummary> {
        self.synchronize_bars_as_of(instruments, market_today(self.exchange_tz), cancel)
            .await
    }

    pub async fn synchronize_bars_as_of(
        &self,
        instruments: &[Instrument],
        now: NaiveDate,
        cancel: &CancelFlag,
    ) -> Result<SyncSummary> {
        let started_at = Utc::now();
        info!(
            "📊 Starting bar synchronization for {} instruments (as of {})",
            instruments.len(),
            now
        );

        let mut tasks = Vec::new();
        let mut planned: HashMap<String, usize> = HashMap::new();
        let mut current = 0usize;

        for instrument in instruments {
            let latest = self.store.latest_bar(&instrument.id).await?;
            let cursor = SyncCursor::from_latest_bar(latest.as_ref());
            let windows = self.planner.plan(cursor, now);
            if windows.is_empty() {
                current += 1;
                continue;
            }
            planned.insert(instrument.id.clone(), windows.len());
            tasks.extend(windows.into_iter().map(|window| FetchTask {
                instrument: instrument.clone(),
                window,
            }));
        }

        let windows_planned = tasks.len();
        info!(
            "🗂  Planned {} fetch windows ({} instruments already current)",
            windows_planned, current
        );

        let provider = Arc::clone(&self.provider);
        let retry = self.retry;
        let run = self
            .batcher
            .run(
                tasks,
                move |task: FetchTask| {
                    let provider = Arc::clone(&provider);
                    async move {
                        retry
                            .call(|| {
                                let provider = Arc::clone(&provider);
                                let task = task.clone();
                                async move {
                                    provider.fetch_bars(&task.instrument, task.window).await
                                }
                            })
                            .await
                    }
                },
                cancel,
            )
            .await;

        let mut records_upserted = 0usize;
        let mut windows_failed = 0usize;
        let mut failed: HashMap<String, usize> = HashMap::new();
        let mut errors = Vec::new();

        for outcome in &run.outcomes {
            match &outcome.result {
                Ok(bars) => {
                    records_upserted += self.store.upsert_bars(bars).await?;
                }
                Err(e) => {
                    windows_failed += 1;
                    *failed
                        .entry(outcome.task.instrument.id.clone())
                        .or_insert(0) += 1;
                    errors.push(format!(
                        "{} {}: {}",
                        outcome.task.instrument.symbol, outcome.task.window, e
                    ));
                }
            }
        }

        let summary = self.summarize(
            DataKind::Bars,
            started_at,
            instruments.len(),
            current,
            &planned,
            &failed,
            windows_planned,
            windows_failed,
            records_upserted,
            errors,
            &run,
        );
        log_summary(&summary);
        Ok(summary)
    }

    pub async fn synchronize_dividends(
        &self,
        instruments: &[Instrument],
        cancel: &CancelFlag,
    ) -> Result<SyncSummary> {
        self.synchronize_dividends_as_of(instruments, market_today(self.exchange_tz), cancel)
            .await
    }

    pub async fn synchronize_dividends_as_of(
        &self,
        instruments: &[Instrument],
        now: NaiveDate,
        cancel: &CancelFlag,
    ) -> Result<SyncSummary> {
        let started_at = Utc::now();
        info!(
            "💰 Starting dividend synchronization for {} instruments (as of {})",
            instruments.len(),
            now
        );

        let mut tasks = Vec::new();
        let mut planned: HashMap<String, usize> = HashMap::new();
        let mut current = 0usize;

        for instrument in instruments {
            let latest = self.store.latest_dividend(&instrument.id).await?;
            let cursor = SyncCursor::from_latest_dividend(latest.as_ref());
            let windows = self.planner.plan(cursor, now);
            if windows.is_empty() {
                current += 1;
                continue;
            }
            planned.insert(instrument.id.clone(), windows.len());
            tasks.extend(windows.into_iter().map(|window| FetchTask {
                instrument: instrument.clone(),
                window,
            }));
        }

        let windows_planned = tasks.len();
        info!(
            "🗂  Planned {} fetch windows ({} instruments already current)",
            windows_planned, current
        );

        let provider = Arc::clone(&self.provider);
        let retry = self.retry;
        let run = self
            .batcher
            .run(
                tasks,
                move |task: FetchTask| {
                    let provider = Arc::clone(&provider);
                    async move {
                        retry
                            .call(|| {
                                let provider = Arc::clone(&provider);
                                let task = task.clone();
                                async move {
                                    provider.fetch_dividends(&task.instrument, task.window).await
                                }
                            })
                            .await
                    }
                },
                cancel,
            )
            .await;

        let mut records_upserted = 0usize;
        let mut windows_failed = 0usize;
        let mut failed: HashMap<String, usize> = HashMap::new();
        let mut errors = Vec::new();

        for outcome in &run.outcomes {
            match &outcome.result {
                Ok(events) => {
                    records_upserted += self.store.upsert_dividends(events).await?;
                }
                Err(e) => {
                    windows_failed += 1;
                    *failed
                        .entry(outcome.task.instrument.id.clone())
                        .or_insert(0) += 1;
                    errors.push(format!(
                        "{} {}: {}",
                        outcome.task.instrument.symbol, outcome.task.window, e
                    ));
                }
            }
        }

        let summary = self.summarize(
            DataKind::Dividends,
            started_at,
            instruments.len(),
            current,
            &planned,
            &failed,
            windows_planned,
            windows_failed,
            records_upserted,
            errors,
            &run,
        );
        log_summary(&summary);
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    fn summarize<T>(
        &self,
        kind: DataKind,
        started_at: DateTime<Utc>,
        instruments_total: usize,
        instruments_current: usize,
        planned: &HashMap<String, usize>,
        failed: &HashMap<String, usize>,
        windows_planned: usize,
        windows_failed: usize,
        records_upserted: usize,
        errors: Vec<String>,
        run: &BatchRun<T>,
    ) -> SyncSummary {
        let mut skipped_instruments: HashMap<String, usize> = HashMap::new();
        for task in &run.skipped {
            *skipped_instruments
                .entry(task.instrument.id.clone())
                .or_insert(0) += 1;
        }

        let mut synced = 0usize;
        let mut partial = 0usize;
        for instrument_id in planned.keys() {
            if failed.contains_key(instrument_id) || skipped_instruments.contains_key(instrument_id)
            {
                partial += 1;
            } else {
                synced += 1;
            }
        }

        SyncSummary {
            run_id: Uuid::new_v4().to_string(),
            kind,
            started_at,
            duration_sec: (Utc::now() - started_at).num_seconds(),
            instruments_total,
            instruments_synced: synced,
            instruments_partial: partial,
            instruments_current,
            windows_planned,
            windows_failed,
            windows_skipped: run.skipped.len(),
            records_upserted,
            cancelled: run.cancelled,
            errors,
        }
    }
}

fn log_summary(summary: &SyncSummary) {
    info!(
        "✅ {} sync complete in {}s (run {})",
        summary.kind.as_str(),
        summary.duration_sec,
        summary.run_id
    );
    info!(
        "   Instruments: {} synced, {} partial, {} already current (of {})",
        summary.instruments_synced,
        summary.instruments_partial,
        summary.instruments_current,
        summary.instruments_total
    );
    info!(
        "   Windows: {} planned, {} failed, {} skipped",
        summary.windows_planned, summary.windows_failed, summary.windows_skipped
    );
    info!("   Records upserted: {}", summary.records_upserted);
    if summary.cancelled {
        warn!("   Run was cancelled before all windows were dispatched");
    }
    if !summary.errors.is_empty() {
        warn!("   Errors encountered: {}", summary.errors.len());
    }
}
