/// Core type definitions for the market-data sync service
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Tradable security tracked at the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    /// Internal catalog id
    pub id: String,
    /// Identifier the provider knows this instrument by
    pub external_id: String,
    pub symbol: String,
    pub name: String,
    pub currency: String,
}

/// Daily OHLCV bar, at most one per (instrument, date)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument_id: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    /// False while the bar is still forming; such a bar is re-fetched on the
    /// next run and overwritten in place once final.
    pub is_complete: bool,
}

/// Dividend kind as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DividendKind {
    Cash,
    Stock,
    Special,
}

impl DividendKind {
    pub fn as_str(&self) -> &str {
        match self {
            DividendKind::Cash => "cash",
            DividendKind::Stock => "stock",
            DividendKind::Special => "special",
        }
    }
}

/// Dividend event, at most one per (instrument, record_date)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DividendEvent {
    pub instrument_id: String,
    pub record_date: NaiveDate,
    pub declared_date: Option<NaiveDate>,
    pub ex_date: Option<NaiveDate>,
    pub payment_date: Option<NaiveDate>,
    pub amount: f64,
    pub currency: String,
    pub kind: DividendKind,
}

/// The two time series the engine keeps in sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Bars,
    Dividends,
}

impl DataKind {
    pub fn as_str(&self) -> &str {
        match self {
            DataKind::Bars => "bars",
            DataKind::Dividends => "dividends",
        }
    }
}

/// Latest synchronized point for one (instrument, data kind).
///
/// Derived from the store's latest-record query at the start of every run;
/// never persisted on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCursor {
    pub last_point: NaiveDate,
    pub complete: bool,
}

impl SyncCursor {
    pub fn from_latest_bar(bar: Option<&Bar>) -> Option<SyncCursor> {
        bar.map(|b| SyncCursor {
            last_point: b.date,
            complete: b.is_complete,
        })
    }

    /// A stored dividend record is final; there is no provisional state.
    pub fn from_latest_dividend(event: Option<&DividendEvent>) -> Option<SyncCursor> {
        event.map(|e| SyncCursor {
            last_point: e.record_date,
            complete: true,
        })
    }
}

/// Inclusive calendar range submitted as one provider request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FetchWindow {
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl std::fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}..{}]", self.start, self.end)
    }
}

/// One provider request to be executed by the batcher; consumed exactly once
#[derive(Debug, Clone)]
pub struct FetchTask {
    pub instrument: Instrument,
    pub window: FetchWindow,
}

/// Configuration for the sync service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub log_level: String,
    /// Symbols to keep in sync; empty means every instrument the provider lists
    pub instruments: Vec<String>,
    pub provider: ProviderConfig,
    pub sync: SyncSettings,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    /// IANA timezone of the exchange calendar, e.g. "America/New_York"
    pub exchange_timezone: String,
    pub request_timeout_sec: u64,
    pub page_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Earliest date the provider can serve
    pub epoch_floor: NaiveDate,
    /// The provider refuses windows spanning more days than this
    pub max_window_span_days: i64,
    /// Requests allowed per quota accounting window
    pub quota_per_window: usize,
    /// Pause between quota windows
    pub window_cooldown_sec: u64,
    /// In-flight call ceiling within a batch
    pub max_concurrency: usize,
    /// Attempts per request before a rate-limit failure is surfaced
    pub max_attempts: u32,
    /// Base backoff unit between rate-limit retries
    pub retry_cooldown_sec: u64,
    /// Hard timeout for a single provider call
    pub call_timeout_sec: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub data_dir: String,
}
