/// JSONL-backed market data store - BTreeMap (memory) + append-only log (disk)
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::Result;
use crate::store::MarketStore;
use crate::types::{Bar, DividendEvent};

/// Append-only JSONL store with last-write-wins keyed semantics.
///
/// Every upsert appends to the instrument's log and updates the in-memory
/// series; replaying the log on open applies the same last-wins rule, so
/// repeated upserts of one key always converge to a single record.
pub struct JsonlMarketStore {
    data_dir: PathBuf,
    bars: RwLock<HashMap<String, BTreeMap<NaiveDate, Bar>>>,
    dividends: RwLock<HashMap<String, BTreeMap<NaiveDate, DividendEvent>>>,
}

impl JsonlMarketStore {
    /// Open the store, replaying any existing logs into memory
    pub async fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&data_dir).await?;

        let store = JsonlMarketStore {
            data_dir,
            bars: RwLock::new(HashMap::new()),
            dividends: RwLock::new(HashMap::new()),
        };
        store.load().await?;
        Ok(store)
    }

    async fn load(&self) -> Result<()> {
        let mut bar_lines = 0usize;
        let mut dividend_lines = 0usize;

        let mut entries = tokio::fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if let Some(instrument_id) = log_instrument(name, "bars_") {
                let records: Vec<Bar> = read_log(&path).await?;
                bar_lines += records.len();
                let mut bars = self.bars.write().await;
                let series = bars.entry(instrument_id).or_default();
                for bar in records {
                    series.insert(bar.date, bar);
                }
            } else if let Some(instrument_id) = log_instrument(name, "dividends_") {
                let records: Vec<DividendEvent> = read_log(&path).await?;
                dividend_lines += records.len();
                let mut dividends = self.dividends.write().await;
                let series = dividends.entry(instrument_id).or_default();
                for event in records {
                    series.insert(event.record_date, event);
                }
            }
        }

        info!(
            "Store opened at {}: replayed {} bar lines, {} dividend lines",
            self.data_dir.display(),
            bar_lines,
            dividend_lines
        );
        Ok(())
    }

    fn bars_file(&self, instrument_id: &str) -> PathBuf {
        self.data_dir.join(format!("bars_{}.jsonl", instrument_id))
    }

    fn dividends_file(&self, instrument_id: &str) -> PathBuf {
        self.data_dir
            .join(format!("dividends_{}.jsonl", instrument_id))
    }

    /// Number of distinct bar dates stored for an instrument
    pub async fn bar_count(&self, instrument_id: &str) -> usize {
        let bars = self.bars.read().await;
        bars.get(instrument_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Number of distinct dividend record dates stored for an instrument
    pub async fn dividend_count(&self, instrument_id: &str) -> usize {
        let dividends = self.dividends.read().await;
        dividends.get(instrument_id).map(|s| s.len()).unwrap_or(0)
    }
}

fn log_instrument(file_name: &str, prefix: &str) -> Option<String> {
    file_name
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(".jsonl"))
        .map(|id| id.to_string())
}

async fn read_log<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = tokio::fs::File::open(path).await?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let mut records = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(record) => records.push(record),
            Err(e) => debug!("Skipping unreadable line in {}: {}", path.display(), e),
        }
    }
    Ok(records)
}

async fn append_log<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    let mut buffer = String::new();
    for record in records {
        buffer.push_str(&serde_json::to_string(record)?);
        buffer.push('\n');
    }
    file.write_all(buffer.as_bytes()).await?;
    file.sync_all().await?;

    Ok(())
}

#[async_trait]
impl MarketStore for JsonlMarketStore {
    async fn latest_bar(&self, instrument_id: &str) -> Result<Option<Bar>> {
        let bars = self.bars.read().await;
        Ok(bars
            .get(instrument_id)
            .and_then(|series| series.last_key_value())
            .map(|(_, bar)| bar.clone()))
    }

    async fn latest_dividend(&self, instrument_id: &str) -> Result<Option<DividendEvent>> {
        let dividends = self.dividends.read().await;
        Ok(dividends
            .get(instrument_id)
            .and_then(|series| series.last_key_value())
            .map(|(_, event)| event.clone()))
    }

    async fn upsert_bars(&self, records: &[Bar]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut by_instrument: HashMap<&str, Vec<&Bar>> = HashMap::new();
        for bar in records {
            by_instrument
                .entry(bar.instrument_id.as_str())
                .or_default()
                .push(bar);
        }

        let mut bars = self.bars.write().await;
        for (instrument_id, group) in &by_instrument {
            append_log(&self.bars_file(instrument_id), group.as_slice()).await?;
            let series = bars.entry((*instrument_id).to_string()).or_default();
            for bar in group {
                series.insert(bar.date, (*bar).clone());
            }
        }

        debug!(
            "Upserted {} bars across {} instruments",
            records.len(),
            by_instrument.len()
        );
        Ok(records.len())
    }

    async fn upsert_dividends(&self, records: &[DividendEvent]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut by_instrument: HashMap<&str, Vec<&DividendEvent>> = HashMap::new();
        for event in records {
            by_instrument
                .entry(event.instrument_id.as_str())
                .or_default()
                .push(event);
        }

        let mut dividends = self.dividends.write().await;
        for (instrument_id, group) in &by_instrument {
            append_log(&self.dividends_file(instrument_id), group.as_slice()).await?;
            let series = dividends.entry((*instrument_id).to_string()).or_default();
            for event in group {
                series.insert(event.record_date, (*event).clone());
            }
        }

        debug!(
            "Upserted {} dividends across {} instruments",
            records.len(),
            by_instrument.len()
        );
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DividendKind;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn bar(instrument_id: &str, date: NaiveDate, close: f64, complete: bool) -> Bar {
        Bar {
            instrument_id: instrument_id.to_string(),
            date,
            open: close - 1.0,
            high: close + 0.5,
            low: close - 1.5,
            close,
            volume: 10_000,
            is_complete: complete,
        }
    }

    fn dividend(instrument_id: &str, record_date: NaiveDate, amount: f64) -> DividendEvent {
        DividendEvent {
            instrument_id: instrument_id.to_string(),
            record_date,
            declared_date: None,
            ex_date: None,
            payment_date: None,
            amount,
            currency: "USD".to_string(),
            kind: DividendKind::Cash,
        }
    }

    #[tokio::test]
    async fn test_upsert_same_key_keeps_single_latest_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlMarketStore::open(dir.path()).await.unwrap();

        store
            .upsert_bars(&[bar("acme", d(2024, 3, 10), 101.0, false)])
            .await
            .unwrap();
        store
            .upsert_bars(&[bar("acme", d(2024, 3, 10), 103.5, true)])
            .await
            .unwrap();

        assert_eq!(store.bar_count("acme").await, 1);
        let latest = store.latest_bar("acme").await.unwrap().unwrap();
        assert_eq!(latest.close, 103.5);
        assert!(latest.is_complete);
    }

    #[tokio::test]
    async fn test_latest_bar_is_max_date_regardless_of_write_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlMarketStore::open(dir.path()).await.unwrap();

        // Out-of-order arrival: later window lands first
        store
            .upsert_bars(&[bar("acme", d(2024, 3, 12), 105.0, true)])
            .await
            .unwrap();
        store
            .upsert_bars(&[bar("acme", d(2024, 3, 10), 101.0, true)])
            .await
            .unwrap();

        let latest = store.latest_bar("acme").await.unwrap().unwrap();
        assert_eq!(latest.date, d(2024, 3, 12));
    }

    #[tokio::test]
    async fn test_reload_replays_log_with_last_wins() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonlMarketStore::open(dir.path()).await.unwrap();
            store
                .upsert_bars(&[
                    bar("acme", d(2024, 3, 10), 101.0, true),
                    bar("acme", d(2024, 3, 11), 99.0, false),
                ])
                .await
                .unwrap();
            store
                .upsert_bars(&[bar("acme", d(2024, 3, 11), 99.8, true)])
                .await
                .unwrap();
        }

        let reopened = JsonlMarketStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.bar_count("acme").await, 2);
        let latest = reopened.latest_bar("acme").await.unwrap().unwrap();
        assert_eq!(latest.date, d(2024, 3, 11));
        assert_eq!(latest.close, 99.8);
        assert!(latest.is_complete);
    }

    #[tokio::test]
    async fn test_dividends_are_keyed_by_record_date() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlMarketStore::open(dir.path()).await.unwrap();

        store
            .upsert_dividends(&[
                dividend("acme", d(2024, 3, 14), 0.42),
                dividend("acme", d(2023, 12, 14), 0.40),
            ])
            .await
            .unwrap();
        store
            .upsert_dividends(&[dividend("acme", d(2024, 3, 14), 0.45)])
            .await
            .unwrap();

        assert_eq!(store.dividend_count("acme").await, 2);
        let latest = store.latest_dividend("acme").await.unwrap().unwrap();
        assert_eq!(latest.record_date, d(2024, 3, 14));
        assert_eq!(latest.amount, 0.45);
    }

    #[tokio::test]
    async fn test_empty_store_has_no_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlMarketStore::open(dir.path()).await.unwrap();

        assert!(store.latest_bar("acme").await.unwrap().is_none());
        assert!(store.latest_dividend("acme").await.unwrap().is_none());
    }
}
