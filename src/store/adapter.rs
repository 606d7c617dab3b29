/// Persistent store contract for synchronized market data
use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Bar, DividendEvent};

/// Keyed, idempotent persistence for bars and dividends.
///
/// Upserts are keyed by (instrument, date) for bars and by
/// (instrument, record_date) for dividends, so repeated application and
/// out-of-order arrival are both safe. A store that cannot honor keyed
/// upsert must fail the call; the engine treats that as fatal.
#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Most recent stored bar for an instrument, if any
    async fn latest_bar(&self, instrument_id: &str) -> Result<Option<Bar>>;

    /// Most recent stored dividend event for an instrument, if any
    async fn latest_dividend(&self, instrument_id: &str) -> Result<Option<DividendEvent>>;

    /// Insert-or-update bars; returns the number of records written
    async fn upsert_bars(&self, bars: &[Bar]) -> Result<usize>;

    /// Insert-or-update dividend events; returns the number of records written
    async fn upsert_dividends(&self, events: &[DividendEvent]) -> Result<usize>;
}
