/// Provider-facing contract consumed by the sync engine
use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Bar, DividendEvent, FetchWindow, Instrument};

/// External market-data provider: paginated instrument listing plus windowed
/// bar and dividend queries.
///
/// Implementations classify rejections into the crate error taxonomy so the
/// retry layer can tell transient throttling apart from requests that are
/// simply wrong.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Full instrument listing; the adapter follows provider pagination.
    async fn list_instruments(&self) -> Result<Vec<Instrument>>;

    /// Daily bars within the inclusive window, in canonical form.
    async fn fetch_bars(&self, instrument: &Instrument, window: FetchWindow) -> Result<Vec<Bar>>;

    /// Dividend events recorded within the inclusive window.
    async fn fetch_dividends(
        &self,
        instrument: &Instrument,
        window: FetchWindow,
    ) -> Result<Vec<DividendEvent>>;
}
