/// REST client for the market-data provider
use async_trait::async_trait;
use chrono_tz::Tz;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::provider::normalize;
use crate::provider::MarketDataProvider;
use crate::types::{Bar, DividendEvent, FetchWindow, Instrument, ProviderConfig};
use crate::utils::time::parse_timezone;

#[derive(Debug, Serialize)]
struct SessionRequest {
    #[serde(rename = "apiKey")]
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SessionData {
    token: String,
}

/// Common `{status, code, message, data}` wrapper around every response body
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InstrumentPage {
    items: Vec<RawInstrument>,
    page: u32,
    #[serde(rename = "totalPages")]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawInstrument {
    pub id: String,
    pub ticker: String,
    pub name: String,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawBar {
    /// Close instant in UTC, RFC 3339
    pub ts: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: i64,
    #[serde(default)]
    pub complete: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawDividend {
    #[serde(rename = "recordDate")]
    pub record_date: String,
    #[serde(rename = "declaredDate")]
    pub declared_date: Option<String>,
    #[serde(rename = "exDate")]
    pub ex_date: Option<String>,
    #[serde(rename = "paymentDate")]
    pub payment_date: Option<String>,
    /// Amount in minor currency units; `scale` gives the decimal shift
    #[serde(rename = "amountMinor")]
    pub amount_minor: i64,
    pub scale: u32,
    pub currency: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// HTTP adapter for the provider API.
///
/// A session token is acquired with `connect` for the duration of one
/// synchronization run and released with `close`; the caller is expected to
/// close on every exit path.
pub struct HttpMarketDataProvider {
    client: Client,
    base_url: String,
    api_key: String,
    exchange_tz: Tz,
    page_size: u32,
    session: RwLock<Option<String>>,
}

impl HttpMarketDataProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let exchange_tz = parse_timezone(&config.exchange_timezone)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_sec))
            .build()
            .map_err(SyncError::Transport)?;

        Ok(HttpMarketDataProvider {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            exchange_tz,
            page_size: config.page_size,
            session: RwLock::new(None),
        })
    }

    /// Acquire a provider session token
    pub async fn connect(&self) -> Result<()> {
        info!("Opening provider session");

        let response = self
            .client
            .post(format!("{}/v1/session", self.base_url))
            .json(&SessionRequest {
                api_key: self.api_key.clone(),
            })
            .send()
            .await?;

        let envelope: Envelope<SessionData> = decode(response).await?;
        let data = envelope
            .data
            .ok_or_else(|| SyncError::Session("No token in session response".to_string()))?;

        *self.session.write().await = Some(data.token);
        info!("Provider session established");
        Ok(())
    }

    /// Release the session token; safe to call when no session is open
    pub async fn close(&self) {
        let token = self.session.write().await.take();
        if let Some(token) = token {
            let result = self
                .client
                .delete(format!("{}/v1/session", self.base_url))
                .bearer_auth(&token)
                .send()
                .await;
            match result {
                Ok(_) => info!("Provider session released"),
                Err(e) => warn!("Failed to release provider session: {}", e),
            }
        }
    }

    async fn bearer(&self) -> Result<String> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| SyncError::Session("No active provider session".to_string()))
    }
}

#[async_trait]
impl MarketDataProvider for HttpMarketDataProvider {
    async fn list_instruments(&self) -> Result<Vec<Instrument>> {
        let token = self.bearer().await?;
        let mut instruments = Vec::new();
        let mut page = 1u32;

        loop {
            debug!("Listing instruments, page {}", page);
            let response = self
                .client
                .get(format!("{}/v1/instruments", self.base_url))
                .query(&[
                    ("page", page.to_string()),
                    ("perPage", self.page_size.to_string()),
                ])
                .bearer_auth(&token)
                .send()
                .await?;

            let envelope: Envelope<InstrumentPage> = decode(response).await?;
            let data = envelope.data.ok_or_else(|| {
                SyncError::MalformedRequest("No instrument page in response".to_string())
            })?;

            let last_page = data.page >= data.total_pages || data.items.is_empty();
            instruments.extend(data.items.into_iter().map(normalize::instrument));
            if last_page {
                break;
            }
            page += 1;
        }

        info!("Listed {} instruments from provider", instruments.len());
        Ok(instruments)
    }

    async fn fetch_bars(&self, instrument: &Instrument, window: FetchWindow) -> Result<Vec<Bar>> {
        let token = self.bearer().await?;
        let response = self
            .client
            .get(format!(
                "{}/v1/instruments/{}/bars",
                self.base_url, instrument.external_id
            ))
            .query(&[
                ("from", window.start.to_string()),
                ("to", window.end.to_string()),
            ])
            .bearer_auth(&token)
            .send()
            .await?;

        let envelope: Envelope<Vec<RawBar>> = decode(response).await?;
        let raw = envelope.data.unwrap_or_default();
        debug!(
            "Fetched {} raw bars for {} {}",
            raw.len(),
            instrument.symbol,
            window
        );

        normalize::bars(raw, instrument, self.exchange_tz)
    }

    async fn fetch_dividends(
        &self,
        instrument: &Instrument,
        window: FetchWindow,
    ) -> Result<Vec<DividendEvent>> {
        let token = self.bearer().await?;
        let response = self
            .client
            .get(format!(
                "{}/v1/instruments/{}/dividends",
                self.base_url, instrument.external_id
            ))
            .query(&[
                ("from", window.start.to_string()),
                ("to", window.end.to_string()),
            ])
            .bearer_auth(&token)
            .send()
            .await?;

        let envelope: Envelope<Vec<RawDividend>> = decode(response).await?;
        let raw = envelope.data.unwrap_or_default();
        debug!(
            "Fetched {} raw dividends for {} {}",
            raw.len(),
            instrument.symbol,
            window
        );

        normalize::dividends(raw, instrument)
    }
}

/// Map a provider response to the error taxonomy before handing the body to
/// the caller. Throttling must come back as `RateLimited`; everything else
/// fails fast.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<Envelope<T>> {
    let status = response.status();
    let body = response.text().await?;

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(SyncError::RateLimited(format!("HTTP 429: {}", excerpt(&body))));
    }
    if status == StatusCode::NOT_FOUND {
        return Err(SyncError::InstrumentNotFound(excerpt(&body)));
    }
    if !status.is_success() {
        return Err(SyncError::MalformedRequest(format!(
            "HTTP {}: {}",
            status,
            excerpt(&body)
        )));
    }

    let envelope: Envelope<T> = serde_json::from_str(&body)?;
    if envelope.status != "ok" {
        return Err(classify_rejection(&envelope));
    }

    Ok(envelope)
}

fn classify_rejection<T>(envelope: &Envelope<T>) -> SyncError {
    let message = envelope
        .message
        .clone()
        .unwrap_or_else(|| "provider rejected request".to_string());
    match envelope.code.as_deref() {
        Some("RATE_LIMIT") => SyncError::RateLimited(message),
        Some("NOT_FOUND") => SyncError::InstrumentNotFound(message),
        _ => SyncError::MalformedRequest(message),
    }
}

fn excerpt(body: &str) -> String {
    const MAX_CHARS: usize = 200;
    if body.chars().count() <= MAX_CHARS {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX_CHARS).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rejection_by_provider_code() {
        let rate_limited: Envelope<()> = Envelope {
            status: "error".to_string(),
            code: Some("RATE_LIMIT".to_string()),
            message: Some("quota exceeded".to_string()),
            data: None,
        };
        assert!(classify_rejection(&rate_limited).is_rate_limited());

        let unknown: Envelope<()> = Envelope {
            status: "error".to_string(),
            code: Some("NOT_FOUND".to_string()),
            message: None,
            data: None,
        };
        assert!(matches!(
            classify_rejection(&unknown),
            SyncError::InstrumentNotFound(_)
        ));

        let other: Envelope<()> = Envelope {
            status: "error".to_string(),
            code: None,
            message: Some("bad date range".to_string()),
            data: None,
        };
        assert!(matches!(
            classify_rejection(&other),
            SyncError::MalformedRequest(_)
        ));
    }

    #[test]
    fn test_envelope_parses_with_optional_fields() {
        let body = r#"{"status":"ok","data":[{"ts":"2024-05-03T20:00:00Z","open":"101.0","high":"104.2","low":"100.8","close":"103.5","volume":125000}]}"#;
        let envelope: Envelope<Vec<RawBar>> = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.status, "ok");
        let bars = envelope.data.unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, "103.5");
        assert!(bars[0].complete.is_none());
    }
}
