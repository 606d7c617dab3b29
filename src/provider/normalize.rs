/// Normalization of raw provider payloads into canonical records
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;

use crate::error::{Result, SyncError};
use crate::provider::http::{RawBar, RawDividend, RawInstrument};
use crate::types::{Bar, DividendEvent, DividendKind, Instrument};
use crate::utils::time::market_today;

pub(crate) fn instrument(raw: RawInstrument) -> Instrument {
    Instrument {
        // The ticker doubles as the local catalog id; the provider's own id
        // is only used on the wire.
        id: raw.ticker.to_lowercase(),
        external_id: raw.id,
        symbol: raw.ticker,
        name: raw.name,
        currency: raw.currency,
    }
}

pub(crate) fn bars(raw: Vec<RawBar>, instrument: &Instrument, tz: Tz) -> Result<Vec<Bar>> {
    let today = market_today(tz);
    raw.into_iter()
        .map(|r| bar(r, instrument, tz, today))
        .collect()
}

fn bar(raw: RawBar, instrument: &Instrument, tz: Tz, today: NaiveDate) -> Result<Bar> {
    let instant = DateTime::parse_from_rfc3339(&raw.ts)
        .map_err(|e| SyncError::MalformedRequest(format!("Bad bar timestamp {:?}: {}", raw.ts, e)))?;
    // The provider stamps bars with UTC close instants; the uniqueness key is
    // the calendar date at the exchange.
    let date = instant.with_timezone(&tz).date_naive();

    Ok(Bar {
        instrument_id: instrument.id.clone(),
        date,
        open: parse_decimal(&raw.open)?,
        high: parse_decimal(&raw.high)?,
        low: parse_decimal(&raw.low)?,
        close: parse_decimal(&raw.close)?,
        volume: raw.volume,
        is_complete: raw.complete.unwrap_or(date < today),
    })
}

pub(crate) fn dividends(raw: Vec<RawDividend>, instrument: &Instrument) -> Result<Vec<DividendEvent>> {
    raw.into_iter().map(|r| dividend(r, instrument)).collect()
}

fn dividend(raw: RawDividend, instrument: &Instrument) -> Result<DividendEvent> {
    Ok(DividendEvent {
        instrument_id: instrument.id.clone(),
        record_date: parse_date(&raw.record_date)?,
        declared_date: raw.declared_date.as_deref().map(parse_date).transpose()?,
        ex_date: raw.ex_date.as_deref().map(parse_date).transpose()?,
        payment_date: raw.payment_date.as_deref().map(parse_date).transpose()?,
        amount: minor_to_major(raw.amount_minor, raw.scale),
        currency: raw.currency,
        kind: parse_kind(&raw.kind),
    })
}

fn parse_decimal(value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| SyncError::MalformedRequest(format!("Bad decimal value {:?}", value)))
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| SyncError::MalformedRequest(format!("Bad date {:?}", value)))
}

fn minor_to_major(amount_minor: i64, scale: u32) -> f64 {
    amount_minor as f64 / 10f64.powi(scale as i32)
}

fn parse_kind(kind: &str) -> DividendKind {
    match kind.to_ascii_uppercase().as_str() {
        "STOCK" => DividendKind::Stock,
        "SPECIAL" => DividendKind::Special,
        _ => DividendKind::Cash,
    }
}
