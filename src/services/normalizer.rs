use chrono::{DateTime, Utc};

use crate::models::transaction::{NormalizedTransaction, RawTransaction};

/// Derives the synthetic transaction id: whole epoch seconds of the UTC tap time.
///
/// Sub-second precision is truncated, so two taps within the same second
/// share an id. The portal exposes nothing else to tell them apart.
pub fn transaction_id(time_utc: &DateTime<Utc>) -> String {
    time_utc.timestamp().to_string()
}

/// Builds the human-readable description from the trip's mode and locations.
fn describe(raw: &RawTransaction) -> String {
    let on = raw.tap_on_location.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let off = raw.tap_off_location.as_deref().map(str::trim).filter(|s| !s.is_empty());

    match (on, off) {
        (Some(on), Some(off)) => format!("{}: {} to {}", raw.mode, on, off),
        (Some(on), None) => format!("{}: {}", raw.mode, on),
        (None, Some(off)) => format!("{}: to {}", raw.mode, off),
        (None, None) => raw.mode.clone(),
    }
}

/// Maps a raw portal record onto the canonical schema.
///
/// Pure and deterministic: the same input always yields the same output.
pub fn normalize(raw: &RawTransaction) -> NormalizedTransaction {
    NormalizedTransaction {
        transaction_id: transaction_id(&raw.time_utc),
        transaction_time: raw.time_utc,
        local_time: raw.time_local.clone(),
        amount: raw.quantity,
        currency: raw.currency.clone(),
        description: describe(raw),
        status: raw.status.clone(),
        balance: raw.bank_imported_balance,
        account_id: raw.account_id.clone(),
        mode: raw.mode.clone(),
    }
}

/// Normalizes a batch, preserving driver order.
pub fn normalize_all(raw: &[RawTransaction]) -> Vec<NormalizedTransaction> {
    raw.iter().map(normalize).collect()
}
