use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A trip record exactly as the portal driver reports it.
///
/// Field names follow the portal's activity export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    /// When the tap happened, in UTC.
    pub time_utc: DateTime<Utc>,
    /// The same instant as the portal displays it in its own timezone.
    pub time_local: String,
    /// Fare charged (negative) or value added (positive).
    pub quantity: Decimal,
    pub currency: String,
    #[serde(rename = "accountId")]
    pub account_id: String,
    /// Travel mode, e.g. `train`, `bus`, `ferry`, `top-up`.
    pub mode: String,
    #[serde(default)]
    pub tap_on_location: Option<String>,
    #[serde(default)]
    pub tap_off_location: Option<String>,
    pub status: String,
    /// Running card balance after this record, when the portal shows one.
    #[serde(rename = "bankImportedBalance", default)]
    pub bank_imported_balance: Option<Decimal>,
}

/// The canonical transaction served by every read interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedTransaction {
    /// Epoch seconds of `transaction_time`, as a decimal string.
    pub transaction_id: String,
    pub transaction_time: DateTime<Utc>,
    pub local_time: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub status: String,
    pub balance: Option<Decimal>,
    pub account_id: String,
    pub mode: String,
}
