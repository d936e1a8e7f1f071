use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A card/account as listed by the portal.
///
/// Only `accountId` is interpreted; every other field the driver supplies
/// is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "accountId")]
    pub account_id: String,
    #[serde(flatten)]
    pub details: BTreeMap<String, serde_json::Value>,
}
