use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::transaction::NormalizedTransaction;

/// The most recent normalized result set per user.
///
/// Each completed fetch overwrites the previous one; there is no history.
#[derive(Clone, Default)]
pub struct TransactionStore {
    results: Arc<RwLock<HashMap<String, Arc<Vec<NormalizedTransaction>>>>>,
}

impl TransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the user's result set (last writer wins).
    pub async fn replace(&self, user_id: &str, transactions: Arc<Vec<NormalizedTransaction>>) {
        tracing::debug!("💾 Storing {} transactions for {}", transactions.len(), user_id);
        self.results
            .write()
            .await
            .insert(user_id.to_string(), transactions);
    }

    #[cfg(test)]
    pub async fn get(&self, user_id: &str) -> Option<Arc<Vec<NormalizedTransaction>>> {
        self.results.read().await.get(user_id).cloned()
    }

    /// The first stored record with `transaction_id`. Same-second records share ids.
    pub async fn find(&self, user_id: &str, transaction_id: &str) -> Option<NormalizedTransaction> {
        self.results
            .read()
            .await
            .get(user_id)?
            .iter()
            .find(|t| t.transaction_id == transaction_id)
            .cloned()
    }
}
