use std::collections::HashMap;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::Transaction;
use crate::TransactionFilter;
use crate::TransactionId;
use crate::TransactionPage;
use crate::TransactionResult;
use crate::TransactionStatus;
use crate::TransactionStore;
use nivo_envelope::PageMeta;

#[derive(Default)]
struct State {
    transactions: HashMap<TransactionId, Transaction>,
    /// Insertion order, so pagination and "most recent first" listing
    /// matches what an `ORDER BY created_at DESC` query would return.
    order: Vec<TransactionId>,
}

/// In-memory [`TransactionStore`]. A single [`tokio::sync::Mutex`] stands
/// in for the row the Postgres store would lock per transaction.
#[derive(Default)]
pub struct InMemoryTransactionStore {
    state: Mutex<State>,
}

impl InMemoryTransactionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, transaction: Transaction) -> TransactionResult<Transaction> {
        let mut guard = self.state.lock().await;
        guard.order.push(transaction.id);
        guard.transactions.insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    async fn update(&self, transaction: Transaction) -> TransactionResult<Transaction> {
        let mut guard = self.state.lock().await;
        guard.transactions.insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    async fn get(&self, id: TransactionId) -> TransactionResult<Transaction> {
        let guard = self.state.lock().await;
        guard
            .transactions
            .get(&id)
            .cloned()
            .ok_or(crate::TransactionError::NotFound(id))
    }

    async fn find_completed_by_reference(
        &self,
        source_wallet_id: Uuid,
        external_reference: &str,
    ) -> TransactionResult<Option<Transaction>> {
        let guard = self.state.lock().await;
        Ok(guard
            .transactions
            .values()
            .find(|t| {
                t.status == TransactionStatus::Completed
                    && t.source_wallet_id == Some(source_wallet_id)
                    && t.external_reference.as_deref() == Some(external_reference)
            })
            .cloned())
    }

    async fn list(&self, filter: TransactionFilter) -> TransactionResult<TransactionPage> {
        let guard = self.state.lock().await;
        let mut matched: Vec<Transaction> = guard
            .order
            .iter()
            .rev()
            .filter_map(|id| guard.transactions.get(id))
            .filter(|t| {
                filter
                    .wallet_id
                    .is_none_or(|w| t.source_wallet_id == Some(w) || t.destination_wallet_id == Some(w))
            })
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .filter(|t| filter.transaction_type.is_none_or(|ty| t.transaction_type == ty))
            .filter(|t| {
                filter
                    .from
                    .is_none_or(|from| t.processed_at.is_none_or(|p| p >= from))
            })
            .filter(|t| filter.to.is_none_or(|to| t.processed_at.is_none_or(|p| p <= to)))
            .filter(|t| {
                filter.search.as_deref().is_none_or(|needle| {
                    let needle = needle.to_lowercase();
                    t.description.to_lowercase().contains(&needle)
                        || t.external_reference
                            .as_deref()
                            .is_some_and(|r| r.to_lowercase().contains(&needle))
                })
            })
            .cloned()
            .collect();

        let total_items = matched.len() as u64;
        let page = filter.page.max(1);
        let page_size = filter.page_size.max(1);
        let start = ((page - 1) as usize) * (page_size as usize);
        let items = if start >= matched.len() {
            Vec::new()
        } else {
            let end = (start + page_size as usize).min(matched.len());
            matched.drain(start..end).collect()
        };

        Ok(TransactionPage {
            items,
            meta: PageMeta::new(page, page_size, total_items),
        })
    }

    async fn list_stuck_processing(&self, older_than: DateTime<Utc>) -> TransactionResult<Vec<Transaction>> {
        let guard = self.state.lock().await;
        Ok(guard
            .transactions
            .values()
            .filter(|t| {
                t.status == TransactionStatus::Processing
                    && t.processed_at.is_some_and(|p| p <= older_than)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransactionType;
    use pretty_assertions::assert_eq;

    fn sample(status: TransactionStatus) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            transaction_type: TransactionType::Transfer,
            status,
            source_wallet_id: Some(Uuid::new_v4()),
            destination_wallet_id: Some(Uuid::new_v4()),
            amount_minor: 1_000,
            currency: "INR".into(),
            description: "test".into(),
            external_reference: None,
            ledger_entry_id: None,
            parent_transaction_id: None,
            initiated_by: "user-1".into(),
            processed_at: Some(Utc::now()),
            completed_at: None,
            failure_reason: None,
        }
    }

    #[tokio::test]
    async fn list_paginates_most_recent_first() {
        let store = InMemoryTransactionStore::new();
        for _ in 0..5 {
            store.insert(sample(TransactionStatus::Completed)).await.expect("insert");
        }
        let page = store
            .list(TransactionFilter {
                page: 1,
                page_size: 2,
                ..Default::default()
            })
            .await
            .expect("list");
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.meta.total_items, 5);
        assert_eq!(page.meta.total_pages, 3);
    }

    #[tokio::test]
    async fn list_stuck_processing_filters_by_age() {
        let store = InMemoryTransactionStore::new();
        let mut stuck = sample(TransactionStatus::Processing);
        stuck.processed_at = Some(Utc::now() - chrono::Duration::hours(2));
        store.insert(stuck).await.expect("insert");
        store.insert(sample(TransactionStatus::Completed)).await.expect("insert");

        let results = store
            .list_stuck_processing(Utc::now() - chrono::Duration::minutes(30))
            .await
            .expect("list stuck");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, TransactionStatus::Processing);
    }
}
