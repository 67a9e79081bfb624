use std::collections::HashMap;
use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::Account;
use crate::AccountId;
use crate::AccountStatus;
use crate::CreateAccountRequest;
use crate::CreateEntryRequest;
use crate::EntryId;
use crate::EntryStatus;
use crate::JournalEntry;
use crate::LedgerError;
use crate::LedgerResult;
use crate::LedgerService;

/// In-memory [`LedgerService`]. A single [`tokio::sync::Mutex`] stands in
/// for the per-row `FOR UPDATE` locks the Postgres-backed store takes,
/// since there is only ever one writer to this process's state.
#[derive(Default)]
pub struct InMemoryLedgerService {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    codes: HashSet<String>,
    entries: HashMap<EntryId, JournalEntry>,
    entry_number_seq: HashMap<i32, u32>,
}

impl State {
    fn next_entry_number(&mut self) -> String {
        let year = Utc::now().format("%Y").to_string().parse::<i32>().unwrap_or(0);
        let counter = self.entry_number_seq.entry(year).or_insert(0);
        *counter += 1;
        format!("JE-{year}-{:05}", *counter)
    }
}

impl InMemoryLedgerService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerService for InMemoryLedgerService {
    async fn create_account(&self, request: CreateAccountRequest) -> LedgerResult<Account> {
        let mut guard = self.state.lock().await;
        if guard.codes.contains(&request.code) {
            return Err(LedgerError::DuplicateCode(request.code));
        }
        if let Some(parent_id) = request.parent_account_id {
            if !guard.accounts.contains_key(&parent_id) {
                return Err(LedgerError::ParentNotFound(parent_id));
            }
        }
        let mut account = Account::new(
            request.code.clone(),
            request.name,
            request.account_type,
            request.currency,
        );
        if let Some(parent_id) = request.parent_account_id {
            account = account.with_parent(parent_id);
        }
        guard.codes.insert(request.code);
        guard.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> LedgerResult<Account> {
        let guard = self.state.lock().await;
        guard
            .accounts
            .get(&id)
            .cloned()
            .ok_or(LedgerError::AccountNotFound(id))
    }

    async fn create_entry(&self, request: CreateEntryRequest) -> LedgerResult<JournalEntry> {
        let mut guard = self.state.lock().await;
        for line in &request.lines {
            let account = guard
                .accounts
                .get(&line.account_id)
                .ok_or(LedgerError::AccountNotFound(line.account_id))?;
            if account.status != AccountStatus::Active {
                return Err(LedgerError::AccountInactive(line.account_id));
            }
        }

        let entry_number = guard.next_entry_number();
        let entry = JournalEntry {
            id: uuid::Uuid::new_v4(),
            entry_number,
            entry_type: request.entry_type,
            status: EntryStatus::Draft,
            description: request.description,
            reference: request.reference,
            lines: request.lines,
            posted_at: None,
            posted_by: None,
            voided_at: None,
            voided_by: None,
            void_reason: None,
            reversal_entry_id: None,
        };
        entry.validate_structure()?;
        guard.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn post_entry(&self, entry_id: EntryId, posted_by: &str) -> LedgerResult<JournalEntry> {
        let mut guard = self.state.lock().await;
        let entry = guard
            .entries
            .get(&entry_id)
            .cloned()
            .ok_or(LedgerError::EntryNotFound(entry_id))?;
        post_entry_locked(&mut guard, entry, posted_by)
    }

    async fn void_entry(
        &self,
        entry_id: EntryId,
        voided_by: &str,
        reason: &str,
    ) -> LedgerResult<JournalEntry> {
        let mut guard = self.state.lock().await;
        let entry = guard
            .entries
            .get_mut(&entry_id)
            .ok_or(LedgerError::EntryNotFound(entry_id))?;
        if entry.status != EntryStatus::Posted {
            return Err(LedgerError::NotPosted(entry_id));
        }
        entry.status = EntryStatus::Voided;
        entry.voided_at = Some(Utc::now());
        entry.voided_by = Some(voided_by.to_string());
        entry.void_reason = Some(reason.to_string());
        Ok(entry.clone())
    }

    async fn reverse_entry(
        &self,
        entry_id: EntryId,
        reversed_by: &str,
        reason: &str,
    ) -> LedgerResult<JournalEntry> {
        let mut guard = self.state.lock().await;
        let original = guard
            .entries
            .get(&entry_id)
            .cloned()
            .ok_or(LedgerError::EntryNotFound(entry_id))?;
        if original.status != EntryStatus::Posted {
            return Err(LedgerError::NotPosted(entry_id));
        }

        let entry_number = guard.next_entry_number();
        let draft = original.build_reversal(entry_number, reason);
        guard.entries.insert(draft.id, draft.clone());
        let posted = post_entry_locked(&mut guard, draft, reversed_by)?;

        let original_mut = guard
            .entries
            .get_mut(&entry_id)
            .ok_or(LedgerError::EntryNotFound(entry_id))?;
        original_mut.status = EntryStatus::Reversed;
        original_mut.reversal_entry_id = Some(posted.id);

        Ok(posted)
    }

    async fn get_entry(&self, entry_id: EntryId) -> LedgerResult<JournalEntry> {
        let guard = self.state.lock().await;
        guard
            .entries
            .get(&entry_id)
            .cloned()
            .ok_or(LedgerError::EntryNotFound(entry_id))
    }

    async fn find_entry_by_reference(
        &self,
        reference_type: &str,
        reference_id: &str,
    ) -> LedgerResult<Option<JournalEntry>> {
        let guard = self.state.lock().await;
        Ok(guard.entries.values().find(|entry| {
            entry.reference.as_ref().is_some_and(|reference| {
                reference.reference_type == reference_type && reference.reference_id == reference_id
            })
        }).cloned())
    }

    async fn recompute_balance(&self, account_id: AccountId) -> LedgerResult<i64> {
        let guard = self.state.lock().await;
        let account = guard
            .accounts
            .get(&account_id)
            .ok_or(LedgerError::AccountNotFound(account_id))?;

        let mut balance = 0_i64;
        for entry in guard.entries.values() {
            if !matches!(entry.status, EntryStatus::Posted | EntryStatus::Reversed) {
                continue;
            }
            for line in &entry.lines {
                if line.account_id != account_id {
                    continue;
                }
                let signed = match line.side {
                    crate::PostingSide::Debit => line.amount_minor,
                    crate::PostingSide::Credit => -line.amount_minor,
                };
                balance += if account.account_type.is_debit_normal() {
                    signed
                } else {
                    -signed
                };
            }
        }
        Ok(balance)
    }
}

/// Shared by `post_entry` and `reverse_entry` (the latter auto-posts the
/// reversal entry it builds), given the state lock is already held.
fn post_entry_locked(
    guard: &mut State,
    mut entry: JournalEntry,
    posted_by: &str,
) -> LedgerResult<JournalEntry> {
    if entry.status != EntryStatus::Draft {
        return Err(LedgerError::NotDraft(entry.id));
    }
    entry.validate_structure()?;

    for line in &entry.lines {
        let account = guard
            .accounts
            .get(&line.account_id)
            .ok_or(LedgerError::AccountNotFound(line.account_id))?;
        if account.status != AccountStatus::Active {
            return Err(LedgerError::AccountInactive(line.account_id));
        }
    }
    for line in &entry.lines {
        let account = guard
            .accounts
            .get_mut(&line.account_id)
            .ok_or(LedgerError::AccountNotFound(line.account_id))?;
        account.apply_line(line.side, line.amount_minor);
    }

    entry.status = EntryStatus::Posted;
    entry.posted_at = Some(Utc::now());
    entry.posted_by = Some(posted_by.to_string());
    guard.entries.insert(entry.id, entry.clone());
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccountType;
    use crate::JournalLine;
    use pretty_assertions::assert_eq;

    async fn seeded() -> (InMemoryLedgerService, AccountId, AccountId) {
        let service = InMemoryLedgerService::new();
        let cash = service
            .create_account(CreateAccountRequest {
                code: "1000".into(),
                name: "Cash".into(),
                account_type: AccountType::Asset,
                currency: "INR".into(),
                parent_account_id: None,
            })
            .await
            .expect("create cash account");
        let fees = service
            .create_account(CreateAccountRequest {
                code: "4000".into(),
                name: "Fees".into(),
                account_type: AccountType::Revenue,
                currency: "INR".into(),
                parent_account_id: None,
            })
            .await
            .expect("create fees account");
        (service, cash.id, fees.id)
    }

    #[tokio::test]
    async fn duplicate_account_code_rejected() {
        let (service, _, _) = seeded().await;
        let result = service
            .create_account(CreateAccountRequest {
                code: "1000".into(),
                name: "Cash Again".into(),
                account_type: AccountType::Asset,
                currency: "INR".into(),
                parent_account_id: None,
            })
            .await;
        assert!(matches!(result, Err(LedgerError::DuplicateCode(_))));
    }

    #[tokio::test]
    async fn posting_updates_account_balances_and_stamps_entry() {
        let (service, cash, fees) = seeded().await;
        let draft = service
            .create_entry(CreateEntryRequest {
                entry_type: crate::EntryType::Standard,
                description: "fee charge".into(),
                reference: None,
                lines: vec![
                    JournalLine::debit(cash, 5_000),
                    JournalLine::credit(fees, 5_000),
                ],
            })
            .await
            .expect("create entry");
        assert!(draft.entry_number.starts_with("JE-"));

        let posted = service
            .post_entry(draft.id, "teller-1")
            .await
            .expect("post entry");
        assert_eq!(posted.status, EntryStatus::Posted);
        assert!(posted.posted_at.is_some());

        let cash_account = service.get_account(cash).await.expect("get cash");
        let fees_account = service.get_account(fees).await.expect("get fees");
        assert_eq!(cash_account.balance_minor, 5_000);
        assert_eq!(fees_account.balance_minor, 5_000);
    }

    #[tokio::test]
    async fn posted_entry_cannot_be_posted_again() {
        let (service, cash, fees) = seeded().await;
        let draft = service
            .create_entry(CreateEntryRequest {
                entry_type: crate::EntryType::Standard,
                description: "fee charge".into(),
                reference: None,
                lines: vec![
                    JournalLine::debit(cash, 1_000),
                    JournalLine::credit(fees, 1_000),
                ],
            })
            .await
            .expect("create entry");
        service.post_entry(draft.id, "teller-1").await.expect("post once");
        let result = service.post_entry(draft.id, "teller-1").await;
        assert!(matches!(result, Err(LedgerError::NotDraft(_))));
    }

    #[tokio::test]
    async fn voiding_does_not_change_balances() {
        let (service, cash, fees) = seeded().await;
        let draft = service
            .create_entry(CreateEntryRequest {
                entry_type: crate::EntryType::Standard,
                description: "fee charge".into(),
                reference: None,
                lines: vec![
                    JournalLine::debit(cash, 2_000),
                    JournalLine::credit(fees, 2_000),
                ],
            })
            .await
            .expect("create entry");
        service.post_entry(draft.id, "teller-1").await.expect("post");
        let before = service.get_account(cash).await.expect("get cash").balance_minor;

        let voided = service
            .void_entry(draft.id, "auditor-1", "duplicate charge")
            .await
            .expect("void entry");
        assert_eq!(voided.status, EntryStatus::Voided);

        let after = service.get_account(cash).await.expect("get cash").balance_minor;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn reversal_neutralizes_balance_and_relinks_original() {
        let (service, cash, fees) = seeded().await;
        let draft = service
            .create_entry(CreateEntryRequest {
                entry_type: crate::EntryType::Standard,
                description: "fee charge".into(),
                reference: None,
                lines: vec![
                    JournalLine::debit(cash, 3_000),
                    JournalLine::credit(fees, 3_000),
                ],
            })
            .await
            .expect("create entry");
        let posted = service.post_entry(draft.id, "teller-1").await.expect("post");

        let reversal = service
            .reverse_entry(posted.id, "auditor-1", "customer dispute")
            .await
            .expect("reverse entry");
        assert_eq!(reversal.entry_type, crate::EntryType::Reversing);
        assert_eq!(reversal.status, EntryStatus::Posted);

        let original = service.get_entry(posted.id).await.expect("get original");
        assert_eq!(original.status, EntryStatus::Reversed);
        assert_eq!(original.reversal_entry_id, Some(reversal.id));

        let cash_account = service.get_account(cash).await.expect("get cash");
        assert_eq!(cash_account.balance_minor, 0);
    }

    #[tokio::test]
    async fn recompute_balance_matches_projected_balance() {
        let (service, cash, fees) = seeded().await;
        let draft = service
            .create_entry(CreateEntryRequest {
                entry_type: crate::EntryType::Standard,
                description: "fee charge".into(),
                reference: None,
                lines: vec![
                    JournalLine::debit(cash, 7_000),
                    JournalLine::credit(fees, 7_000),
                ],
            })
            .await
            .expect("create entry");
        service.post_entry(draft.id, "teller-1").await.expect("post");

        let projected = service.get_account(cash).await.expect("get cash").balance_minor;
        let recomputed = service.recompute_balance(cash).await.expect("recompute");
        assert_eq!(projected, recomputed);
    }
}
