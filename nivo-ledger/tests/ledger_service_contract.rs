//! Contract tests exercising [`nivo_ledger::LedgerService`] through its
//! trait surface rather than the `InMemoryLedgerService` inherent methods,
//! so the same suite can later run against `PostgresLedgerService`.

use nivo_ledger::AccountType;
use nivo_ledger::CreateAccountRequest;
use nivo_ledger::CreateEntryRequest;
use nivo_ledger::EntryStatus;
use nivo_ledger::EntryType;
use nivo_ledger::InMemoryLedgerService;
use nivo_ledger::JournalLine;
use nivo_ledger::LedgerError;
use nivo_ledger::LedgerService;

fn account_request(code: &str, account_type: AccountType) -> CreateAccountRequest {
    CreateAccountRequest {
        code: code.into(),
        name: format!("account {code}"),
        account_type,
        currency: "INR".into(),
        parent_account_id: None,
    }
}

async fn seeded_service() -> (InMemoryLedgerService, nivo_ledger::AccountId, nivo_ledger::AccountId) {
    let service = InMemoryLedgerService::new();
    let cash = service
        .create_account(account_request("1000", AccountType::Asset))
        .await
        .expect("create cash account");
    let deposits = service
        .create_account(account_request("2000", AccountType::Liability))
        .await
        .expect("create deposits account");
    (service, cash.id, deposits.id)
}

#[tokio::test]
async fn end_to_end_deposit_post_and_reverse() {
    let (service, cash, deposits) = seeded_service().await;

    let draft = service
        .create_entry(CreateEntryRequest {
            entry_type: EntryType::Standard,
            description: "customer cash deposit".into(),
            reference: None,
            lines: vec![
                JournalLine::debit(cash, 25_00),
                JournalLine::credit(deposits, 25_00),
            ],
        })
        .await
        .expect("create draft entry");
    assert_eq!(draft.status, EntryStatus::Draft);

    let posted = service
        .post_entry(draft.id, "teller-7")
        .await
        .expect("post draft entry");
    assert_eq!(posted.status, EntryStatus::Posted);

    let cash_account = service.get_account(cash).await.expect("load cash account");
    let deposits_account = service.get_account(deposits).await.expect("load deposits account");
    assert_eq!(cash_account.balance_minor, 25_00);
    assert_eq!(deposits_account.balance_minor, 25_00);

    let reversal = service
        .reverse_entry(posted.id, "auditor-3", "deposit entered twice")
        .await
        .expect("reverse posted entry");
    assert_eq!(reversal.entry_type, EntryType::Reversing);

    let original_after_reversal = service.get_entry(posted.id).await.expect("reload original");
    assert_eq!(original_after_reversal.status, EntryStatus::Reversed);
    assert_eq!(original_after_reversal.reversal_entry_id, Some(reversal.id));

    let cash_after = service.get_account(cash).await.expect("reload cash account");
    let deposits_after = service.get_account(deposits).await.expect("reload deposits account");
    assert_eq!(cash_after.balance_minor, 0);
    assert_eq!(deposits_after.balance_minor, 0);
}

#[tokio::test]
async fn entry_referencing_missing_account_is_rejected() {
    let (service, cash, _deposits) = seeded_service().await;
    let bogus_account = uuid::Uuid::new_v4();

    let result = service
        .create_entry(CreateEntryRequest {
            entry_type: EntryType::Standard,
            description: "bad reference".into(),
            reference: None,
            lines: vec![
                JournalLine::debit(cash, 10_00),
                JournalLine::credit(bogus_account, 10_00),
            ],
        })
        .await;
    assert!(matches!(result, Err(LedgerError::AccountNotFound(_))));
}

#[tokio::test]
async fn voiding_a_posted_entry_leaves_balances_untouched() {
    let (service, cash, deposits) = seeded_service().await;
    let draft = service
        .create_entry(CreateEntryRequest {
            entry_type: EntryType::Standard,
            description: "deposit".into(),
            reference: None,
            lines: vec![
                JournalLine::debit(cash, 50_00),
                JournalLine::credit(deposits, 50_00),
            ],
        })
        .await
        .expect("create draft entry");
    let posted = service.post_entry(draft.id, "teller-7").await.expect("post entry");

    let voided = service
        .void_entry(posted.id, "auditor-3", "data entry mistake")
        .await
        .expect("void entry");
    assert_eq!(voided.status, EntryStatus::Voided);

    let cash_account = service.get_account(cash).await.expect("reload cash account");
    assert_eq!(cash_account.balance_minor, 50_00);
}

#[tokio::test]
async fn entry_numbers_increment_monotonically_within_a_year() {
    let (service, cash, deposits) = seeded_service().await;
    let mut numbers = Vec::new();
    for amount in [10_00, 20_00, 30_00] {
        let entry = service
            .create_entry(CreateEntryRequest {
                entry_type: EntryType::Standard,
                description: "deposit".into(),
                reference: None,
                lines: vec![
                    JournalLine::debit(cash, amount),
                    JournalLine::credit(deposits, amount),
                ],
            })
            .await
            .expect("create draft entry");
        numbers.push(entry.entry_number);
    }
    let mut sorted = numbers.clone();
    sorted.sort();
    assert_eq!(numbers, sorted);
    assert_ne!(numbers[0], numbers[1]);
    assert_ne!(numbers[1], numbers[2]);
}

#[tokio::test]
async fn account_code_must_be_globally_unique() {
    let (service, _cash, _deposits) = seeded_service().await;
    let result = service.create_account(account_request("1000", AccountType::Asset)).await;
    assert!(matches!(result, Err(LedgerError::DuplicateCode(_))));
}
