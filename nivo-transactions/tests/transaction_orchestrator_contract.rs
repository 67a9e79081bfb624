//! End-to-end scenarios driving [`TransactionOrchestrator`] across the
//! in-memory wallet, ledger, and RBAC stores, mirroring the concrete
//! scenarios an implementer is expected to exercise before trusting the
//! orchestrator against the real services.

use std::sync::Arc;

use async_trait::async_trait;
use nivo_ledger::AccountType;
use nivo_ledger::CreateAccountRequest;
use nivo_ledger::InMemoryLedgerService;
use nivo_ledger::LedgerService;
use nivo_rbac::InMemoryRoleStore;
use nivo_rbac::RbacEngine;
use nivo_rbac::Role;
use nivo_rbac::RoleAssignment;
use nivo_rbac::RoleStore;
use nivo_transactions::CreateTransferRequest;
use nivo_transactions::InMemoryTransactionStore;
use nivo_transactions::TransactionError;
use nivo_transactions::TransactionOrchestrator;
use nivo_transactions::TransactionStatus;
use nivo_wallet::CreateWalletRequest;
use nivo_wallet::IdentityLookup;
use nivo_wallet::InMemoryWalletService;
use nivo_wallet::WalletResult;
use nivo_wallet::WalletService;
use nivo_wallet::WalletType;

struct NoIdentity;

#[async_trait]
impl IdentityLookup for NoIdentity {
    async fn find_user_and_default_wallet(
        &self,
        _phone: &str,
    ) -> WalletResult<Option<(String, uuid::Uuid)>> {
        Ok(None)
    }
}

async fn full_permission_user(rbac_store: &InMemoryRoleStore, user_id: &str) {
    let role = Role::new("teller")
        .with_permission("transaction:transfer:create")
        .with_permission("transaction:deposit:create")
        .with_permission("transaction:withdrawal:create")
        .with_permission("transaction:reversal:create");
    rbac_store.upsert_role(role.clone()).await.expect("upsert role");
    rbac_store
        .assign_role(RoleAssignment {
            user_id: user_id.to_string(),
            role_id: role.id,
            expires_at: None,
            active: true,
        })
        .await
        .expect("assign role");
}

async fn harness(
    daily_limit_minor: i64,
) -> (
    TransactionOrchestrator,
    Arc<InMemoryWalletService>,
    Arc<InMemoryLedgerService>,
    uuid::Uuid,
    uuid::Uuid,
) {
    let ledger = Arc::new(InMemoryLedgerService::new());
    let wallets = Arc::new(InMemoryWalletService::new(Arc::new(NoIdentity)));
    let rbac_store = InMemoryRoleStore::new();
    full_permission_user(&rbac_store, "user-1").await;
    let rbac = Arc::new(RbacEngine::new(Arc::new(rbac_store)));
    let store: Arc<InMemoryTransactionStore> = Arc::new(InMemoryTransactionStore::new());

    let w1_account = ledger
        .create_account(CreateAccountRequest {
            code: "W1".into(),
            name: "Wallet 1 deposits".into(),
            account_type: AccountType::Liability,
            currency: "INR".into(),
            parent_account_id: None,
        })
        .await
        .expect("create w1 ledger account");
    let w2_account = ledger
        .create_account(CreateAccountRequest {
            code: "W2".into(),
            name: "Wallet 2 deposits".into(),
            account_type: AccountType::Liability,
            currency: "INR".into(),
            parent_account_id: None,
        })
        .await
        .expect("create w2 ledger account");
    let suspense_account = ledger
        .create_account(CreateAccountRequest {
            code: "SUSPENSE".into(),
            name: "Deposit/withdrawal clearing".into(),
            account_type: AccountType::Asset,
            currency: "INR".into(),
            parent_account_id: None,
        })
        .await
        .expect("create suspense ledger account");

    let w1 = wallets
        .create_wallet(CreateWalletRequest {
            user_id: "user-1".into(),
            wallet_type: WalletType::Default,
            currency: "INR".into(),
            ledger_account_id: w1_account.id,
            daily_limit_minor,
            monthly_limit_minor: daily_limit_minor * 10,
        })
        .await
        .expect("create wallet 1");
    let w2 = wallets
        .create_wallet(CreateWalletRequest {
            user_id: "user-2".into(),
            wallet_type: WalletType::Default,
            currency: "INR".into(),
            ledger_account_id: w2_account.id,
            daily_limit_minor,
            monthly_limit_minor: daily_limit_minor * 10,
        })
        .await
        .expect("create wallet 2");

    let orchestrator = TransactionOrchestrator::new(
        store,
        wallets.clone(),
        ledger.clone(),
        rbac,
        suspense_account.id,
    );
    (orchestrator, wallets, ledger, w1.id, w2.id)
}

#[tokio::test]
async fn deposit_credits_wallet_and_posts_balanced_entry() {
    let (orchestrator, wallets, ledger, w1, _w2) = harness(500_000).await;

    let transaction = orchestrator
        .create_deposit("user-1".into(), w1, 500_000, "INR".into(), "salary".into())
        .await
        .expect("deposit succeeds");
    assert_eq!(transaction.status, TransactionStatus::Completed);

    let wallet = wallets.get_wallet(w1).await.expect("get wallet");
    assert_eq!(wallet.balance_minor, 500_000);
    assert_eq!(wallet.available_balance_minor, 500_000);

    let entry = ledger
        .get_entry(transaction.ledger_entry_id.expect("ledger entry recorded"))
        .await
        .expect("get entry");
    let (debits, credits) = entry.totals();
    assert_eq!(debits, 500_000);
    assert_eq!(credits, 500_000);
}

#[tokio::test]
async fn balanced_transfer_moves_both_wallets_and_spends_daily_limit() {
    let (orchestrator, wallets, _ledger, w1, w2) = harness(500_000).await;
    orchestrator
        .create_deposit("user-1".into(), w1, 1_000_000, "INR".into(), "funding".into())
        .await
        .expect("fund wallet 1");

    let transaction = orchestrator
        .create_transfer(CreateTransferRequest {
            initiated_by: "user-1".into(),
            source_wallet_id: w1,
            destination_wallet_id: w2,
            amount_minor: 300_000,
            currency: "INR".into(),
            description: "rent".into(),
            external_reference: None,
        })
        .await
        .expect("transfer succeeds");
    assert_eq!(transaction.status, TransactionStatus::Completed);

    let source = wallets.get_wallet(w1).await.expect("get w1");
    let destination = wallets.get_wallet(w2).await.expect("get w2");
    assert_eq!(source.balance_minor, 700_000);
    assert_eq!(destination.balance_minor, 300_000);

    let limits = wallets.get_limits(w1, chrono::Utc::now()).await.expect("get limits");
    assert_eq!(limits.daily_spent_minor, 300_000);
}

#[tokio::test]
async fn limit_breach_is_rejected_without_state_change() {
    let (orchestrator, wallets, _ledger, w1, w2) = harness(500_000).await;
    orchestrator
        .create_deposit("user-1".into(), w1, 1_000_000, "INR".into(), "funding".into())
        .await
        .expect("fund wallet 1");
    orchestrator
        .create_transfer(CreateTransferRequest {
            initiated_by: "user-1".into(),
            source_wallet_id: w1,
            destination_wallet_id: w2,
            amount_minor: 400_000,
            currency: "INR".into(),
            description: "first spend".into(),
            external_reference: None,
        })
        .await
        .expect("first transfer succeeds");

    let before = wallets.get_wallet(w1).await.expect("get w1 before");
    let result = orchestrator
        .create_transfer(CreateTransferRequest {
            initiated_by: "user-1".into(),
            source_wallet_id: w1,
            destination_wallet_id: w2,
            amount_minor: 200_000,
            currency: "INR".into(),
            description: "breaches daily limit".into(),
            external_reference: None,
        })
        .await
        .expect("transfer call returns a failed transaction, not an error");
    assert_eq!(result.status, TransactionStatus::Failed);
    assert!(result.failure_reason.is_some());

    let after = wallets.get_wallet(w1).await.expect("get w1 after");
    assert_eq!(before.balance_minor, after.balance_minor);
}

#[tokio::test]
async fn idempotent_external_reference_returns_prior_transaction() {
    let (orchestrator, _wallets, _ledger, w1, w2) = harness(500_000).await;
    orchestrator
        .create_deposit("user-1".into(), w1, 1_000_000, "INR".into(), "funding".into())
        .await
        .expect("fund wallet 1");

    let request = CreateTransferRequest {
        initiated_by: "user-1".into(),
        source_wallet_id: w1,
        destination_wallet_id: w2,
        amount_minor: 100_000,
        currency: "INR".into(),
        description: "rent".into(),
        external_reference: Some("client-key-1".into()),
    };
    let first = orchestrator.create_transfer(request.clone()).await.expect("first call");
    let second = orchestrator.create_transfer(request).await.expect("second call");
    assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn reversal_round_trips_a_completed_deposit() {
    let (orchestrator, wallets, ledger, w1, _w2) = harness(500_000).await;
    let deposit = orchestrator
        .create_deposit("user-1".into(), w1, 100_000, "INR".into(), "initial funding".into())
        .await
        .expect("deposit succeeds");
    assert_eq!(wallets.get_wallet(w1).await.expect("get w1").balance_minor, 100_000);

    // Deposits are one-sided (spec: "only two-sided transactions can be
    // reversed through this path"); exercise the two-sided reversal flow
    // against a transfer instead to match the documented scenario.
    let w2 = wallets
        .create_wallet(CreateWalletRequest {
            user_id: "user-2".into(),
            wallet_type: WalletType::Default,
            currency: "INR".into(),
            ledger_account_id: ledger
                .create_account(CreateAccountRequest {
                    code: "W3".into(),
                    name: "Wallet 3 deposits".into(),
                    account_type: AccountType::Liability,
                    currency: "INR".into(),
                    parent_account_id: None,
                })
                .await
                .expect("create w3 ledger account")
                .id,
            daily_limit_minor: 500_000,
            monthly_limit_minor: 5_000_000,
        })
        .await
        .expect("create wallet 2");

    let _ = deposit;
    let transfer = orchestrator
        .create_transfer(CreateTransferRequest {
            initiated_by: "user-1".into(),
            source_wallet_id: w1,
            destination_wallet_id: w2.id,
            amount_minor: 50_000,
            currency: "INR".into(),
            description: "half to w2".into(),
            external_reference: None,
        })
        .await
        .expect("transfer succeeds");

    let reversal = orchestrator
        .reverse_transaction("admin-1".into(), transfer.id, "customer dispute".into())
        .await
        .expect("reversal succeeds");
    assert_eq!(reversal.status, TransactionStatus::Completed);

    let original = orchestrator.get_transaction(transfer.id).await.expect("get original");
    assert_eq!(original.status, TransactionStatus::Reversed);

    let w1_after = wallets.get_wallet(w1).await.expect("get w1 after reversal");
    let w2_after = wallets.get_wallet(w2.id).await.expect("get w2 after reversal");
    assert_eq!(w1_after.balance_minor, 100_000);
    assert_eq!(w2_after.balance_minor, 0);
}

#[tokio::test]
async fn unpermissioned_user_is_forbidden() {
    let (orchestrator, _wallets, _ledger, w1, w2) = harness(500_000).await;
    let result = orchestrator
        .create_transfer(CreateTransferRequest {
            initiated_by: "stranger".into(),
            source_wallet_id: w1,
            destination_wallet_id: w2,
            amount_minor: 1_000,
            currency: "INR".into(),
            description: "unauthorized".into(),
            external_reference: None,
        })
        .await;
    assert!(matches!(result, Err(TransactionError::Forbidden(_))));
}
