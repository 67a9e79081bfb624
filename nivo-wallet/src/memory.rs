use std::collections::HashMap;
use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::AddBeneficiaryRequest;
use crate::Beneficiary;
use crate::CreateWalletRequest;
use crate::IdentityLookup;
use crate::OneSidedMoveRequest;
use crate::OneSidedOutcome;
use crate::ProcessedTransferReceipt;
use crate::TransferOutcome;
use crate::TransferRequest;
use crate::Wallet;
use crate::WalletError;
use crate::WalletId;
use crate::WalletLimits;
use crate::WalletResult;
use crate::WalletService;
use crate::WalletStatus;

/// In-memory [`WalletService`]. A single [`tokio::sync::Mutex`] stands in
/// for the two-row canonical-order lock the Postgres-backed store takes;
/// the lock-ordering logic is still exercised so the same call sequence
/// works unchanged against the real store.
pub struct InMemoryWalletService {
    state: Mutex<State>,
    identity: std::sync::Arc<dyn IdentityLookup>,
}

#[derive(Default)]
struct State {
    wallets: HashMap<WalletId, Wallet>,
    limits: HashMap<WalletId, WalletLimits>,
    active_keys: HashSet<(String, u8, String)>,
    receipts: HashMap<Uuid, ProcessedTransferReceipt>,
    one_sided_receipts: HashMap<Uuid, OneSidedOutcome>,
    beneficiaries: Vec<Beneficiary>,
}

/// Which side of the wallet a deposit or withdrawal touches.
enum OneSidedKind {
    Credit,
    Debit,
}

fn wallet_type_key(wallet_type: crate::WalletType) -> u8 {
    match wallet_type {
        crate::WalletType::Default => 0,
        crate::WalletType::Savings => 1,
        crate::WalletType::Current => 2,
        crate::WalletType::Fixed => 3,
    }
}

impl InMemoryWalletService {
    #[must_use]
    pub fn new(identity: std::sync::Arc<dyn IdentityLookup>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            identity,
        }
    }

    async fn apply_one_sided(
        &self,
        request: OneSidedMoveRequest,
        kind: OneSidedKind,
    ) -> WalletResult<OneSidedOutcome> {
        let mut guard = self.state.lock().await;

        if let Some(receipt) = guard.one_sided_receipts.get(&request.transaction_id) {
            return Ok(OneSidedOutcome { replayed: true, ..*receipt });
        }

        let wallet = guard
            .wallets
            .get_mut(&request.wallet_id)
            .ok_or(WalletError::NotFound(request.wallet_id))?;
        match kind {
            OneSidedKind::Credit => {
                if !wallet.status.can_credit() {
                    return Err(WalletError::WalletNotUsable(wallet.id));
                }
                wallet.balance_minor += request.amount_minor;
                wallet.available_balance_minor += request.amount_minor;
            }
            OneSidedKind::Debit => {
                if !wallet.status.can_debit() {
                    return Err(WalletError::WalletNotUsable(wallet.id));
                }
                if wallet.available_balance_minor < request.amount_minor {
                    return Err(WalletError::InsufficientFunds);
                }
                wallet.balance_minor -= request.amount_minor;
                wallet.available_balance_minor -= request.amount_minor;
            }
        }

        let outcome = OneSidedOutcome {
            wallet_id: request.wallet_id,
            amount_minor: request.amount_minor,
            replayed: false,
        };
        guard.one_sided_receipts.insert(request.transaction_id, outcome);
        Ok(outcome)
    }
}

#[async_trait]
impl WalletService for InMemoryWalletService {
    async fn create_wallet(&self, request: CreateWalletRequest) -> WalletResult<Wallet> {
        let mut guard = self.state.lock().await;
        let key = (
            request.user_id.clone(),
            wallet_type_key(request.wallet_type),
            request.currency.clone(),
        );
        if guard.active_keys.contains(&key) {
            return Err(WalletError::DuplicateWallet);
        }

        let wallet = Wallet {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            wallet_type: request.wallet_type,
            currency: request.currency,
            balance_minor: 0,
            available_balance_minor: 0,
            status: WalletStatus::Active,
            ledger_account_id: request.ledger_account_id,
            upi_virtual_address: None,
            closed_at: None,
            close_reason: None,
        };
        let limits = WalletLimits::new(
            wallet.id,
            request.daily_limit_minor,
            request.monthly_limit_minor,
            Utc::now(),
        );

        guard.active_keys.insert(key);
        guard.wallets.insert(wallet.id, wallet.clone());
        guard.limits.insert(wallet.id, limits);
        drop(guard);

        if let Err(err) = self.identity.record_default_wallet(&wallet.user_id, wallet.id).await {
            tracing::warn!(%err, wallet_id = %wallet.id, "failed to record default wallet with identity");
        }
        Ok(wallet)
    }

    async fn get_wallet(&self, id: WalletId) -> WalletResult<Wallet> {
        let guard = self.state.lock().await;
        guard.wallets.get(&id).cloned().ok_or(WalletError::NotFound(id))
    }

    async fn activate_wallet(&self, id: WalletId) -> WalletResult<Wallet> {
        let mut guard = self.state.lock().await;
        let wallet = guard.wallets.get_mut(&id).ok_or(WalletError::NotFound(id))?;
        match wallet.status {
            WalletStatus::Active => {}
            WalletStatus::Inactive => wallet.status = WalletStatus::Active,
            WalletStatus::Frozen | WalletStatus::Closed => return Err(WalletError::WalletNotUsable(id)),
        }
        Ok(wallet.clone())
    }

    async fn get_limits(&self, id: WalletId, now: chrono::DateTime<Utc>) -> WalletResult<WalletLimits> {
        let mut guard = self.state.lock().await;
        let limits = guard.limits.get_mut(&id).ok_or(WalletError::NotFound(id))?;
        limits.apply_lazy_reset(now);
        Ok(limits.clone())
    }

    async fn reserve_and_move(&self, request: TransferRequest) -> WalletResult<TransferOutcome> {
        let mut guard = self.state.lock().await;

        if let Some(receipt) = guard.receipts.get(&request.transaction_id) {
            return Ok(TransferOutcome {
                source_wallet_id: receipt.source_wallet_id,
                destination_wallet_id: receipt.destination_wallet_id,
                amount_minor: receipt.amount_minor,
                replayed: true,
            });
        }

        // Canonical lock order (lower wallet id first) is enforced by the
        // Postgres store's `FOR UPDATE` pair; a single mutex already
        // serializes every in-memory mutation, so there is nothing further
        // to order here.
        let source = guard
            .wallets
            .get(&request.source_wallet_id)
            .cloned()
            .ok_or(WalletError::NotFound(request.source_wallet_id))?;
        let destination = guard
            .wallets
            .get(&request.destination_wallet_id)
            .cloned()
            .ok_or(WalletError::NotFound(request.destination_wallet_id))?;

        if !source.status.can_debit() {
            return Err(WalletError::WalletNotUsable(source.id));
        }
        if !destination.status.can_credit() {
            return Err(WalletError::WalletNotUsable(destination.id));
        }
        if source.available_balance_minor < request.amount_minor {
            return Err(WalletError::InsufficientFunds);
        }

        {
            let limits = guard
                .limits
                .get_mut(&request.source_wallet_id)
                .ok_or(WalletError::NotFound(request.source_wallet_id))?;
            limits.check_and_reserve(request.amount_minor, Utc::now())?;
        }

        {
            let source_mut = guard
                .wallets
                .get_mut(&request.source_wallet_id)
                .ok_or(WalletError::NotFound(request.source_wallet_id))?;
            source_mut.balance_minor -= request.amount_minor;
            source_mut.available_balance_minor -= request.amount_minor;
        }
        {
            let destination_mut = guard
                .wallets
                .get_mut(&request.destination_wallet_id)
                .ok_or(WalletError::NotFound(request.destination_wallet_id))?;
            destination_mut.balance_minor += request.amount_minor;
            destination_mut.available_balance_minor += request.amount_minor;
        }

        let receipt = ProcessedTransferReceipt {
            transaction_id: request.transaction_id,
            source_wallet_id: request.source_wallet_id,
            destination_wallet_id: request.destination_wallet_id,
            amount_minor: request.amount_minor,
            processed_at: Utc::now(),
        };
        guard.receipts.insert(request.transaction_id, receipt);

        Ok(TransferOutcome {
            source_wallet_id: request.source_wallet_id,
            destination_wallet_id: request.destination_wallet_id,
            amount_minor: request.amount_minor,
            replayed: false,
        })
    }

    async fn apply_deposit(&self, request: OneSidedMoveRequest) -> WalletResult<OneSidedOutcome> {
        self.apply_one_sided(request, OneSidedKind::Credit).await
    }

    async fn apply_withdrawal(&self, request: OneSidedMoveRequest) -> WalletResult<OneSidedOutcome> {
        self.apply_one_sided(request, OneSidedKind::Debit).await
    }

    async fn add_beneficiary(&self, request: AddBeneficiaryRequest) -> WalletResult<Beneficiary> {
        let (beneficiary_user_id, target_wallet_id) = self
            .identity
            .find_user_and_default_wallet(&request.phone)
            .await?
            .ok_or_else(|| WalletError::IdentityLookup(format!("no user with phone {}", request.phone)))?;

        if beneficiary_user_id == request.owner_user_id {
            return Err(WalletError::SelfBeneficiary);
        }

        let mut guard = self.state.lock().await;
        let nickname_lower = request.nickname.to_lowercase();
        let duplicate = guard.beneficiaries.iter().any(|existing| {
            existing.owner_user_id == request.owner_user_id
                && existing.nickname.to_lowercase() == nickname_lower
        });
        if duplicate {
            return Err(WalletError::DuplicateNickname(request.nickname));
        }

        let beneficiary = Beneficiary {
            id: Uuid::new_v4(),
            owner_user_id: request.owner_user_id,
            beneficiary_user_id,
            target_wallet_id,
            nickname: request.nickname,
        };
        guard.beneficiaries.push(beneficiary.clone());
        Ok(beneficiary)
    }

    async fn list_beneficiaries(&self, owner_user_id: &crate::UserId) -> WalletResult<Vec<Beneficiary>> {
        let guard = self.state.lock().await;
        Ok(guard
            .beneficiaries
            .iter()
            .filter(|beneficiary| &beneficiary.owner_user_id == owner_user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WalletType;
    use pretty_assertions::assert_eq;

    struct StaticIdentity {
        users: std::collections::HashMap<String, (String, WalletId)>,
    }

    #[async_trait]
    impl IdentityLookup for StaticIdentity {
        async fn find_user_and_default_wallet(
            &self,
            phone: &str,
        ) -> WalletResult<Option<(String, WalletId)>> {
            Ok(self.users.get(phone).cloned())
        }
    }

    async fn service_with_two_wallets() -> (InMemoryWalletService, WalletId, WalletId) {
        let identity = std::sync::Arc::new(StaticIdentity {
            users: std::collections::HashMap::new(),
        });
        let service = InMemoryWalletService::new(identity);
        let source = service
            .create_wallet(CreateWalletRequest {
                user_id: "user-1".into(),
                wallet_type: WalletType::Default,
                currency: "INR".into(),
                ledger_account_id: Uuid::new_v4(),
                daily_limit_minor: 100_000,
                monthly_limit_minor: 1_000_000,
            })
            .await
            .expect("create source wallet");
        let destination = service
            .create_wallet(CreateWalletRequest {
                user_id: "user-2".into(),
                wallet_type: WalletType::Default,
                currency: "INR".into(),
                ledger_account_id: Uuid::new_v4(),
                daily_limit_minor: 100_000,
                monthly_limit_minor: 1_000_000,
            })
            .await
            .expect("create destination wallet");

        // Fund the source wallet directly for test purposes, bypassing the
        // service surface (this would normally happen via a deposit).
        {
            let mut guard = service.state.lock().await;
            let wallet = guard.wallets.get_mut(&source.id).expect("source wallet exists");
            wallet.balance_minor = 50_000;
            wallet.available_balance_minor = 50_000;
        }

        (service, source.id, destination.id)
    }

    #[tokio::test]
    async fn reserve_and_move_transfers_balance() {
        let (service, source, destination) = service_with_two_wallets().await;
        let outcome = service
            .reserve_and_move(TransferRequest {
                transaction_id: Uuid::new_v4(),
                source_wallet_id: source,
                destination_wallet_id: destination,
                amount_minor: 10_000,
            })
            .await
            .expect("reserve and move");
        assert!(!outcome.replayed);

        let source_wallet = service.get_wallet(source).await.expect("get source");
        let destination_wallet = service.get_wallet(destination).await.expect("get destination");
        assert_eq!(source_wallet.balance_minor, 40_000);
        assert_eq!(destination_wallet.balance_minor, 10_000);
    }

    #[tokio::test]
    async fn retrying_the_same_transaction_id_is_a_no_op() {
        let (service, source, destination) = service_with_two_wallets().await;
        let transaction_id = Uuid::new_v4();
        let request = TransferRequest {
            transaction_id,
            source_wallet_id: source,
            destination_wallet_id: destination,
            amount_minor: 10_000,
        };
        let first = service.reserve_and_move(request).await.expect("first attempt");
        let second = service.reserve_and_move(request).await.expect("retry");
        assert!(!first.replayed);
        assert!(second.replayed);

        let source_wallet = service.get_wallet(source).await.expect("get source");
        assert_eq!(source_wallet.balance_minor, 40_000);
    }

    #[tokio::test]
    async fn insufficient_balance_is_rejected() {
        let (service, source, destination) = service_with_two_wallets().await;
        let result = service
            .reserve_and_move(TransferRequest {
                transaction_id: Uuid::new_v4(),
                source_wallet_id: source,
                destination_wallet_id: destination,
                amount_minor: 999_999,
            })
            .await;
        assert!(matches!(result, Err(WalletError::InsufficientFunds)));
    }

    #[tokio::test]
    async fn frozen_source_wallet_rejects_debit() {
        let (service, source, destination) = service_with_two_wallets().await;
        {
            let mut guard = service.state.lock().await;
            guard.wallets.get_mut(&source).expect("source exists").status = WalletStatus::Frozen;
        }
        let result = service
            .reserve_and_move(TransferRequest {
                transaction_id: Uuid::new_v4(),
                source_wallet_id: source,
                destination_wallet_id: destination,
                amount_minor: 1_000,
            })
            .await;
        assert!(matches!(result, Err(WalletError::WalletNotUsable(_))));
    }

    #[tokio::test]
    async fn apply_deposit_credits_wallet_balance() {
        let (service, source, _destination) = service_with_two_wallets().await;
        let outcome = service
            .apply_deposit(OneSidedMoveRequest {
                transaction_id: Uuid::new_v4(),
                wallet_id: source,
                amount_minor: 5_000,
            })
            .await
            .expect("apply deposit");
        assert!(!outcome.replayed);

        let wallet = service.get_wallet(source).await.expect("get wallet");
        assert_eq!(wallet.balance_minor, 55_000);
        assert_eq!(wallet.available_balance_minor, 55_000);
    }

    #[tokio::test]
    async fn retrying_the_same_deposit_transaction_id_is_a_no_op() {
        let (service, source, _destination) = service_with_two_wallets().await;
        let request = OneSidedMoveRequest {
            transaction_id: Uuid::new_v4(),
            wallet_id: source,
            amount_minor: 5_000,
        };
        let first = service.apply_deposit(request).await.expect("first deposit");
        let second = service.apply_deposit(request).await.expect("retry");
        assert!(!first.replayed);
        assert!(second.replayed);

        let wallet = service.get_wallet(source).await.expect("get wallet");
        assert_eq!(wallet.balance_minor, 55_000);
    }

    #[tokio::test]
    async fn apply_withdrawal_debits_wallet_balance() {
        let (service, source, _destination) = service_with_two_wallets().await;
        let outcome = service
            .apply_withdrawal(OneSidedMoveRequest {
                transaction_id: Uuid::new_v4(),
                wallet_id: source,
                amount_minor: 20_000,
            })
            .await
            .expect("apply withdrawal");
        assert!(!outcome.replayed);

        let wallet = service.get_wallet(source).await.expect("get wallet");
        assert_eq!(wallet.balance_minor, 30_000);
    }

    #[tokio::test]
    async fn apply_withdrawal_rejects_insufficient_balance() {
        let (service, source, _destination) = service_with_two_wallets().await;
        let result = service
            .apply_withdrawal(OneSidedMoveRequest {
                transaction_id: Uuid::new_v4(),
                wallet_id: source,
                amount_minor: 999_999,
            })
            .await;
        assert!(matches!(result, Err(WalletError::InsufficientFunds)));
    }

    #[tokio::test]
    async fn inactive_destination_still_accepts_credit() {
        let (service, source, destination) = service_with_two_wallets().await;
        {
            let mut guard = service.state.lock().await;
            guard.wallets.get_mut(&destination).expect("destination exists").status =
                WalletStatus::Inactive;
        }
        let outcome = service
            .reserve_and_move(TransferRequest {
                transaction_id: Uuid::new_v4(),
                source_wallet_id: source,
                destination_wallet_id: destination,
                amount_minor: 1_000,
            })
            .await
            .expect("inactive destination accepts credit");
        assert!(!outcome.replayed);
    }

    #[tokio::test]
    async fn beneficiary_self_reference_rejected() {
        let identity = std::sync::Arc::new(StaticIdentity {
            users: std::collections::HashMap::from([(
                "9999999999".to_string(),
                ("user-1".to_string(), Uuid::new_v4()),
            )]),
        });
        let service = InMemoryWalletService::new(identity);
        let result = service
            .add_beneficiary(AddBeneficiaryRequest {
                owner_user_id: "user-1".into(),
                phone: "9999999999".into(),
                nickname: "me".into(),
            })
            .await;
        assert!(matches!(result, Err(WalletError::SelfBeneficiary)));
    }

    #[tokio::test]
    async fn duplicate_nickname_case_insensitive_rejected() {
        let identity = std::sync::Arc::new(StaticIdentity {
            users: std::collections::HashMap::from([
                ("1111111111".to_string(), ("user-2".to_string(), Uuid::new_v4())),
                ("2222222222".to_string(), ("user-3".to_string(), Uuid::new_v4())),
            ]),
        });
        let service = InMemoryWalletService::new(identity);
        service
            .add_beneficiary(AddBeneficiaryRequest {
                owner_user_id: "user-1".into(),
                phone: "1111111111".into(),
                nickname: "Mom".into(),
            })
            .await
            .expect("add first beneficiary");
        let result = service
            .add_beneficiary(AddBeneficiaryRequest {
                owner_user_id: "user-1".into(),
                phone: "2222222222".into(),
                nickname: "mom".into(),
            })
            .await;
        assert!(matches!(result, Err(WalletError::DuplicateNickname(_))));
    }
}
