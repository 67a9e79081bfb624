#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Token-minting and credential-validation collaborator (spec §1: "Identity
//! flows beyond token minting and validation... are out of scope"). This
//! crate owns exactly the slice the gateway and the money-movement services
//! touch: user registration, password verification, JWT issuance, and JWT
//! validation. KYC, OTP, and registration UX are not modeled.

use std::collections::HashMap;
use std::sync::Arc;

use argon2::Argon2;
use argon2::password_hash::PasswordHash;
use argon2::password_hash::PasswordHasher;
use argon2::password_hash::PasswordVerifier;
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use jsonwebtoken::Algorithm;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::EncodingKey;
use jsonwebtoken::Header;
use jsonwebtoken::Validation;
use nivo_envelope::ErrorCode;
use nivo_envelope::IntoEnvelopeError;
use regex_lite::Regex;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub mod http;
#[cfg(feature = "postgres")]
pub mod postgres_store;

pub type UserId = Uuid;
pub type IdentityResult<T> = Result<T, IdentityError>;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("user {0} not found")]
    NotFound(UserId),
    #[error("no account exists for the given phone or email")]
    NoSuchAccount,
    #[error("email {0:?} is already registered")]
    DuplicateEmail(String),
    #[error("incorrect email or password")]
    InvalidCredentials,
    #[error("token is invalid or has expired")]
    InvalidToken,
    #[error("admin session has expired; re-authenticate")]
    SessionExpired,
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl IntoEnvelopeError for IdentityError {
    fn code(&self) -> ErrorCode {
        match self {
            IdentityError::NotFound(_) | IdentityError::NoSuchAccount => ErrorCode::NotFound,
            IdentityError::DuplicateEmail(_) => ErrorCode::Conflict,
            IdentityError::InvalidCredentials
            | IdentityError::InvalidToken
            | IdentityError::SessionExpired => ErrorCode::Unauthorized,
            IdentityError::Validation(_) => ErrorCode::Validation,
            IdentityError::Storage(_) => ErrorCode::Internal,
        }
    }

    fn message(&self) -> String {
        self.to_string()
    }
}

/// Schema invariant from spec §6: `+91` followed by a digit 6-9 and nine
/// more digits.
fn phone_pattern() -> &'static Regex {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\+91[6-9][0-9]{9}$").expect("phone pattern compiles"))
}

#[must_use]
pub fn is_valid_indian_phone(phone: &str) -> bool {
    phone_pattern().is_match(phone)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Regular,
    Admin,
}

impl AccountType {
    /// JWT lifetime per spec §6: 24h for regular users, 2h for admin
    /// sessions (the shorter bound is additionally enforced by the admin
    /// session store, not by the token's `exp` claim alone).
    #[must_use]
    pub fn token_lifetime(self) -> Duration {
        match self {
            AccountType::Regular => Duration::hours(24),
            AccountType::Admin => Duration::hours(2),
        }
    }

    #[must_use]
    fn as_str(self) -> &'static str {
        match self {
            AccountType::Regular => "regular",
            AccountType::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub phone: String,
    pub account_type: AccountType,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    /// Set by `nivo-wallet` the first time it creates a wallet for this
    /// user, so phone-based beneficiary lookup can resolve a target wallet
    /// without the identity service knowing about wallets itself.
    pub default_wallet_id: Option<Uuid>,
}

/// Response shape for endpoints that hand a [`User`] back to a caller;
/// deliberately omits `password_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: UserId,
    pub email: String,
    pub phone: String,
    pub account_type: AccountType,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            phone: user.phone.clone(),
            account_type: user.account_type,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub phone: String,
    pub password: String,
    pub account_type: AccountType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// JWT claims (spec §6): `{sub, email, account_type, exp}`, HS256.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub account_type: String,
    pub exp: usize,
}

/// Mints and validates HS256 JWTs from `JWT_SECRET` (spec §6: "required;
/// fail fast if empty").
#[derive(Clone)]
pub struct JwtIssuer {
    secret: Arc<str>,
}

impl JwtIssuer {
    pub fn from_secret(secret: impl Into<String>) -> IdentityResult<Self> {
        let secret: String = secret.into();
        if secret.is_empty() {
            return Err(IdentityError::Validation("JWT_SECRET must not be empty".into()));
        }
        Ok(Self { secret: secret.into() })
    }

    pub fn issue(&self, user: &User, now: DateTime<Utc>) -> IdentityResult<String> {
        let exp = now + user.account_type.token_lifetime();
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            account_type: user.account_type.as_str().to_string(),
            exp: exp.timestamp() as usize,
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|err| IdentityError::Storage(err.to_string()))
    }

    pub fn validate(&self, token: &str) -> IdentityResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|_| IdentityError::InvalidToken)
    }
}

fn hash_password(password: &str) -> IdentityResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| IdentityError::Storage(err.to_string()))
}

fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn insert(&self, user: User) -> IdentityResult<User>;
    async fn update(&self, user: User) -> IdentityResult<User>;
    async fn get(&self, id: UserId) -> IdentityResult<User>;
    async fn find_by_email(&self, email: &str) -> IdentityResult<Option<User>>;
    async fn find_by_phone(&self, phone: &str) -> IdentityResult<Option<User>>;
}

/// Tracks admin sessions independently of the JWT's own `exp`, per spec §6
/// ("2-hour for admin sessions (enforced by the session store, not by the
/// JWT alone)"). Regular users have no session-store entry; their token's
/// own expiry is authoritative.
#[derive(Default)]
pub struct AdminSessionStore {
    sessions: RwLock<HashMap<UserId, DateTime<Utc>>>,
}

impl AdminSessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start_session(&self, user_id: UserId, now: DateTime<Utc>) {
        let mut guard = self.sessions.write().await;
        guard.insert(user_id, now + AccountType::Admin.token_lifetime());
    }

    pub async fn is_active(&self, user_id: UserId, now: DateTime<Utc>) -> bool {
        let guard = self.sessions.read().await;
        guard.get(&user_id).is_some_and(|expires_at| *expires_at > now)
    }
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, User>,
}

/// In-memory [`IdentityStore`].
#[derive(Default)]
pub struct InMemoryIdentityStore {
    state: RwLock<MemoryState>,
}

impl InMemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn insert(&self, user: User) -> IdentityResult<User> {
        let mut guard = self.state.write().await;
        if guard.users.values().any(|existing| existing.email == user.email) {
            return Err(IdentityError::DuplicateEmail(user.email));
        }
        guard.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, user: User) -> IdentityResult<User> {
        let mut guard = self.state.write().await;
        if !guard.users.contains_key(&user.id) {
            return Err(IdentityError::NotFound(user.id));
        }
        guard.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get(&self, id: UserId) -> IdentityResult<User> {
        let guard = self.state.read().await;
        guard.users.get(&id).cloned().ok_or(IdentityError::NotFound(id))
    }

    async fn find_by_email(&self, email: &str) -> IdentityResult<Option<User>> {
        let guard = self.state.read().await;
        Ok(guard.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> IdentityResult<Option<User>> {
        let guard = self.state.read().await;
        Ok(guard.users.values().find(|u| u.phone == phone).cloned())
    }
}

/// Registration, login, and token validation, built atop an [`IdentityStore`]
/// and a [`JwtIssuer`].
pub struct IdentityService {
    store: Arc<dyn IdentityStore>,
    jwt: JwtIssuer,
    admin_sessions: Arc<AdminSessionStore>,
}

impl IdentityService {
    #[must_use]
    pub fn new(store: Arc<dyn IdentityStore>, jwt: JwtIssuer, admin_sessions: Arc<AdminSessionStore>) -> Self {
        Self {
            store,
            jwt,
            admin_sessions,
        }
    }

    pub async fn register(&self, request: RegisterRequest) -> IdentityResult<User> {
        if !is_valid_indian_phone(&request.phone) {
            return Err(IdentityError::Validation(format!(
                "{:?} is not a valid Indian phone number",
                request.phone
            )));
        }
        if !request.email.contains('@') {
            return Err(IdentityError::Validation("email is not well-formed".into()));
        }
        if request.password.len() < 8 {
            return Err(IdentityError::Validation(
                "password must be at least 8 characters".into(),
            ));
        }

        let user = User {
            id: Uuid::new_v4(),
            email: request.email,
            phone: request.phone,
            account_type: request.account_type,
            password_hash: hash_password(&request.password)?,
            created_at: Utc::now(),
            default_wallet_id: None,
        };
        self.store.insert(user).await
    }

    /// Records `wallet_id` as `user_id`'s default wallet the first time a
    /// wallet is created for them; later calls are a no-op so a user's
    /// first wallet always wins.
    pub async fn set_default_wallet_if_unset(&self, user_id: UserId, wallet_id: Uuid) -> IdentityResult<()> {
        let mut user = self.store.get(user_id).await?;
        if user.default_wallet_id.is_none() {
            user.default_wallet_id = Some(wallet_id);
            self.store.update(user).await?;
        }
        Ok(())
    }

    pub async fn phone_lookup(&self, phone: &str) -> IdentityResult<Option<(UserId, Uuid)>> {
        let Some(user) = self.store.find_by_phone(phone).await? else {
            return Ok(None);
        };
        Ok(user.default_wallet_id.map(|wallet_id| (user.id, wallet_id)))
    }

    pub async fn login(&self, request: LoginRequest) -> IdentityResult<(String, User)> {
        let user = self
            .store
            .find_by_email(&request.email)
            .await?
            .ok_or(IdentityError::InvalidCredentials)?;
        if !verify_password(&request.password, &user.password_hash) {
            return Err(IdentityError::InvalidCredentials);
        }

        let now = Utc::now();
        if user.account_type == AccountType::Admin {
            self.admin_sessions.start_session(user.id, now).await;
        }
        let token = self.jwt.issue(&user, now)?;
        Ok((token, user))
    }

    pub async fn validate_token(&self, token: &str) -> IdentityResult<Claims> {
        let claims = self.jwt.validate(token)?;
        if claims.account_type == AccountType::Admin.as_str() {
            let user_id: UserId = claims
                .sub
                .parse()
                .map_err(|_| IdentityError::InvalidToken)?;
            if !self.admin_sessions.is_active(user_id, Utc::now()).await {
                return Err(IdentityError::SessionExpired);
            }
        }
        Ok(claims)
    }

    pub async fn get_user(&self, id: UserId) -> IdentityResult<User> {
        self.store.get(id).await
    }

    pub async fn find_by_phone(&self, phone: &str) -> IdentityResult<Option<User>> {
        self.store.find_by_phone(phone).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn service() -> IdentityService {
        IdentityService::new(
            Arc::new(InMemoryIdentityStore::new()),
            JwtIssuer::from_secret("test-secret-do-not-use-in-prod").expect("secret is non-empty"),
            Arc::new(AdminSessionStore::new()),
        )
    }

    fn request() -> RegisterRequest {
        RegisterRequest {
            email: "e2e1@n.test".into(),
            phone: "+919876500001".into(),
            password: "P@ssw0rd1".into(),
            account_type: AccountType::Regular,
        }
    }

    #[tokio::test]
    async fn register_then_login_round_trips() {
        let service = service();
        let user = service.register(request()).await.expect("register");
        let (token, logged_in) = service
            .login(LoginRequest {
                email: "e2e1@n.test".into(),
                password: "P@ssw0rd1".into(),
            })
            .await
            .expect("login");
        assert_eq!(user.id, logged_in.id);
        let claims = service.validate_token(&token).await.expect("validate token");
        assert_eq!(claims.sub, user.id.to_string());
    }

    #[tokio::test]
    async fn login_rejects_wrong_password() {
        let service = service();
        service.register(request()).await.expect("register");
        let result = service
            .login(LoginRequest {
                email: "e2e1@n.test".into(),
                password: "wrong-password".into(),
            })
            .await;
        assert!(matches!(result, Err(IdentityError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let service = service();
        service.register(request()).await.expect("first registration");
        let result = service.register(request()).await;
        assert!(matches!(result, Err(IdentityError::DuplicateEmail(_))));
    }

    #[tokio::test]
    async fn invalid_phone_is_rejected() {
        let service = service();
        let mut bad_request = request();
        bad_request.phone = "9876500001".into();
        let result = service.register(bad_request).await;
        assert!(matches!(result, Err(IdentityError::Validation(_))));
    }

    #[tokio::test]
    async fn admin_session_expires_independent_of_jwt_exp() {
        let service = service();
        let mut admin_request = request();
        admin_request.account_type = AccountType::Admin;
        service.register(admin_request).await.expect("register admin");
        let (token, _) = service
            .login(LoginRequest {
                email: "e2e1@n.test".into(),
                password: "P@ssw0rd1".into(),
            })
            .await
            .expect("login");
        assert!(service.validate_token(&token).await.is_ok());

        let claims = service.jwt.validate(&token).expect("decode claims directly");
        let user_id: UserId = claims.sub.parse().expect("parse sub");
        // Force the session store's expiry to the past without waiting two
        // hours, to exercise the "enforced by the session store, not the
        // JWT alone" rule.
        {
            let mut guard = service.admin_sessions.sessions.write().await;
            guard.insert(user_id, Utc::now() - Duration::minutes(1));
        }
        let result = service.validate_token(&token).await;
        assert!(matches!(result, Err(IdentityError::SessionExpired)));
    }

    #[test]
    fn phone_pattern_matches_spec_regex() {
        assert!(is_valid_indian_phone("+919876500001"));
        assert!(!is_valid_indian_phone("+915876500001"));
        assert!(!is_valid_indian_phone("9876500001"));
    }
}
