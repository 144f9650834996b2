//! Built-in accounts module.
//!
//! Resolves identities for every provider against an in-memory account
//! store. Each provider identity is a link `(provider, subject) -> user id`;
//! an account may carry links from several providers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use linna_core::{
    AuthOutcome, DbHandle, GameCenterCredentials, Initializer, InitializerExt, LinnaModule,
    Logger, ModuleConfig, ProviderKind, RuntimeContext, RuntimeError, SessionToken,
};
use linna_core::helpers::{bcrypt_compare, bcrypt_hash_with_cost, BCRYPT_DEFAULT_COST};
use parking_lot::RwLock;
use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};

use super::verifier::{ProviderToken, ProviderVerifier, VerifiedIdentity};
use crate::session::SessionIssuer;

/// Maximum length in bytes of custom and device ids.
pub const MAX_ID_LEN: usize = 128;
const GENERATED_USERNAME_LEN: usize = 10;
/// Collection holding each account's metadata object, keyed by user id.
pub const METADATA_COLLECTION: &str = "account_metadata";

/// `account_get` response body.
#[derive(Debug, Serialize)]
struct AccountView {
    #[serde(flatten)]
    account: Account,
    metadata: Value,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub user_id: String,
    pub username: String,
    /// User ids of linked friends.
    pub friends: Vec<String>,
}

struct AccountStore {
    accounts: HashMap<String, Account>,
    /// Lower-cased username to user id.
    usernames: HashMap<String, String>,
    links: HashMap<(ProviderKind, String), String>,
    /// Bcrypt hashes keyed by lower-cased email.
    passwords: HashMap<String, String>,
    password_cost: u32,
}

impl AccountStore {
    fn new(password_cost: u32) -> Self {
        Self {
            accounts: HashMap::new(),
            usernames: HashMap::new(),
            links: HashMap::new(),
            passwords: HashMap::new(),
            password_cost,
        }
    }

    fn unused_username(&self) -> String {
        let mut rng = rand::rng();
        loop {
            let candidate: String = (0..GENERATED_USERNAME_LEN)
                .map(|_| char::from(rng.random_range(b'a'..=b'z')))
                .collect();
            if !self.usernames.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Find or create the account linked to `(kind, subject)`.
    ///
    /// Everything is checked before the first insert, so a failed call
    /// leaves the store unchanged.
    fn resolve(
        &mut self,
        kind: ProviderKind,
        subject: &str,
        username: &str,
        create: bool,
        password: Option<&str>,
    ) -> Result<AuthOutcome, RuntimeError> {
        let link = (kind, subject.to_string());
        if let Some(user_id) = self.links.get(&link) {
            if let Some(password) = password {
                let valid = self
                    .passwords
                    .get(subject)
                    .is_some_and(|hash| bcrypt_compare(hash, password).unwrap_or(false));
                if !valid {
                    return Err(RuntimeError::unauthenticated("Invalid credentials."));
                }
            }
            let account = self
                .accounts
                .get(user_id)
                .ok_or_else(|| RuntimeError::internal("dangling account link"))?;
            return Ok(AuthOutcome {
                user_id: account.user_id.clone(),
                username: account.username.clone(),
                created: false,
            });
        }

        if !create {
            return Err(RuntimeError::account_not_found());
        }

        let username = if username.is_empty() {
            self.unused_username()
        } else if self.usernames.contains_key(&username.to_lowercase()) {
            return Err(RuntimeError::already_exists("Username is already in use."));
        } else {
            username.to_string()
        };

        let password_hash = password
            .map(|password| bcrypt_hash_with_cost(password, self.password_cost))
            .transpose()?;

        let user_id = uuid::Uuid::new_v4().to_string();
        self.usernames.insert(username.to_lowercase(), user_id.clone());
        self.links.insert(link, user_id.clone());
        if let Some(hash) = password_hash {
            self.passwords.insert(subject.to_string(), hash);
        }
        self.accounts.insert(
            user_id.clone(),
            Account {
                user_id: user_id.clone(),
                username: username.clone(),
                friends: Vec::new(),
            },
        );
        Ok(AuthOutcome {
            user_id,
            username,
            created: true,
        })
    }

    /// Replace `user_id`'s friends with the accounts linked to `friend_ids`.
    fn import_friends(
        &mut self,
        kind: ProviderKind,
        user_id: &str,
        friend_ids: &[String],
    ) -> usize {
        let friends: Vec<String> = friend_ids
            .iter()
            .filter_map(|id| self.links.get(&(kind, id.clone())).cloned())
            .filter(|id| id != user_id)
            .collect();
        let count = friends.len();
        if let Some(account) = self.accounts.get_mut(user_id) {
            account.friends = friends;
        }
        count
    }
}

// ---------------------------------------------------------------------------
// AccountsModule
// ---------------------------------------------------------------------------

/// Module implementing every authentication provider.
///
/// Custom, device and email identities are always available. Token-based
/// providers need a [`ProviderVerifier`] installed with
/// [`with_verifier`](Self::with_verifier).
pub struct AccountsModule {
    store: Arc<RwLock<AccountStore>>,
    verifiers: HashMap<ProviderKind, Arc<dyn ProviderVerifier>>,
    sessions: Arc<SessionIssuer>,
}

impl AccountsModule {
    #[must_use]
    pub fn new(sessions: Arc<SessionIssuer>) -> Self {
        Self {
            store: Arc::new(RwLock::new(AccountStore::new(BCRYPT_DEFAULT_COST))),
            verifiers: HashMap::new(),
            sessions,
        }
    }

    #[must_use]
    pub fn with_verifier(
        mut self,
        kind: ProviderKind,
        verifier: Arc<dyn ProviderVerifier>,
    ) -> Self {
        self.verifiers.insert(kind, verifier);
        self
    }

    /// Bcrypt cost for new passwords. Overridden by the `password_cost` param.
    #[must_use]
    pub fn with_password_cost(self, cost: u32) -> Self {
        self.store.write().password_cost = cost;
        self
    }

    /// Snapshot of an account.
    #[must_use]
    pub fn account(&self, user_id: &str) -> Option<Account> {
        self.store.read().accounts.get(user_id).cloned()
    }

    #[must_use]
    pub fn account_count(&self) -> usize {
        self.store.read().accounts.len()
    }

    fn resolve(
        &self,
        logger: &Logger,
        kind: ProviderKind,
        subject: &str,
        username: &str,
        create: bool,
        password: Option<&str>,
    ) -> anyhow::Result<AuthOutcome> {
        let outcome = self
            .store
            .write()
            .resolve(kind, subject, username, create, password)?;
        if outcome.created {
            logger
                .with_fields([
                    ("user_id", outcome.user_id.clone()),
                    ("username", outcome.username.clone()),
                ])
                .info(format_args!("created account via {kind}"));
        }
        Ok(outcome)
    }

    async fn verify(
        &self,
        kind: ProviderKind,
        token: ProviderToken<'_>,
    ) -> anyhow::Result<VerifiedIdentity> {
        let verifier = self.verifiers.get(&kind).ok_or_else(|| {
            RuntimeError::unimplemented(format!("{kind} authentication is not configured"))
        })?;
        verifier.verify(token).await
    }

    async fn authenticate_token(
        &self,
        logger: &Logger,
        kind: ProviderKind,
        token: ProviderToken<'_>,
        username: &str,
        create: bool,
    ) -> anyhow::Result<AuthOutcome> {
        if let ProviderToken::Token(raw) = token {
            if raw.is_empty() {
                let err = RuntimeError::invalid_argument(format!("{kind} token is required"));
                return Err(err.into());
            }
        }
        let identity = self.verify(kind, token).await?;
        self.resolve(logger, kind, &identity.subject, username, create, None)
    }
}

fn validate_id(kind: ProviderKind, id: &str) -> Result<(), RuntimeError> {
    if id.is_empty() {
        return Err(RuntimeError::invalid_argument(format!("{kind} id is required")));
    }
    if id.len() > MAX_ID_LEN {
        return Err(RuntimeError::invalid_argument(format!(
            "{kind} id must be at most {MAX_ID_LEN} bytes"
        )));
    }
    Ok(())
}

#[async_trait]
impl LinnaModule for AccountsModule {
    fn name(&self) -> &str {
        "accounts"
    }

    fn supports(&self, kind: ProviderKind) -> bool {
        match kind {
            ProviderKind::Custom
            | ProviderKind::Device
            | ProviderKind::Email
            | ProviderKind::TokenGenerate => true,
            other => self.verifiers.contains_key(&other),
        }
    }

    fn init(
        &self,
        _ctx: &RuntimeContext,
        logger: &Logger,
        _db: &DbHandle,
        config: &ModuleConfig,
        initializer: &mut dyn Initializer,
    ) -> anyhow::Result<()> {
        if let Some(raw) = config.params.get("password_cost") {
            let cost: u32 = raw.parse().map_err(|_| {
                RuntimeError::invalid_argument(format!("password_cost must be a number, got `{raw}`"))
            })?;
            if !(4..=31).contains(&cost) {
                let err = RuntimeError::invalid_argument("password_cost must be between 4 and 31");
                return Err(err.into());
            }
            self.store.write().password_cost = cost;
        }

        let store = Arc::clone(&self.store);
        initializer.register_rpc_fn("account_get", move |ctx, _logger, db, _module, _payload| {
            let store = Arc::clone(&store);
            async move {
                let user_id = ctx
                    .user_id()
                    .ok_or_else(|| RuntimeError::unauthenticated("Auth token required."))?;
                let account = store
                    .read()
                    .accounts
                    .get(user_id)
                    .cloned()
                    .ok_or_else(RuntimeError::account_not_found)?;
                let metadata = match db.load(METADATA_COLLECTION, user_id).await? {
                    Some(raw) => serde_json::from_slice(&raw)?,
                    None => Value::Object(Map::new()),
                };
                let body = serde_json::to_string(&AccountView { account, metadata })?;
                anyhow::Ok(body)
            }
        })?;

        let store = Arc::clone(&self.store);
        initializer.register_rpc_fn(
            "account_update_metadata",
            move |ctx, logger, db, _module, payload| {
                let store = Arc::clone(&store);
                async move {
                    let user_id = ctx
                        .user_id()
                        .ok_or_else(|| RuntimeError::unauthenticated("Auth token required."))?;
                    let known = store.read().accounts.contains_key(user_id);
                    if !known {
                        return Err(anyhow::Error::from(RuntimeError::account_not_found()));
                    }
                    let metadata: Map<String, Value> = serde_json::from_str(&payload)
                        .map_err(|_| RuntimeError::invalid_argument("metadata must be a JSON object"))?;
                    let raw = serde_json::to_vec(&metadata)?;
                    db.store(METADATA_COLLECTION, user_id, raw).await?;
                    logger
                        .with_field("user_id", user_id.to_string())
                        .debug(format_args!("updated metadata ({} keys)", metadata.len()));
                    anyhow::Ok(String::new())
                }
            },
        )?;
        logger.info(format_args!("providers: {:?}", self.capabilities()));
        Ok(())
    }

    async fn authenticate_custom(
        &self,
        _ctx: &RuntimeContext,
        logger: &Logger,
        id: &str,
        username: &str,
        create: bool,
    ) -> anyhow::Result<AuthOutcome> {
        validate_id(ProviderKind::Custom, id)?;
        self.resolve(logger, ProviderKind::Custom, id, username, create, None)
    }

    async fn authenticate_device(
        &self,
        _ctx: &RuntimeContext,
        logger: &Logger,
        id: &str,
        username: &str,
        create: bool,
    ) -> anyhow::Result<AuthOutcome> {
        validate_id(ProviderKind::Device, id)?;
        self.resolve(logger, ProviderKind::Device, id, username, create, None)
    }

    async fn authenticate_email(
        &self,
        _ctx: &RuntimeContext,
        logger: &Logger,
        email: &str,
        password: &str,
        username: &str,
        create: bool,
    ) -> anyhow::Result<AuthOutcome> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(RuntimeError::invalid_argument("Invalid email address.").into());
        }
        if password.is_empty() {
            return Err(RuntimeError::invalid_argument("Password is required.").into());
        }
        self.resolve(
            logger,
            ProviderKind::Email,
            &email,
            username,
            create,
            Some(password),
        )
    }

    async fn authenticate_apple(
        &self,
        _ctx: &RuntimeContext,
        logger: &Logger,
        token: &str,
        username: &str,
        create: bool,
    ) -> anyhow::Result<AuthOutcome> {
        self.authenticate_token(
            logger,
            ProviderKind::Apple,
            ProviderToken::Token(token),
            username,
            create,
        )
        .await
    }

    async fn authenticate_facebook(
        &self,
        _ctx: &RuntimeContext,
        logger: &Logger,
        token: &str,
        import_friends: bool,
        username: &str,
        create: bool,
    ) -> anyhow::Result<AuthOutcome> {
        if token.is_empty() {
            return Err(RuntimeError::invalid_argument("facebook token is required").into());
        }
        let identity = self
            .verify(ProviderKind::Facebook, ProviderToken::Token(token))
            .await?;
        let outcome = self.resolve(
            logger,
            ProviderKind::Facebook,
            &identity.subject,
            username,
            create,
            None,
        )?;
        if import_friends {
            let count = self.store.write().import_friends(
                ProviderKind::Facebook,
                &outcome.user_id,
                &identity.friend_ids,
            );
            logger
                .with_field("user_id", outcome.user_id.clone())
                .debug(format_args!("imported {count} facebook friends"));
        }
        Ok(outcome)
    }

    async fn authenticate_facebook_instant_game(
        &self,
        _ctx: &RuntimeContext,
        logger: &Logger,
        signed_player_info: &str,
        username: &str,
        create: bool,
    ) -> anyhow::Result<AuthOutcome> {
        self.authenticate_token(
            logger,
            ProviderKind::FacebookInstantGame,
            ProviderToken::Token(signed_player_info),
            username,
            create,
        )
        .await
    }

    async fn authenticate_game_center(
        &self,
        _ctx: &RuntimeContext,
        logger: &Logger,
        credentials: &GameCenterCredentials,
        username: &str,
        create: bool,
    ) -> anyhow::Result<AuthOutcome> {
        if credentials.player_id.is_empty() || credentials.bundle_id.is_empty() {
            return Err(
                RuntimeError::invalid_argument("game center player and bundle ids are required")
                    .into(),
            );
        }
        self.authenticate_token(
            logger,
            ProviderKind::GameCenter,
            ProviderToken::GameCenter(credentials),
            username,
            create,
        )
        .await
    }

    async fn authenticate_google(
        &self,
        _ctx: &RuntimeContext,
        logger: &Logger,
        token: &str,
        username: &str,
        create: bool,
    ) -> anyhow::Result<AuthOutcome> {
        self.authenticate_token(
            logger,
            ProviderKind::Google,
            ProviderToken::Token(token),
            username,
            create,
        )
        .await
    }

    async fn authenticate_steam(
        &self,
        _ctx: &RuntimeContext,
        logger: &Logger,
        token: &str,
        username: &str,
        create: bool,
    ) -> anyhow::Result<AuthOutcome> {
        self.authenticate_token(
            logger,
            ProviderKind::Steam,
            ProviderToken::Token(token),
            username,
            create,
        )
        .await
    }

    async fn authenticate_token_generate(
        &self,
        user_id: &str,
        username: &str,
        expiry: i64,
        vars: &HashMap<String, String>,
    ) -> anyhow::Result<SessionToken> {
        if user_id.is_empty() {
            return Err(RuntimeError::invalid_argument("user id is required").into());
        }
        Ok(self.sessions.issue(user_id, username, expiry, vars)?)
    }
}
