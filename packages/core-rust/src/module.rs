//! The module entity a host loads, and its authentication provider surface.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::RuntimeContext;
use crate::database::DbHandle;
use crate::error::RuntimeError;
use crate::initializer::Initializer;
use crate::logger::Logger;

/// Identity provider kinds a module may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Custom,
    Device,
    Email,
    Apple,
    Facebook,
    #[serde(rename = "facebookinstantgame")]
    FacebookInstantGame,
    #[serde(rename = "gamecenter")]
    GameCenter,
    Google,
    Steam,
    /// Session minting from an already-resolved identity.
    TokenGenerate,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 10] = [
        ProviderKind::Custom,
        ProviderKind::Device,
        ProviderKind::Email,
        ProviderKind::Apple,
        ProviderKind::Facebook,
        ProviderKind::FacebookInstantGame,
        ProviderKind::GameCenter,
        ProviderKind::Google,
        ProviderKind::Steam,
        ProviderKind::TokenGenerate,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Custom => "custom",
            ProviderKind::Device => "device",
            ProviderKind::Email => "email",
            ProviderKind::Apple => "apple",
            ProviderKind::Facebook => "facebook",
            ProviderKind::FacebookInstantGame => "facebookinstantgame",
            ProviderKind::GameCenter => "gamecenter",
            ProviderKind::Google => "google",
            ProviderKind::Steam => "steam",
            ProviderKind::TokenGenerate => "token_generate",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| RuntimeError::invalid_argument(format!("unknown provider: {s}")))
    }
}

/// Apple Game Center signed-session material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameCenterCredentials {
    pub player_id: String,
    pub bundle_id: String,
    /// Unix timestamp in seconds at which the signature was produced.
    pub timestamp: i64,
    pub salt: String,
    pub signature: String,
    pub public_key_url: String,
}

/// Provider-specific identity material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum Credentials {
    Custom { id: String },
    Device { id: String },
    Email { email: String, password: String },
    Apple { token: String },
    Facebook {
        token: String,
        #[serde(default)]
        import_friends: bool,
    },
    #[serde(rename = "facebookinstantgame")]
    FacebookInstantGame { signed_player_info: String },
    #[serde(rename = "gamecenter")]
    GameCenter(GameCenterCredentials),
    Google { token: String },
    Steam { token: String },
}

impl Credentials {
    #[must_use]
    pub fn kind(&self) -> ProviderKind {
        match self {
            Credentials::Custom { .. } => ProviderKind::Custom,
            Credentials::Device { .. } => ProviderKind::Device,
            Credentials::Email { .. } => ProviderKind::Email,
            Credentials::Apple { .. } => ProviderKind::Apple,
            Credentials::Facebook { .. } => ProviderKind::Facebook,
            Credentials::FacebookInstantGame { .. } => ProviderKind::FacebookInstantGame,
            Credentials::GameCenter(_) => ProviderKind::GameCenter,
            Credentials::Google { .. } => ProviderKind::Google,
            Credentials::Steam { .. } => ProviderKind::Steam,
        }
    }
}

/// Identity resolved by an authentication call.
///
/// `username` may differ from the one requested; callers must use this value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthOutcome {
    pub user_id: String,
    pub username: String,
    pub created: bool,
}

/// A minted session artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub token: String,
    /// Unix timestamp in seconds.
    pub expires_at: i64,
}

/// Configuration handed to a module's init entry point.
#[derive(Debug, Clone, Default)]
pub struct ModuleConfig {
    pub name: String,
    pub env: HashMap<String, String>,
    pub params: BTreeMap<String, String>,
}

/// Shared reference to a loaded module.
pub type ModuleRef = Arc<dyn LinnaModule>;

fn unsupported(kind: ProviderKind) -> anyhow::Error {
    RuntimeError::unimplemented(format!("{kind} authentication is not supported")).into()
}

/// An extension module.
///
/// Every provider method has a default that fails with `Unimplemented`;
/// a module overrides the ones it supports and reports them from
/// [`supports`](LinnaModule::supports) so the host can detect them before
/// dispatch.
///
/// All provider methods share the `create` semantics: with `create = true` a
/// missing account is created (`created = true`) and an existing one returned
/// (`created = false`); with `create = false` a missing account fails with
/// [`RuntimeError::account_not_found`]. An error means no session must be
/// established, and a failed call must leave no partial state behind.
#[async_trait]
pub trait LinnaModule: Send + Sync + 'static {
    /// Name used in host logs.
    fn name(&self) -> &str;

    /// Whether the module implements the given provider.
    fn supports(&self, _kind: ProviderKind) -> bool {
        false
    }

    /// Every provider this module implements.
    fn capabilities(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|k| self.supports(*k))
            .collect()
    }

    /// Load-time entry point. Called exactly once; an error aborts loading.
    ///
    /// # Errors
    ///
    /// Any error aborts loading this module.
    fn init(
        &self,
        _ctx: &RuntimeContext,
        _logger: &Logger,
        _db: &DbHandle,
        _config: &ModuleConfig,
        _initializer: &mut dyn Initializer,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn authenticate_custom(
        &self,
        _ctx: &RuntimeContext,
        _logger: &Logger,
        _id: &str,
        _username: &str,
        _create: bool,
    ) -> anyhow::Result<AuthOutcome> {
        Err(unsupported(ProviderKind::Custom))
    }

    async fn authenticate_device(
        &self,
        _ctx: &RuntimeContext,
        _logger: &Logger,
        _id: &str,
        _username: &str,
        _create: bool,
    ) -> anyhow::Result<AuthOutcome> {
        Err(unsupported(ProviderKind::Device))
    }

    async fn authenticate_email(
        &self,
        _ctx: &RuntimeContext,
        _logger: &Logger,
        _email: &str,
        _password: &str,
        _username: &str,
        _create: bool,
    ) -> anyhow::Result<AuthOutcome> {
        Err(unsupported(ProviderKind::Email))
    }

    async fn authenticate_apple(
        &self,
        _ctx: &RuntimeContext,
        _logger: &Logger,
        _token: &str,
        _username: &str,
        _create: bool,
    ) -> anyhow::Result<AuthOutcome> {
        Err(unsupported(ProviderKind::Apple))
    }

    async fn authenticate_facebook(
        &self,
        _ctx: &RuntimeContext,
        _logger: &Logger,
        _token: &str,
        _import_friends: bool,
        _username: &str,
        _create: bool,
    ) -> anyhow::Result<AuthOutcome> {
        Err(unsupported(ProviderKind::Facebook))
    }

    /// The module verifies the signed player info itself.
    async fn authenticate_facebook_instant_game(
        &self,
        _ctx: &RuntimeContext,
        _logger: &Logger,
        _signed_player_info: &str,
        _username: &str,
        _create: bool,
    ) -> anyhow::Result<AuthOutcome> {
        Err(unsupported(ProviderKind::FacebookInstantGame))
    }

    async fn authenticate_game_center(
        &self,
        _ctx: &RuntimeContext,
        _logger: &Logger,
        _credentials: &GameCenterCredentials,
        _username: &str,
        _create: bool,
    ) -> anyhow::Result<AuthOutcome> {
        Err(unsupported(ProviderKind::GameCenter))
    }

    async fn authenticate_google(
        &self,
        _ctx: &RuntimeContext,
        _logger: &Logger,
        _token: &str,
        _username: &str,
        _create: bool,
    ) -> anyhow::Result<AuthOutcome> {
        Err(unsupported(ProviderKind::Google))
    }

    async fn authenticate_steam(
        &self,
        _ctx: &RuntimeContext,
        _logger: &Logger,
        _token: &str,
        _username: &str,
        _create: bool,
    ) -> anyhow::Result<AuthOutcome> {
        Err(unsupported(ProviderKind::Steam))
    }

    /// Mint a session for an already-resolved identity.
    ///
    /// `expiry <= 0` selects the host default; a positive value is a lifetime
    /// in seconds. No identity resolution happens here.
    async fn authenticate_token_generate(
        &self,
        _user_id: &str,
        _username: &str,
        _expiry: i64,
        _vars: &HashMap<String, String>,
    ) -> anyhow::Result<SessionToken> {
        Err(unsupported(ProviderKind::TokenGenerate))
    }
}

/// Route identity material to the matching provider method of `module`.
///
/// # Errors
///
/// Fails with `Unimplemented` when the module does not advertise the
/// provider, otherwise with whatever the provider method returns.
pub async fn authenticate(
    module: &dyn LinnaModule,
    ctx: &RuntimeContext,
    logger: &Logger,
    credentials: &Credentials,
    username: &str,
    create: bool,
) -> anyhow::Result<AuthOutcome> {
    let kind = credentials.kind();
    if !module.supports(kind) {
        return Err(unsupported(kind));
    }
    match credentials {
        Credentials::Custom { id } => {
            module.authenticate_custom(ctx, logger, id, username, create).await
        }
        Credentials::Device { id } => {
            module.authenticate_device(ctx, logger, id, username, create).await
        }
        Credentials::Email { email, password } => {
            module
                .authenticate_email(ctx, logger, email, password, username, create)
                .await
        }
        Credentials::Apple { token } => {
            module.authenticate_apple(ctx, logger, token, username, create).await
        }
        Credentials::Facebook {
            token,
            import_friends,
        } => {
            module
                .authenticate_facebook(ctx, logger, token, *import_friends, username, create)
                .await
        }
        Credentials::FacebookInstantGame { signed_player_info } => {
            module
                .authenticate_facebook_instant_game(ctx, logger, signed_player_info, username, create)
                .await
        }
        Credentials::GameCenter(gc) => {
            module
                .authenticate_game_center(ctx, logger, gc, username, create)
                .await
        }
        Credentials::Google { token } => {
            module.authenticate_google(ctx, logger, token, username, create).await
        }
        Credentials::Steam { token } => {
            module.authenticate_steam(ctx, logger, token, username, create).await
        }
    }
}
