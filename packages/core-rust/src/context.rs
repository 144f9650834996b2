use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Closed vocabulary of keys the host may inject into a [`RuntimeContext`].
///
/// Hosts may add keys in later versions but never remove or repurpose one,
/// so the string form of each variant is a stable contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextKey {
    /// Deployment environment variables visible to the module.
    Env,
    /// Code path that triggered the call.
    ExecutionMode,
    /// Identifier of the serving node.
    Node,
    /// Inbound transport headers.
    Headers,
    /// Inbound query-string parameters.
    QueryParams,
    /// Authenticated caller's identity.
    UserId,
    /// Authenticated caller's display name.
    Username,
    /// Session variables.
    Vars,
    /// Unix timestamp at which the current session expires.
    UserSessionExp,
    /// Opaque session identifier.
    SessionId,
    /// Caller's negotiated locale.
    Lang,
    /// Caller's network address.
    ClientIp,
    /// Caller's network port.
    ClientPort,
}

impl ContextKey {
    /// Every key, in declaration order.
    pub const ALL: [ContextKey; 13] = [
        ContextKey::Env,
        ContextKey::ExecutionMode,
        ContextKey::Node,
        ContextKey::Headers,
        ContextKey::QueryParams,
        ContextKey::UserId,
        ContextKey::Username,
        ContextKey::Vars,
        ContextKey::UserSessionExp,
        ContextKey::SessionId,
        ContextKey::Lang,
        ContextKey::ClientIp,
        ContextKey::ClientPort,
    ];

    /// The wire name of this key.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ContextKey::Env => "env",
            ContextKey::ExecutionMode => "execution_mode",
            ContextKey::Node => "node",
            ContextKey::Headers => "headers",
            ContextKey::QueryParams => "query_params",
            ContextKey::UserId => "user_id",
            ContextKey::Username => "username",
            ContextKey::Vars => "vars",
            ContextKey::UserSessionExp => "user_session_exp",
            ContextKey::SessionId => "session_id",
            ContextKey::Lang => "lang",
            ContextKey::ClientIp => "client_ip",
            ContextKey::ClientPort => "client_port",
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a string that is not a known [`ContextKey`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown context key: {0}")]
pub struct UnknownContextKey(pub String);

impl FromStr for ContextKey {
    type Err = UnknownContextKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContextKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownContextKey(s.to_string()))
    }
}

/// The code path that triggered a module invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// Module initialization at load time.
    RunOnce,
    /// A registered RPC handler.
    Rpc,
    /// An authentication provider method.
    Authentication,
    /// A scheduled host task.
    Scheduled,
}

impl ExecutionMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::RunOnce => "run_once",
            ExecutionMode::Rpc => "rpc",
            ExecutionMode::Authentication => "authentication",
            ExecutionMode::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Borrowed view of a single context entry, used for generic host-side
/// inspection. Modules normally use the typed accessors instead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ContextValue<'a> {
    Str(&'a str),
    Int(i64),
    Map(&'a HashMap<String, String>),
    MultiMap(&'a HashMap<String, Vec<String>>),
    Mode(ExecutionMode),
}

#[derive(Debug, Default)]
struct ContextData {
    env: HashMap<String, String>,
    execution_mode: Option<ExecutionMode>,
    node: Option<String>,
    headers: HashMap<String, Vec<String>>,
    query_params: HashMap<String, Vec<String>>,
    user_id: Option<String>,
    username: Option<String>,
    vars: HashMap<String, String>,
    user_session_exp: Option<i64>,
    session_id: Option<String>,
    lang: Option<String>,
    client_ip: Option<String>,
    client_port: Option<String>,
}

/// Immutable per-call key/value bag handed to every module invocation.
///
/// Built by the host through [`RuntimeContextBuilder`]; modules only read it.
/// Cloning is cheap and shares the underlying data, so a module may pass it to
/// tasks it spawns within the same call.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    data: Arc<ContextData>,
    cancel: CancellationToken,
}

impl RuntimeContext {
    #[must_use]
    pub fn builder() -> RuntimeContextBuilder {
        RuntimeContextBuilder::default()
    }

    /// Environment variables exposed to modules. Always present, possibly empty.
    #[must_use]
    pub fn env(&self) -> &HashMap<String, String> {
        &self.data.env
    }

    #[must_use]
    pub fn execution_mode(&self) -> Option<ExecutionMode> {
        self.data.execution_mode
    }

    #[must_use]
    pub fn node(&self) -> Option<&str> {
        self.data.node.as_deref()
    }

    #[must_use]
    pub fn headers(&self) -> &HashMap<String, Vec<String>> {
        &self.data.headers
    }

    #[must_use]
    pub fn query_params(&self) -> &HashMap<String, Vec<String>> {
        &self.data.query_params
    }

    /// Authenticated caller, `None` for unauthenticated or server-to-server calls.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.data.user_id.as_deref()
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.data.username.as_deref()
    }

    #[must_use]
    pub fn vars(&self) -> &HashMap<String, String> {
        &self.data.vars
    }

    #[must_use]
    pub fn user_session_exp(&self) -> Option<i64> {
        self.data.user_session_exp
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.data.session_id.as_deref()
    }

    #[must_use]
    pub fn lang(&self) -> Option<&str> {
        self.data.lang.as_deref()
    }

    #[must_use]
    pub fn client_ip(&self) -> Option<&str> {
        self.data.client_ip.as_deref()
    }

    #[must_use]
    pub fn client_port(&self) -> Option<&str> {
        self.data.client_port.as_deref()
    }

    /// Cancellation signal for the call. Modules may watch it; the host owns it.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Look up an entry by key. Map-valued keys (`env`, `headers`,
    /// `query_params`, `vars`) are always present.
    #[must_use]
    pub fn get(&self, key: ContextKey) -> Option<ContextValue<'_>> {
        let d = &*self.data;
        match key {
            ContextKey::Env => Some(ContextValue::Map(&d.env)),
            ContextKey::ExecutionMode => d.execution_mode.map(ContextValue::Mode),
            ContextKey::Node => d.node.as_deref().map(ContextValue::Str),
            ContextKey::Headers => Some(ContextValue::MultiMap(&d.headers)),
            ContextKey::QueryParams => Some(ContextValue::MultiMap(&d.query_params)),
            ContextKey::UserId => d.user_id.as_deref().map(ContextValue::Str),
            ContextKey::Username => d.username.as_deref().map(ContextValue::Str),
            ContextKey::Vars => Some(ContextValue::Map(&d.vars)),
            ContextKey::UserSessionExp => d.user_session_exp.map(ContextValue::Int),
            ContextKey::SessionId => d.session_id.as_deref().map(ContextValue::Str),
            ContextKey::Lang => d.lang.as_deref().map(ContextValue::Str),
            ContextKey::ClientIp => d.client_ip.as_deref().map(ContextValue::Str),
            ContextKey::ClientPort => d.client_port.as_deref().map(ContextValue::Str),
        }
    }

    #[must_use]
    pub fn contains(&self, key: ContextKey) -> bool {
        self.get(key).is_some()
    }

    /// Keys present in this context, in [`ContextKey::ALL`] order.
    #[must_use]
    pub fn keys(&self) -> Vec<ContextKey> {
        ContextKey::ALL
            .into_iter()
            .filter(|k| self.contains(*k))
            .collect()
    }
}

/// Host-side builder for [`RuntimeContext`].
#[derive(Debug, Default)]
pub struct RuntimeContextBuilder {
    data: ContextData,
    cancel: Option<CancellationToken>,
}

impl RuntimeContextBuilder {
    #[must_use]
    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.data.env = env;
        self
    }

    #[must_use]
    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.data.execution_mode = Some(mode);
        self
    }

    #[must_use]
    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.data.node = Some(node.into());
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: HashMap<String, Vec<String>>) -> Self {
        self.data.headers = headers;
        self
    }

    #[must_use]
    pub fn query_params(mut self, params: HashMap<String, Vec<String>>) -> Self {
        self.data.query_params = params;
        self
    }

    #[must_use]
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.data.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.data.username = Some(username.into());
        self
    }

    #[must_use]
    pub fn vars(mut self, vars: HashMap<String, String>) -> Self {
        self.data.vars = vars;
        self
    }

    #[must_use]
    pub fn user_session_exp(mut self, exp: i64) -> Self {
        self.data.user_session_exp = Some(exp);
        self
    }

    #[must_use]
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.data.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.data.lang = Some(lang.into());
        self
    }

    #[must_use]
    pub fn client_ip(mut self, ip: impl Into<String>) -> Self {
        self.data.client_ip = Some(ip.into());
        self
    }

    #[must_use]
    pub fn client_port(mut self, port: impl Into<String>) -> Self {
        self.data.client_port = Some(port.into());
        self
    }

    /// Attach a cancellation token owned by the host. A fresh one is created otherwise.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Drop every caller-identity entry. Used for authentication calls that
    /// are establishing identity for the first time.
    #[must_use]
    pub fn without_identity(mut self) -> Self {
        self.data.user_id = None;
        self.data.username = None;
        self.data.vars.clear();
        self.data.user_session_exp = None;
        self.data.session_id = None;
        self
    }

    #[must_use]
    pub fn build(self) -> RuntimeContext {
        RuntimeContext {
            data: Arc::new(self.data),
            cancel: self.cancel.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_names_round_trip_through_from_str() {
        for key in ContextKey::ALL {
            assert_eq!(key.as_str().parse::<ContextKey>().unwrap(), key);
        }
        assert_eq!(ContextKey::UserSessionExp.to_string(), "user_session_exp");
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = "userid".parse::<ContextKey>().unwrap_err();
        assert_eq!(err, UnknownContextKey("userid".to_string()));
    }

    #[test]
    fn empty_context_has_only_map_keys() {
        let ctx = RuntimeContext::builder().build();
        assert_eq!(
            ctx.keys(),
            vec![
                ContextKey::Env,
                ContextKey::Headers,
                ContextKey::QueryParams,
                ContextKey::Vars
            ]
        );
        assert!(ctx.user_id().is_none());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn builder_populates_typed_accessors() {
        let ctx = RuntimeContext::builder()
            .node("node-1")
            .execution_mode(ExecutionMode::Rpc)
            .user_id("u-1")
            .username("alice")
            .user_session_exp(1_700_000_000)
            .client_ip("10.0.0.1")
            .client_port("5555")
            .lang("en")
            .build();

        assert_eq!(ctx.node(), Some("node-1"));
        assert_eq!(ctx.execution_mode(), Some(ExecutionMode::Rpc));
        assert_eq!(ctx.user_id(), Some("u-1"));
        assert_eq!(ctx.username(), Some("alice"));
        assert_eq!(ctx.get(ContextKey::UserSessionExp), Some(ContextValue::Int(1_700_000_000)));
        assert_eq!(ctx.client_ip(), Some("10.0.0.1"));
        assert_eq!(ctx.client_port(), Some("5555"));
        assert_eq!(ctx.lang(), Some("en"));
    }

    #[test]
    fn without_identity_strips_caller_fields() {
        let mut vars = HashMap::new();
        vars.insert("k".to_string(), "v".to_string());
        let ctx = RuntimeContext::builder()
            .node("n")
            .user_id("u")
            .username("name")
            .session_id("s")
            .vars(vars)
            .without_identity()
            .build();

        assert!(!ctx.contains(ContextKey::UserId));
        assert!(!ctx.contains(ContextKey::Username));
        assert!(!ctx.contains(ContextKey::SessionId));
        assert!(ctx.vars().is_empty());
        assert_eq!(ctx.node(), Some("n"));
    }

    #[test]
    fn clones_share_cancellation() {
        let token = CancellationToken::new();
        let ctx = RuntimeContext::builder().cancellation(token.clone()).build();
        let copy = ctx.clone();
        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(copy.is_cancelled());
    }
}
