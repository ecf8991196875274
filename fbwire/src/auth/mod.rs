//! Authentication plugins.
//!
//! A plugin drives a short challenge response exchange:
//!
//! ```text
//! ┏━━━━━━━━━┓ credentials ┏━━━━━━━━━━━━━━━━┓ server data ┏━━━━━━━━━━━━━━━┓
//! ┃  Init   ┃ ──────────▶ ┃ AuthMoreData   ┃ ──────────▶ ┃ AuthSuccess   ┃
//! ┗━━━━━━━━━┛             ┗━━━━━━━━━━━━━━━━┛             ┗━━━━━━━━━━━━━━━┛
//! ```
//!
//! Without credentials a plugin returns [`AuthStatus::AuthContinue`] and the next plugin is
//! tried. [`PluginRegistry`] maps plugin names to factories, [`ClientAuthBlock`] holds the state
//! of one connection attempt.
use bytes::Bytes;
use std::fmt;

mod block;
mod legacy;
mod srp;

pub use block::{ClientAuthBlock, normalize_login};
pub use legacy::{LEGACY_AUTH, LegacyAuth, crypt, legacy_hash};
pub use srp::{SrpClient, SrpHash};

#[cfg(test)]
pub(crate) use srp::test::SrpServer;

/// Plugins requested when none are configured.
pub const DEFAULT_AUTH_PLUGINS: &str = "Srp256,Srp";

/// Result of an authentication step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStatus {
    /// Client data is final.
    AuthSuccess,
    /// Client data sent, server reply required.
    AuthMoreData,
    /// Plugin can not authenticate with the available credentials, try the next one.
    AuthContinue,
    AuthFailed,
}

/// Login and password of one connection attempt.
#[derive(Clone)]
pub struct Credentials {
    login: Option<String>,
    normalized_login: Option<String>,
    password: Option<String>,
}

impl Credentials {
    pub fn new(login: Option<String>, password: Option<String>) -> Self {
        let normalized_login = login.as_deref().map(normalize_login);
        Self { login, normalized_login, password }
    }

    /// Login as given.
    pub fn login(&self) -> Option<&str> {
        self.login.as_deref()
    }

    /// Login as seen by the server, see [`normalize_login`].
    pub fn normalized_login(&self) -> Option<&str> {
        self.normalized_login.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// An authentication session.
///
/// One instance serves a single connection attempt, key material is never reused.
pub trait AuthPlugin: Send + fmt::Debug {
    /// Plugin name as known by the server.
    fn name(&self) -> &'static str;

    /// Advance the exchange.
    fn authenticate(&mut self, credentials: &Credentials) -> Result<AuthStatus, AuthError>;

    /// Data to send to the server, if any.
    fn client_data(&self) -> Option<&[u8]>;

    /// Store data received from the server.
    fn set_server_data(&mut self, data: Bytes);

    /// Returns `true` if non empty server data was received.
    fn has_server_data(&self) -> bool;

    /// Shared key derived by the exchange, if the plugin produces one.
    fn session_key(&self) -> Option<&[u8]>;
}

/// Plugin descriptor, creates fresh [`AuthPlugin`] sessions.
#[derive(Clone, Copy)]
pub struct AuthPluginSpi {
    name: &'static str,
    create: fn() -> Box<dyn AuthPlugin>,
}

impl AuthPluginSpi {
    pub const fn new(name: &'static str, create: fn() -> Box<dyn AuthPlugin>) -> Self {
        Self { name, create }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Create new session.
    pub fn create(&self) -> Box<dyn AuthPlugin> {
        (self.create)()
    }
}

impl fmt::Debug for AuthPluginSpi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AuthPluginSpi").field(&self.name).finish()
    }
}

/// Name to plugin registry.
#[derive(Clone, Debug)]
pub struct PluginRegistry {
    plugins: Vec<AuthPluginSpi>,
}

impl Default for PluginRegistry {
    /// `Legacy_Auth` and every SRP variant.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(AuthPluginSpi::new(LEGACY_AUTH, || Box::new(LegacyAuth::default())));
        for hash in SrpHash::ALL {
            registry.register(AuthPluginSpi::new(hash.plugin_name(), hash.factory()));
        }
        registry
    }
}

impl PluginRegistry {
    /// Registry without any plugin.
    pub fn empty() -> Self {
        Self { plugins: vec![] }
    }

    /// Add plugin, replacing one with the same name.
    pub fn register(&mut self, spi: AuthPluginSpi) {
        match self.plugins.iter_mut().find(|p| p.name == spi.name) {
            Some(existing) => *existing = spi,
            None => self.plugins.push(spi),
        }
    }

    /// Find plugin by name.
    pub fn get(&self, name: &str) -> Option<AuthPluginSpi> {
        self.plugins.iter().find(|p| p.name == name).copied()
    }

    /// Iterate registered plugin names.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.plugins.iter().map(|p| p.name)
    }
}

/// Split plugin list on space, tab, comma and semicolon.
pub fn split_plugin_list(list: &str) -> impl Iterator<Item = &str> {
    list.split([' ', '\t', ',', ';']).filter(|s| !s.is_empty())
}

/// An error from authentication plugin.
pub enum AuthError {
    /// Hash algorithm is not supported.
    UnsupportedHash(String),
    /// Plugin asked to authenticate again after the exchange completed.
    SyncFailure,
    /// Server data can not be decoded.
    MalformedServerData(&'static str),
    /// None of the requested plugins is registered.
    NoKnownPlugins(String),
}

impl std::error::Error for AuthError { }

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedHash(name) => write!(f, "Unsupported hash algorithm {name}"),
            Self::SyncFailure => f.write_str("Authentication sync failure, session key already generated"),
            Self::MalformedServerData(reason) => write!(f, "Malformed server auth data: {reason}"),
            Self::NoKnownPlugins(list) => write!(f, "No known authentication plugins, requested: {list}"),
        }
    }
}

impl fmt::Debug for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
