use bytes::{BufMut, Bytes, BytesMut};

use super::{AuthError, AuthPlugin, AuthPluginSpi, AuthStatus, Credentials, PluginRegistry, split_plugin_list};
use crate::{
    Result,
    common::{verbose, warn},
    exception::{ExceptionBuilder, codes},
    protocol::{buffer::ParameterBuffer, cnct, dpb},
    row::EncodeError,
};

/// Server keys clumplet tag listing the server plugins.
const TAG_KNOWN_PLUGINS: u8 = 2;

/// Max length of one `CNCT_specific_data` chunk, the sequence byte excluded.
const SPECIFIC_DATA_CHUNK: usize = 254;

/// Authentication state of one connection attempt.
///
/// Holds the requested plugins, narrowed by what the server offers, and the session of the
/// currently selected plugin.
#[derive(Debug)]
pub struct ClientAuthBlock {
    credentials: Credentials,
    requested: Vec<AuthPluginSpi>,
    providers: Vec<AuthPluginSpi>,
    server_plugins: Vec<String>,
    current: Option<Box<dyn AuthPlugin>>,
    auth_complete: bool,
    first_time: bool,
}

impl ClientAuthBlock {
    /// Create block for `plugin_list`, names unknown to `registry` are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoKnownPlugins`] if no requested plugin is registered.
    pub fn new(credentials: Credentials, plugin_list: &str, registry: &PluginRegistry) -> Result<Self> {
        let mut requested = vec![];
        for name in split_plugin_list(plugin_list) {
            match registry.get(name) {
                Some(spi) => requested.push(spi),
                None => warn!("no authentication plugin available with name {name}"),
            }
        }

        if requested.is_empty() {
            return Err(AuthError::NoKnownPlugins(plugin_list.to_owned()).into());
        }

        Ok(Self {
            credentials,
            providers: requested.clone(),
            requested,
            server_plugins: vec![],
            current: None,
            auth_complete: false,
            first_time: true,
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn is_auth_complete(&self) -> bool {
        self.auth_complete
    }

    pub fn set_auth_complete(&mut self, complete: bool) {
        self.auth_complete = complete;
    }

    pub fn is_first_time(&self) -> bool {
        self.first_time
    }

    pub fn set_first_time(&mut self, first_time: bool) {
        self.first_time = first_time;
    }

    pub fn has_plugin(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_plugin_name(&self) -> Option<&'static str> {
        self.current.as_ref().map(|p| p.name())
    }

    /// Comma separated names of the remaining plugins.
    pub fn plugin_names(&self) -> String {
        let mut names = String::new();
        for (i, spi) in self.providers.iter().enumerate() {
            if i != 0 {
                names.push(',');
            }
            names.push_str(spi.name());
        }
        names
    }

    /// Client data of the current plugin.
    pub fn client_data(&self) -> Option<&[u8]> {
        self.current.as_ref().and_then(|p| p.client_data())
    }

    /// Session key of the current plugin.
    pub fn session_key(&self) -> Option<&[u8]> {
        self.current.as_ref().and_then(|p| p.session_key())
    }

    /// Select the first plugin able to produce client data.
    ///
    /// Plugins returning [`AuthStatus::AuthContinue`] are dropped.
    pub fn authenticate_step0(&mut self) -> Result<()> {
        while let Some(&spi) = self.providers.first() {
            let mut plugin = spi.create();
            verbose!("trying authentication plugin {}", spi.name());
            match plugin.authenticate(&self.credentials).map_err(login_error)? {
                AuthStatus::AuthSuccess | AuthStatus::AuthMoreData => {
                    self.current = Some(plugin);
                    return Ok(());
                }
                AuthStatus::AuthContinue | AuthStatus::AuthFailed => {
                    self.providers.remove(0);
                }
            }
        }
        Ok(())
    }

    /// Restart plugin selection, narrowed to the plugins the server lists in `server_keys`.
    ///
    /// The remaining plugins follow the order declared by the server. Nothing changes while
    /// the current plugin is in the middle of an exchange.
    ///
    /// # Errors
    ///
    /// Returns `isc_login` if no requested plugin is offered by the server.
    pub fn reset_client(&mut self, server_keys: Option<&[u8]>) -> Result<()> {
        if let Some(keys) = server_keys {
            if self.current.as_ref().is_some_and(|p| p.has_server_data()) {
                return Ok(());
            }
            if let Some(list) = find_clumplet(keys, TAG_KNOWN_PLUGINS) {
                let list = String::from_utf8_lossy(list);
                self.server_plugins = split_plugin_list(&list).map(str::to_owned).collect();
            }
        }

        self.first_time = true;
        self.current = None;
        self.providers = self.requested.clone();

        if !self.server_plugins.is_empty() {
            let merged = self
                .server_plugins
                .iter()
                .filter_map(|name| self.requested.iter().find(|spi| spi.name() == name))
                .copied()
                .collect::<Vec<_>>();

            if merged.is_empty() {
                return Err(ExceptionBuilder::new()
                    .exception(codes::LOGIN)
                    .exception(codes::RANDOM)
                    .message_parameter("No matching plugins on server")
                    .into_error());
            }
            self.providers = merged;
        }
        Ok(())
    }

    /// Store server data in the current plugin.
    pub fn set_server_data(&mut self, data: Bytes) {
        match &mut self.current {
            Some(plugin) => plugin.set_server_data(data),
            None => verbose!("received server data without current plugin"),
        }
    }

    /// Switch to the plugin requested by the server.
    ///
    /// Plugins before it are dropped. Returns `false` if it is already current or not
    /// available.
    pub fn switch_plugin(&mut self, name: &str) -> bool {
        if self.current_plugin_name() == Some(name) {
            return false;
        }
        while let Some(&spi) = self.providers.first() {
            if spi.name() == name {
                self.current = Some(spi.create());
                return true;
            }
            self.providers.remove(0);
        }
        false
    }

    /// Advance the current plugin.
    ///
    /// # Errors
    ///
    /// Returns `isc_login` without current plugin, or the plugin error.
    pub fn authenticate(&mut self) -> Result<AuthStatus> {
        let Some(plugin) = &mut self.current else {
            return Err(ExceptionBuilder::new().exception(codes::LOGIN).into_error());
        };
        Ok(plugin.authenticate(&self.credentials)?)
    }

    /// Add authentication items to a database parameter block.
    ///
    /// The plugin name and list are only added the first time.
    pub fn fill_dpb(&mut self, pb: &mut ParameterBuffer) -> Result<()> {
        while let Some(&spi) = self.providers.first() {
            let mut plugin = match self.current.take_if(|p| p.name() == spi.name()) {
                Some(plugin) => plugin,
                None => spi.create(),
            };
            verbose!("trying authentication plugin {}", spi.name());
            match plugin.authenticate(&self.credentials).map_err(login_error)? {
                AuthStatus::AuthSuccess | AuthStatus::AuthMoreData => {
                    self.current = Some(plugin);
                    return self.extract_to_dpb(pb);
                }
                AuthStatus::AuthContinue | AuthStatus::AuthFailed => {
                    self.providers.remove(0);
                }
            }
        }
        Ok(())
    }

    fn extract_to_dpb(&mut self, pb: &mut ParameterBuffer) -> Result<()> {
        let Some(data) = self.client_data().filter(|d| !d.is_empty()).map(Bytes::copy_from_slice) else {
            return Ok(());
        };
        if self.first_time {
            if let Some(name) = self.current_plugin_name() {
                pb.string(dpb::AUTH_PLUGIN_NAME, name)?;
            }
            pb.string(dpb::AUTH_PLUGIN_LIST, &self.plugin_names())?;
            self.first_time = false;
        }
        pb.bytes(dpb::SPECIFIC_AUTH_DATA, &data)?;
        Ok(())
    }

    /// Write the user identification items of `op_connect`.
    ///
    /// # Errors
    ///
    /// An item longer than 255 bytes is [`EncodeError::Overflow`], client data is split
    /// into chunks instead.
    pub fn write_user_id(&self, buf: &mut BytesMut, os_user: &str, host: &str) -> Result<()> {
        if let Some(login) = self.credentials.login() {
            put_item(buf, cnct::LOGIN, login.as_bytes())?;
        }
        if let Some(name) = self.current_plugin_name() {
            put_item(buf, cnct::PLUGIN_NAME, name.as_bytes())?;
        }
        if !self.providers.is_empty() {
            put_item(buf, cnct::PLUGIN_LIST, self.plugin_names().as_bytes())?;
        }
        if let Some(data) = self.client_data() {
            let max = SPECIFIC_DATA_CHUNK * (usize::from(u8::MAX) + 1);
            if data.len() > max {
                return Err(EncodeError::Overflow { len: data.len(), max }.into());
            }
            for (seq, chunk) in data.chunks(SPECIFIC_DATA_CHUNK).enumerate() {
                buf.put_u8(cnct::SPECIFIC_DATA);
                buf.put_u8(chunk.len() as u8 + 1);
                buf.put_u8(seq as u8);
                buf.put_slice(chunk);
            }
        }

        buf.put_slice(&[cnct::CLIENT_CRYPT, 4]);
        buf.put_i32_le(cnct::WIRE_CRYPT_DISABLED);

        put_item(buf, cnct::USER, os_user.as_bytes())?;
        put_item(buf, cnct::HOST, host.as_bytes())?;
        buf.put_slice(&[cnct::USER_VERIFICATION, 0]);
        Ok(())
    }
}

fn login_error(err: AuthError) -> crate::Error {
    ExceptionBuilder::new().exception(codes::LOGIN).cause(err).into_error()
}

/// Write `[tag][len][bytes]`.
fn put_item(buf: &mut BytesMut, tag: u8, value: &[u8]) -> Result<(), EncodeError> {
    let len = u8::try_from(value.len())
        .map_err(|_| EncodeError::Overflow { len: value.len(), max: usize::from(u8::MAX) })?;
    buf.put_u8(tag);
    buf.put_u8(len);
    buf.put_slice(value);
    Ok(())
}

/// Find value of `tag` in untagged clumplet buffer, `[tag][len][bytes]` repeated.
fn find_clumplet(mut data: &[u8], tag: u8) -> Option<&[u8]> {
    while let [item, len, rest @ ..] = data {
        let len = usize::from(*len);
        let value = rest.get(..len)?;
        if *item == tag {
            return Some(value);
        }
        data = &rest[len..];
    }
    None
}

/// Normalize login the way the server does.
///
/// A login enclosed in double quotes is taken as is, with `""` unescaped to `"`. A single quote
/// inside ends the login. Any other login is upper cased.
pub fn normalize_login(login: &str) -> String {
    if login.len() > 2 && login.starts_with('"') && login.ends_with('"') {
        let inner = &login[1..login.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c != '"' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('"') => out.push('"'),
                _ => break,
            }
        }
        return out;
    }
    login.to_uppercase()
}
