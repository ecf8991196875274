//! Connection establishment and protocol negotiation.
//!
//! A [`Connection`] is the socket before the server accepted a protocol version, once
//! [`Connection::identify`] succeeds it becomes a [`Database`] ready to attach.
use bytes::BytesMut;
use std::env::var;

use crate::{
    Database, Result,
    auth::ClientAuthBlock,
    common::{verbose, warn},
    exception::{ExceptionBuilder, codes},
    net::Socket,
    protocol::{
        BackendMessage, ProtocolDescriptor, ProtocolError, backend::{AcceptData, Response}, frontend, op,
    },
    stream::WireStream,
};

pub mod config;
mod fatal;

pub use config::{Config, ParseError};
pub use fatal::FatalErrors;

/// Socket connected to the server, protocol not negotiated yet.
pub struct Connection {
    stream: WireStream,
    config: Config,
}

impl Connection {
    /// Open tcp socket to the configured server.
    pub async fn connect(config: Config) -> Result<Connection> {
        verbose!("connect to {}:{}", config.host(), config.port());
        let socket = Socket::connect_tcp(config.host(), config.port(), config.connect_timeout()).await?;
        Ok(Self::with_socket(socket, config))
    }

    /// Connect using [`Config::from_env`].
    pub async fn connect_env() -> Result<Connection> {
        Self::connect(Config::from_env()).await
    }

    pub(crate) fn with_socket(socket: Socket, config: Config) -> Connection {
        let stream = WireStream::new(socket, config.socket_timeout());
        Self { stream, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Send `op_connect` and negotiate protocol version and authentication.
    ///
    /// # Errors
    ///
    /// Returns `connect_reject` if the server rejects every offered protocol, or `login` if
    /// authentication fails. The socket is closed on error.
    pub async fn identify(mut self) -> Result<Database> {
        verbose!("identify");
        match self.negotiate().await {
            Ok((descriptor, auth)) => Ok(Database::new(self.stream, descriptor, Some(auth), self.config)),
            Err(err) => {
                if let Err(_err) = self.stream.shutdown().await {
                    warn!("failed to close socket: {_err}");
                }
                Err(err)
            }
        }
    }

    async fn negotiate(&mut self) -> Result<(ProtocolDescriptor, ClientAuthBlock)> {
        let config = &self.config;
        let stream = &mut self.stream;

        let mut auth = ClientAuthBlock::new(config.credentials(), &config.auth_plugins, &config.plugins)?;
        auth.authenticate_step0()?;

        let mut user_id = BytesMut::new();
        auth.write_user_id(&mut user_id, &os_user(), &hostname())?;

        stream.send(frontend::Connect {
            database: &config.database,
            user_id: &user_id,
            protocols: &config.protocols,
        })?;
        stream.flush().await?;

        loop {
            match BackendMessage::read(stream).await? {
                BackendMessage::CryptKeyCallback(_) => {
                    verbose!("crypt key callback before accept");
                    stream.send(frontend::CryptKeyCallback { data: &[] })?;
                    stream.flush().await?;
                }
                BackendMessage::Accept(accept) => {
                    let descriptor = *config.protocols.select(accept.version, accept.architecture, accept.ptype)?;
                    verbose!(
                        "accepted protocol {} ptype {}",
                        descriptor.revision().number(),
                        accept.ptype
                    );

                    match accept.auth {
                        Some(data) => {
                            auth.set_server_data(data.data.clone());
                            auth.set_auth_complete(data.authenticated);
                            auth.reset_client(Some(&data.keys))?;
                            auth.switch_plugin(&data.plugin);

                            if accept.operation == op::COND_ACCEPT {
                                auth_receive_response(stream, &mut auth, Some(data)).await?;
                            }
                        }
                        None => auth.reset_client(None)?,
                    }
                    return Ok((descriptor, auth));
                }
                BackendMessage::Response(response) => {
                    response.into_result()?;
                    return Err(reject());
                }
                BackendMessage::Reject => return Err(reject()),
                _other => {
                    verbose!("unexpected {} during connect", _other.name());
                    return Err(reject());
                }
            }
        }
    }
}

fn reject() -> crate::Error {
    ExceptionBuilder::new().exception(codes::CONNECT_REJECT).into_error()
}

fn os_user() -> String {
    var("USER").or_else(|_| var("USERNAME")).unwrap_or_default()
}

fn hostname() -> String {
    var("HOSTNAME").or_else(|_| var("COMPUTERNAME")).unwrap_or_default()
}

/// Run the `op_cont_auth` exchange until the server answers with `op_response`.
///
/// `accept` carries the plugin data of `op_cond_accept`, used as the first server message.
pub(crate) async fn auth_receive_response(
    stream: &mut WireStream,
    auth: &mut ClientAuthBlock,
    mut accept: Option<AcceptData>,
) -> Result<Response> {
    loop {
        let (data, mut plugin) = match accept.take() {
            Some(accept) => (accept.data, accept.plugin),
            None => match BackendMessage::read(stream).await? {
                BackendMessage::Response(response) => {
                    auth.set_auth_complete(true);
                    return response.into_result();
                }
                BackendMessage::ContAuth(cont) => (cont.data, cont.plugin),
                BackendMessage::CryptKeyCallback(_) => {
                    stream.send(frontend::CryptKeyCallback { data: &[] })?;
                    stream.flush().await?;
                    continue;
                }
                BackendMessage::TrustedAuth => {
                    return Err(ExceptionBuilder::new()
                        .exception(codes::FEATURE_UNSUPPORTED)
                        .message_parameter("trusted authentication")
                        .message_parameter("any")
                        .into_error());
                }
                other => {
                    return Err(ProtocolError::unexpected_phase(other.operation(), "authentication").into());
                }
            },
        };

        if auth.current_plugin_name() == Some(plugin.as_str()) {
            plugin.clear();
        }
        if !plugin.is_empty() && !auth.switch_plugin(&plugin) {
            verbose!("server requested unavailable plugin {plugin}");
            break;
        }
        if !auth.has_plugin() {
            break;
        }

        auth.set_server_data(data);
        let _status = auth.authenticate()?;
        verbose!("authentication status {_status:?}");

        let plugin_list = match auth.is_first_time() {
            true => auth.plugin_names(),
            false => String::new(),
        };
        stream.send(frontend::ContAuth {
            data: auth.client_data().unwrap_or_default(),
            plugin_name: auth.current_plugin_name().unwrap_or_default(),
            plugin_list: &plugin_list,
            keys: &[],
        })?;
        auth.set_first_time(false);
        stream.flush().await?;
    }

    Err(ExceptionBuilder::new().exception(codes::LOGIN).into_error())
}
