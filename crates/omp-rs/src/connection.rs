// Copyright (C) 2025 Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

/// OMP client connection and operations
use crate::codec::encode_request;
use crate::config::ClientOptions;
use crate::error::{OmpError, Result};
use crate::message::{Element, RequestNode};
use crate::ops::{
    AgentOptions, CredentialOptions, GroupOptions, PermissionOptions, PortListOptions, PortRangeOptions,
    TargetOptions, authenticate_request, create_agent_request, create_credential_request, create_group_request,
    create_permission_request, create_port_list_request, create_port_range_request, create_target_request,
    get_targets_request, get_version_request,
};
use crate::pipeline::{self, Continuation, PendingCommand};
use crate::response::{self, Created, Targets};
use crate::session::{SessionState, User};
use crate::transport;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

#[derive(Clone)]
struct Connection {
    commands: mpsc::UnboundedSender<PendingCommand>,
    state: watch::Receiver<SessionState>,
}

/// Main OMP client
///
/// Cloning is cheap and every clone submits into the same ordered pipeline,
/// so clones can be moved into concurrent tasks.
#[derive(Clone)]
pub struct OmpClient {
    options: ClientOptions,
    connection: Option<Connection>,
}

impl OmpClient {
    /// Create an unconnected client. Commands fail with `NotConnected` until `connect` succeeds.
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            connection: None,
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Connect to the configured manager
    ///
    /// Returns whether the manager's certificate was verified.
    pub async fn connect(&mut self) -> Result<bool> {
        self.options.validate()?;
        let host = self.options.host.clone();
        let port = self.options.port;
        self.connect_to(&host, port).await
    }

    pub async fn connect_to(&mut self, host: &str, port: u16) -> Result<bool> {
        let (stream, authorized) = transport::connect(host, port, &self.options.tls).await?;
        self.connect_with_stream(stream);
        Ok(authorized)
    }

    /// Drive the protocol over an already established stream
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect_with_stream<S>(&mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (state_tx, state_rx) = watch::channel(SessionState::default());
        let commands = pipeline::spawn(stream, state_tx);
        self.connection = Some(Connection {
            commands,
            state: state_rx,
        });
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| !c.commands.is_closed() && !c.state.borrow().closed)
    }

    /// Snapshot of the logged-in user
    pub fn user(&self) -> User {
        self.connection
            .as_ref()
            .map(|c| c.state.borrow().user.clone())
            .unwrap_or_default()
    }

    /// Message of the most recent failed command on this connection
    pub fn last_error(&self) -> Option<String> {
        self.connection
            .as_ref()
            .and_then(|c| c.state.borrow().last_error.clone())
    }

    /// Queue a command and wait for its interpreted reply
    async fn submit<T, F>(&self, request: RequestNode, interpret: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Element, &mut SessionState) -> Result<T> + Send + 'static,
    {
        let connection = self.connection.as_ref().ok_or(OmpError::NotConnected)?;
        let wire = encode_request(&request)?;

        let (continuation, reply) = Continuation::channel(request.name(), interpret);
        debug!(command = request.name(), "queueing command");
        connection
            .commands
            .send(PendingCommand {
                wire,
                continuation,
                timeout: self.options.command_timeout,
            })
            .map_err(|_| OmpError::ConnectionClosed)?;

        reply.await.map_err(|_| OmpError::ConnectionClosed)?
    }

    /// Send an arbitrary command
    ///
    /// The reply is returned once its status is known to be 2xx; any other
    /// status fails with `ProtocolFailure`.
    pub async fn command(&self, request: RequestNode) -> Result<Element> {
        self.submit(request, |reply, _| {
            reply.check_status()?;
            Ok(reply.clone())
        })
        .await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<User> {
        let request = authenticate_request(username, password)?;
        let user = self.submit(request, response::login).await?;
        info!(role = %user.role, "logged in");
        Ok(user)
    }

    /// Log in with the credentials from `ClientOptions`
    pub async fn login_default(&self) -> Result<User> {
        let (Some(username), Some(password)) = (&self.options.username, &self.options.password) else {
            return Err(OmpError::invalid_argument("no username and password configured"));
        };
        self.login(username, password).await
    }

    pub async fn get_all_targets(&self) -> Result<Targets> {
        let request = get_targets_request(None)?;
        self.submit(request, |reply, _| response::targets(reply)).await
    }

    pub async fn get_target(&self, target_id: &str) -> Result<Targets> {
        let request = get_targets_request(Some(target_id))?;
        self.submit(request, |reply, _| response::targets(reply)).await
    }

    pub async fn create_target(&self, options: &TargetOptions) -> Result<Created> {
        let request = create_target_request(options)?;
        self.submit(request, |reply, _| response::created(reply, "create_target"))
            .await
    }

    pub async fn create_agent(&self, options: &AgentOptions) -> Result<Created> {
        let request = create_agent_request(options)?;
        self.submit(request, |reply, _| response::created(reply, "create_agent"))
            .await
    }

    pub async fn create_group(&self, options: &GroupOptions) -> Result<Created> {
        let request = create_group_request(options)?;
        self.submit(request, |reply, _| response::created(reply, "create_group"))
            .await
    }

    pub async fn create_permission(&self, options: &PermissionOptions) -> Result<Created> {
        let request = create_permission_request(options)?;
        self.submit(request, |reply, _| response::created(reply, "create_permission"))
            .await
    }

    pub async fn create_port_list(&self, options: &PortListOptions) -> Result<Created> {
        let request = create_port_list_request(options)?;
        self.submit(request, |reply, _| response::created(reply, "create_port_list"))
            .await
    }

    /// Add a range to an existing port list
    pub async fn add_port_range(&self, options: &PortRangeOptions) -> Result<Created> {
        let request = create_port_range_request(options)?;
        self.submit(request, |reply, _| response::created(reply, "create_port_range"))
            .await
    }

    pub async fn create_credential(&self, options: &CredentialOptions) -> Result<Created> {
        let request = create_credential_request(options)?;
        self.submit(request, |reply, _| response::created(reply, "create_credential"))
            .await
    }

    /// Protocol version spoken by the manager; does not require login
    pub async fn get_version(&self) -> Result<String> {
        self.submit(get_version_request(), |reply, _| response::version(reply))
            .await
    }
}
