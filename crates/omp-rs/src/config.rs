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

//! Client configuration

use crate::error::{OmpError, Result};
use crate::transport::TlsOptions;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9390;

/// How long a command may wait for its reply before it fails with `Timeout`
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(skip)]
    pub tls: TlsOptions,
    /// `None` waits forever
    #[serde(skip)]
    pub command_timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            tls: TlsOptions::default(),
            command_timeout: Some(DEFAULT_COMMAND_TIMEOUT),
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    pub fn command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_address(&self.host, self.port)
    }
}

pub(crate) fn validate_address(host: &str, port: u16) -> Result<()> {
    if host.trim().is_empty() {
        return Err(OmpError::invalid_argument("host must not be empty"));
    }
    if port == 0 {
        return Err(OmpError::invalid_argument("port must be in 1..=65535"));
    }
    Ok(())
}

// Hand-written so the password never reaches logs
impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tls", &self.tls)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ClientOptions::default();
        assert_eq!(options.host, "127.0.0.1");
        assert_eq!(options.port, 9390);
        assert_eq!(options.command_timeout, Some(DEFAULT_COMMAND_TIMEOUT));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_host_and_port_zero() {
        assert!(matches!(
            ClientOptions::new().host("").validate(),
            Err(OmpError::InvalidArgument(_))
        ));
        assert!(matches!(
            ClientOptions::new().port(0).validate(),
            Err(OmpError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_debug_redacts_password() {
        let options = ClientOptions::new().credentials("admin", "hunter2");
        let debug = format!("{:?}", options);
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_deserialize_partial() {
        let options: ClientOptions =
            serde_json::from_str(r#"{"host": "scanner.local", "username": "admin"}"#)
                .expect("Failed to deserialize");
        assert_eq!(options.host, "scanner.local");
        assert_eq!(options.port, DEFAULT_PORT);
        assert_eq!(options.username.as_deref(), Some("admin"));
        assert_eq!(options.command_timeout, Some(DEFAULT_COMMAND_TIMEOUT));
    }
}
