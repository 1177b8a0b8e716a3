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

//! # OMP Client
//!
//! An async client for the OpenVAS Management Protocol (OMP/GMP).
//!
//! Commands from any number of tasks are queued onto one TLS connection and
//! sent one at a time; each reply is handed back to the caller whose command
//! it answers.
//!
//! ## Example
//!
//! ```no_run
//! use omp_rs::{ClientOptions, OmpClient, TargetOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = OmpClient::new(ClientOptions::new().credentials("admin", "admin"));
//!     client.connect().await?;
//!     client.login_default().await?;
//!
//!     let created = client
//!         .create_target(&TargetOptions::new("Office", "192.168.1.0/24"))
//!         .await?;
//!     println!("Created target {}", created.id);
//!     Ok(())
//! }
//! ```

pub mod codec;
mod config;
mod connection;
mod error;
mod message;
mod ops;
mod pipeline;
mod response;
mod session;
mod transport;

pub use config::{ClientOptions, DEFAULT_COMMAND_TIMEOUT, DEFAULT_HOST, DEFAULT_PORT};
pub use connection::OmpClient;
pub use error::{OmpError, Result};
pub use message::{Content, Element, RequestNode, Status};
pub use ops::{
    AgentOptions, CredentialOptions, GroupOptions, PermissionOptions, PortListOptions, PortProtocol,
    PortRangeOptions, SshCredential, TargetOptions, TypedReference,
};
pub use response::{Created, Filters, Reference, Target, Targets};
pub use session::User;
pub use transport::{DEFAULT_CONNECT_TIMEOUT, TlsOptions};
