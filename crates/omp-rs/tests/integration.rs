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

//! Integration tests for omp-rs
//!
//! These tests require a running manager listening for OMP over TLS.
//!
//! To run:
//! 1. Start a manager on localhost:9390 with an `admin` user whose password
//!    is in `OMP_PASSWORD` (defaults to `admin`).
//!
//! 2. Run tests:
//!    cargo test -p omp-rs --test integration -- --ignored --test-threads=1

// These tests are ignored by default since they require external setup
// Run with: cargo test -p omp-rs -- --ignored

#[cfg(test)]
mod real_manager_tests {
    use omp_rs::{
        ClientOptions, GroupOptions, OmpClient, OmpError, PortListOptions, PortProtocol, PortRangeOptions,
        RequestNode, TargetOptions,
    };

    fn options() -> ClientOptions {
        let password = std::env::var("OMP_PASSWORD").unwrap_or_else(|_| "admin".to_string());
        ClientOptions::new().host("localhost").port(9390).credentials("admin", password)
    }

    /// Helper to connect to the test manager
    async fn connect_test_manager() -> Result<OmpClient, OmpError> {
        let mut client = OmpClient::new(options());
        client.connect().await?;
        Ok(client)
    }

    async fn logged_in() -> OmpClient {
        let client = connect_test_manager().await.expect("Failed to connect");
        client.login_default().await.expect("Failed to log in");
        client
    }

    fn unique(prefix: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        format!("{prefix}-{nanos}")
    }

    #[tokio::test]
    #[ignore]
    async fn test_connect_to_real_manager() {
        let client = connect_test_manager().await;
        assert!(client.is_ok(), "Failed to connect to manager: {:?}", client.err());
        assert!(client.unwrap().is_connected());
    }

    #[tokio::test]
    #[ignore]
    async fn test_get_version_without_login() {
        let client = connect_test_manager().await.expect("Failed to connect");
        let version = client.get_version().await;
        assert!(version.is_ok(), "get_version failed: {:?}", version.err());
        assert!(!version.unwrap().is_empty(), "Version should not be empty");
    }

    #[tokio::test]
    #[ignore]
    async fn test_login() {
        let client = connect_test_manager().await.expect("Failed to connect");
        let user = client.login_default().await.expect("Login failed");

        assert!(user.logged_in);
        assert!(!user.role.is_empty(), "Role should not be empty");
        assert_eq!(client.user(), user);
    }

    #[tokio::test]
    #[ignore]
    async fn test_login_with_wrong_password() {
        let client = connect_test_manager().await.expect("Failed to connect");
        let result = client.login("admin", "definitely-not-the-password").await;

        match result {
            Err(e @ OmpError::ProtocolFailure { .. }) => {
                assert!(e.status_text().is_some(), "Failure should carry status text");
            }
            other => panic!("Expected ProtocolFailure, got: {:?}", other),
        }
        assert!(!client.user().logged_in);
    }

    #[tokio::test]
    #[ignore]
    async fn test_create_and_fetch_target() {
        let client = logged_in().await;

        let name = unique("omp-rs target");
        let mut target = TargetOptions::new(name.clone(), "192.0.2.0/28");
        target.comment = Some("created by omp-rs integration tests".to_string());
        target.port_range = Some("1-1024".to_string());

        let created = client.create_target(&target).await.expect("create_target failed");
        assert!(!created.id.is_empty(), "Created id should not be empty");

        let fetched = client.get_target(&created.id).await.expect("get_target failed");
        assert_eq!(fetched.targets.len(), 1);
        assert_eq!(fetched.targets[0].id, created.id);
        assert_eq!(fetched.targets[0].name.as_deref(), Some(name.as_str()));

        let all = client.get_all_targets().await.expect("get_all_targets failed");
        assert!(all.targets.iter().any(|t| t.id == created.id));

        let deleted = client
            .command(
                RequestNode::new("delete_target")
                    .attr("target_id", created.id.as_str())
                    .attr("ultimate", "1"),
            )
            .await;
        assert!(deleted.is_ok(), "delete_target failed: {:?}", deleted.err());
    }

    #[tokio::test]
    #[ignore]
    async fn test_duplicate_target_is_rejected() {
        let client = logged_in().await;
        let target = TargetOptions::new(unique("omp-rs duplicate"), "192.0.2.1");

        let created = client.create_target(&target).await.expect("create_target failed");
        let duplicate = client.create_target(&target).await;
        assert!(
            matches!(duplicate, Err(OmpError::ProtocolFailure { .. })),
            "Expected ProtocolFailure, got: {:?}",
            duplicate
        );
        assert!(client.last_error().is_some());

        client
            .command(
                RequestNode::new("delete_target")
                    .attr("target_id", created.id.as_str())
                    .attr("ultimate", "1"),
            )
            .await
            .expect("delete_target failed");
    }

    #[tokio::test]
    #[ignore]
    async fn test_port_list_with_extra_range() {
        let client = logged_in().await;

        let port_list = client
            .create_port_list(&PortListOptions {
                name: unique("omp-rs ports"),
                port_range: "T:1-100".to_string(),
                ..PortListOptions::default()
            })
            .await
            .expect("create_port_list failed");

        let range = client
            .add_port_range(&PortRangeOptions {
                port_list_id: port_list.id.clone(),
                start: 8000,
                end: 8080,
                protocol: PortProtocol::Tcp,
                ..PortRangeOptions::default()
            })
            .await;
        assert!(range.is_ok(), "create_port_range failed: {:?}", range.err());
    }

    #[tokio::test]
    #[ignore]
    async fn test_create_group() {
        let client = logged_in().await;
        let created = client
            .create_group(&GroupOptions {
                name: unique("omp-rs group"),
                users: vec!["admin".to_string()],
                ..GroupOptions::default()
            })
            .await;
        assert!(created.is_ok(), "create_group failed: {:?}", created.err());
    }

    #[tokio::test]
    #[ignore]
    async fn test_concurrent_commands_share_one_connection() {
        let client = logged_in().await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let client = client.clone();
            handles.push(tokio::spawn(async move { client.get_version().await }));
        }
        for handle in handles {
            let version = handle.await.expect("task panicked");
            assert!(version.is_ok(), "get_version failed: {:?}", version.err());
        }
    }
}
