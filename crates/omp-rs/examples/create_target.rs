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

//! Log in to a manager and create a scan target
//!
//! Point it at a running manager with:
//! ```bash
//! OMP_HOST=127.0.0.1 OMP_USERNAME=admin OMP_PASSWORD=secret \
//!     RUST_LOG=omp_rs=debug cargo run -p omp-rs --example create_target
//! ```

use omp_rs::{ClientOptions, DEFAULT_HOST, OmpClient, Result, TargetOptions};

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "omp_rs=info".into()),
        )
        .init();

    let options = ClientOptions::new()
        .host(env_or("OMP_HOST", DEFAULT_HOST))
        .credentials(env_or("OMP_USERNAME", "admin"), env_or("OMP_PASSWORD", "admin"));

    println!("Connecting to {}:{}...", options.host, options.port);
    let mut client = OmpClient::new(options);
    let verified = client.connect().await?;
    println!("✓ Connected (certificate verified: {verified})");

    let user = client.login_default().await?;
    println!("✓ Logged in: {user:?}");

    let mut target = TargetOptions::new("Test Target", "192.168.1.0/24");
    target.comment = Some("This is only a test target".to_string());
    target.exclude_hosts = Some("192.168.1.255".to_string());
    target.alive_tests = Some("ICMP Ping".to_string());
    target.port_range = Some("1-1024".to_string());

    match client.create_target(&target).await {
        Ok(created) => println!("✓ Created target {} ({})", created.id, created.status_text),
        Err(e) => eprintln!("✗ Create target failed: {e}"),
    }

    let targets = client.get_all_targets().await?;
    println!("\n{} target(s) on the manager:", targets.target_count);
    for target in &targets.targets {
        println!("  {} {}", target.id, target.name.as_deref().unwrap_or("-"));
    }

    Ok(())
}
