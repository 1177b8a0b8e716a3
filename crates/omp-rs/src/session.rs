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

/// The authenticated user, as reported by the manager
///
/// Only the connection task writes this. `OmpClient::user()` hands out a
/// snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct User {
    pub role: String,
    pub timezone: String,
    pub severity: String,
    pub logged_in: bool,
}

/// Per-connection state owned by the connection task
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub user: User,
    /// Message of the most recent failed command
    pub last_error: Option<String>,
    pub closed: bool,
}

impl SessionState {
    pub(crate) fn record_login(&mut self, role: &str, timezone: &str, severity: &str) -> User {
        self.user = User {
            role: role.to_string(),
            timezone: timezone.to_string(),
            severity: severity.to_string(),
            logged_in: true,
        };
        self.user.clone()
    }
}
