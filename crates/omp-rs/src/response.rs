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

//! Typed results built from decoded replies
//!
//! Every interpreter applies the same rule first: a 2xx status is success,
//! anything else is `ProtocolFailure` carrying the manager's `status_text`.

use crate::error::{OmpError, Result};
use crate::message::Element;
use crate::session::{SessionState, User};
use serde::Serialize;

/// Check status, then the reply element name
///
/// The name is only checked on success: managers answer unknown or rejected
/// commands with a generic `omp_response` carrying the error status.
pub(crate) fn expect_reply<'a>(reply: &'a Element, command: &str) -> Result<&'a Element> {
    reply.check_status()?;
    let expected = format!("{command}_response");
    if reply.name != expected {
        return Err(OmpError::unexpected_reply(format!(
            "expected <{expected}>, got <{}>",
            reply.name
        )));
    }
    Ok(reply)
}

fn owned(text: Option<&str>) -> Option<String> {
    text.map(str::to_string)
}

fn flag(text: Option<&str>) -> Option<bool> {
    match text?.trim() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

pub(crate) fn login(reply: &Element, session: &mut SessionState) -> Result<User> {
    let reply = expect_reply(reply, "authenticate")?;
    Ok(session.record_login(
        reply.child_text("role").unwrap_or_default(),
        reply.child_text("timezone").unwrap_or_default(),
        reply.child_text("severity").unwrap_or_default(),
    ))
}

/// Reference to another resource, e.g. a target's port list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    pub id: String,
    pub name: Option<String>,
}

impl Reference {
    fn from_child(parent: &Element, name: &str) -> Option<Self> {
        let element = parent.child(name)?;
        let id = element.attr("id")?;
        if id.is_empty() {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            name: owned(element.child_text("name")),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub id: String,
    pub name: Option<String>,
    pub comment: Option<String>,
    pub hosts: Option<String>,
    pub exclude_hosts: Option<String>,
    pub max_hosts: Option<u64>,
    pub port_list: Option<Reference>,
    pub ssh_credential: Option<Reference>,
    pub smb_credential: Option<Reference>,
    pub esxi_credential: Option<Reference>,
    pub alive_tests: Option<String>,
    pub reverse_lookup_only: Option<bool>,
    pub reverse_lookup_unify: Option<bool>,
    pub in_use: Option<bool>,
}

impl Target {
    fn from_element(element: &Element) -> Result<Self> {
        let id = element
            .attr("id")
            .ok_or_else(|| OmpError::unexpected_reply("<target> carries no id attribute"))?;

        Ok(Self {
            id: id.to_string(),
            name: owned(element.child_text("name")),
            comment: owned(element.child_text("comment")),
            hosts: owned(element.child_text("hosts")),
            exclude_hosts: owned(element.child_text("exclude_hosts")),
            max_hosts: element
                .child_text("max_hosts")
                .and_then(|v| v.trim().parse().ok()),
            port_list: Reference::from_child(element, "port_list"),
            ssh_credential: Reference::from_child(element, "ssh_lsc_credential"),
            smb_credential: Reference::from_child(element, "smb_lsc_credential"),
            esxi_credential: Reference::from_child(element, "esxi_lsc_credential"),
            alive_tests: owned(element.child_text("alive_tests")),
            reverse_lookup_only: flag(element.child_text("reverse_lookup_only")),
            reverse_lookup_unify: flag(element.child_text("reverse_lookup_unify")),
            in_use: flag(element.child_text("in_use")),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Filters {
    pub id: Option<String>,
    pub term: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Targets {
    pub targets: Vec<Target>,
    pub filters: Option<Filters>,
    pub target_count: u64,
}

pub(crate) fn targets(reply: &Element) -> Result<Targets> {
    let reply = expect_reply(reply, "get_targets")?;

    let targets = reply
        .children_named("target")
        .map(Target::from_element)
        .collect::<Result<Vec<_>>>()?;

    let filters = reply.child("filters").map(|filters| Filters {
        id: owned(filters.attr("id")),
        term: owned(filters.child_text("term")),
    });

    let target_count = reply
        .child_text("target_count")
        .and_then(|count| count.trim().parse().ok())
        .unwrap_or(targets.len() as u64);

    Ok(Targets {
        targets,
        filters,
        target_count,
    })
}

/// Outcome of a `create_*` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Created {
    pub id: String,
    pub status: u16,
    pub status_text: String,
}

pub(crate) fn created(reply: &Element, command: &str) -> Result<Created> {
    let reply = expect_reply(reply, command)?;
    let status = reply.status()?;
    let id = reply
        .attr("id")
        .ok_or_else(|| OmpError::unexpected_reply(format!("<{}> carries no id", reply.name)))?;

    Ok(Created {
        id: id.to_string(),
        status: status.code(),
        status_text: reply.status_text().to_string(),
    })
}

pub(crate) fn version(reply: &Element) -> Result<String> {
    let reply = expect_reply(reply, "get_version")?;
    reply
        .child_text("version")
        .map(|v| v.trim().to_string())
        .ok_or_else(|| OmpError::unexpected_reply("<get_version_response> carries no version"))
}
