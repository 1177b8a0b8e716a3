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

use crate::error::{OmpError, Result};

/// Body of an outgoing node: nothing, leaf text, or ordered children
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Content {
    #[default]
    Empty,
    Text(String),
    Children(Vec<RequestNode>),
}

/// One element of an outgoing command
///
/// Built by the operation layer and consumed by `codec::encode_request`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestNode {
    name: String,
    attributes: Vec<(String, String)>,
    content: Content,
}

impl RequestNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            content: Content::Empty,
        }
    }

    /// Leaf element holding `text`
    pub fn leaf(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name).text(text)
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.content = Content::Text(text.into());
        self
    }

    pub fn child(mut self, child: RequestNode) -> Self {
        self.push_child(child);
        self
    }

    /// Append a child. Replaces any leaf text: a node carries text or children, never both.
    pub fn push_child(&mut self, child: RequestNode) {
        match &mut self.content {
            Content::Children(children) => children.push(child),
            content => *content = Content::Children(vec![child]),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn content(&self) -> &Content {
        &self.content
    }
}

/// A decoded reply element
///
/// Lookups return `None` for anything missing; nothing here panics on
/// unexpected reply shapes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First child with the given name
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(Element::text)
    }

    /// Attribute if present, otherwise the text of a child of that name
    fn field(&self, name: &str) -> Option<&str> {
        self.attr(name).or_else(|| self.child_text(name))
    }

    /// Reply status. Missing or non-numeric status is a malformed reply.
    pub fn status(&self) -> Result<Status> {
        let raw = self.field("status").ok_or_else(|| {
            OmpError::unexpected_reply(format!("<{}> carries no status", self.name))
        })?;
        Status::parse(raw).ok_or_else(|| {
            OmpError::unexpected_reply(format!("<{}> has non-numeric status {:?}", self.name, raw))
        })
    }

    pub fn status_text(&self) -> &str {
        self.field("status_text").unwrap_or_default()
    }

    /// Turn a non-2xx status into `ProtocolFailure`
    pub fn check_status(&self) -> Result<Status> {
        let status = self.status()?;
        if status.is_success() {
            Ok(status)
        } else {
            Err(OmpError::protocol(status.to_string(), self.status_text()))
        }
    }
}

/// Three digit reply status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Status(u16);

impl Status {
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse().ok().map(Status)
    }

    pub fn code(&self) -> u16 {
        self.0
    }

    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.0)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(status: &str, status_text: &str) -> Element {
        Element {
            name: "create_target_response".to_string(),
            attributes: vec![
                ("status".to_string(), status.to_string()),
                ("status_text".to_string(), status_text.to_string()),
            ],
            ..Element::default()
        }
    }

    #[test]
    fn push_child_replaces_text() {
        let mut node = RequestNode::leaf("credentials", "stale");
        node.push_child(RequestNode::leaf("username", "admin"));
        node.push_child(RequestNode::leaf("password", "pw"));

        match node.content() {
            Content::Children(children) => {
                let names: Vec<&str> = children.iter().map(RequestNode::name).collect();
                assert_eq!(names, ["username", "password"]);
            }
            other => panic!("Expected children, got: {:?}", other),
        }
    }

    #[test]
    fn success_range_is_2xx() {
        for code in ["200", "201", "202", "299"] {
            assert!(reply(code, "OK").check_status().is_ok(), "{code} should succeed");
        }
    }

    #[test]
    fn other_statuses_fail_with_status_text() {
        for code in ["400", "404", "500", "199", "300", "503"] {
            match reply(code, "Nope").check_status() {
                Err(OmpError::ProtocolFailure {
                    status,
                    status_text,
                }) => {
                    assert_eq!(status, code);
                    assert_eq!(status_text, "Nope");
                }
                other => panic!("Expected ProtocolFailure for {code}, got: {:?}", other),
            }
        }
    }

    #[test]
    fn missing_status_is_malformed() {
        let element = Element::new("get_targets_response");
        assert!(matches!(
            element.check_status(),
            Err(OmpError::MalformedReply { .. })
        ));
    }

    #[test]
    fn status_falls_back_to_child_elements() {
        let mut element = Element::new("authenticate_response");
        element.children.push(Element {
            name: "status".to_string(),
            text: Some("400".to_string()),
            ..Element::default()
        });
        element.children.push(Element {
            name: "status_text".to_string(),
            text: Some("Authentication failed".to_string()),
            ..Element::default()
        });

        let err = element.check_status().unwrap_err();
        assert_eq!(err.status_text(), Some("Authentication failed"));
    }

    #[test]
    fn missing_lookups_are_none() {
        let element = Element::new("target");
        assert_eq!(element.attr("id"), None);
        assert_eq!(element.child_text("name"), None);
        assert_eq!(element.children_named("port").count(), 0);
        assert_eq!(element.status_text(), "");
    }
}
