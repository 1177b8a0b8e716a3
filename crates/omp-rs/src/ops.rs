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

/// OMP command builders
///
/// Each builder checks the fields the manager requires and fails with
/// `InvalidArgument` before anything is queued.
use crate::error::{OmpError, Result};
use crate::message::RequestNode;

fn required<'a>(command: &str, field: &str, value: &'a str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(OmpError::invalid_argument(format!(
            "`{field}` is required for {command}"
        )));
    }
    Ok(value)
}

fn push_text(node: &mut RequestNode, name: &str, value: &Option<String>) {
    if let Some(value) = value {
        node.push_child(RequestNode::leaf(name, value.as_str()));
    }
}

fn push_flag(node: &mut RequestNode, name: &str, value: Option<bool>) {
    if let Some(value) = value {
        node.push_child(RequestNode::leaf(name, if value { "1" } else { "0" }));
    }
}

fn push_reference(node: &mut RequestNode, name: &str, id: &Option<String>) {
    if let Some(id) = id {
        node.push_child(RequestNode::new(name).attr("id", id.as_str()));
    }
}

pub fn authenticate_request(username: &str, password: &str) -> Result<RequestNode> {
    let username = required("authenticate", "username", username)?;
    let password = required("authenticate", "password", password)?;

    Ok(RequestNode::new("authenticate").child(
        RequestNode::new("credentials")
            .child(RequestNode::leaf("username", username))
            .child(RequestNode::leaf("password", password)),
    ))
}

pub fn get_targets_request(target_id: Option<&str>) -> Result<RequestNode> {
    let request = RequestNode::new("get_targets");
    match target_id {
        Some(id) => Ok(request.attr("target_id", required("get_targets", "target_id", id)?)),
        None => Ok(request),
    }
}

pub fn get_version_request() -> RequestNode {
    RequestNode::new("get_version")
}

/// SSH credential for a target, with an optional port
#[derive(Debug, Clone, Default)]
pub struct SshCredential {
    pub id: String,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default)]
pub struct TargetOptions {
    pub name: String,
    pub hosts: Option<String>,
    pub comment: Option<String>,
    pub exclude_hosts: Option<String>,
    pub ssh_credential: Option<SshCredential>,
    pub smb_credential: Option<String>,
    pub esxi_credential: Option<String>,
    pub alive_tests: Option<String>,
    pub reverse_lookup_only: Option<bool>,
    pub reverse_lookup_unify: Option<bool>,
    /// Port ranges such as `T:1-1024,U:53`
    pub port_range: Option<String>,
    pub port_list: Option<String>,
}

impl TargetOptions {
    pub fn new(name: impl Into<String>, hosts: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: Some(hosts.into()),
            ..Self::default()
        }
    }
}

pub fn create_target_request(options: &TargetOptions) -> Result<RequestNode> {
    let name = required("create_target", "name", &options.name)?;

    let mut request = RequestNode::new("create_target")
        .child(RequestNode::leaf("name", name))
        .child(RequestNode::leaf("hosts", options.hosts.as_deref().unwrap_or_default()));

    push_text(&mut request, "comment", &options.comment);
    push_text(&mut request, "exclude_hosts", &options.exclude_hosts);

    if let Some(ssh) = &options.ssh_credential {
        let mut credential =
            RequestNode::new("ssh_lsc_credential").attr("id", required("create_target", "ssh_credential.id", &ssh.id)?);
        if let Some(port) = ssh.port {
            credential.push_child(RequestNode::leaf("port", port.to_string()));
        }
        request.push_child(credential);
    }

    push_reference(&mut request, "smb_lsc_credential", &options.smb_credential);
    push_reference(&mut request, "esxi_lsc_credential", &options.esxi_credential);
    push_text(&mut request, "alive_tests", &options.alive_tests);
    push_flag(&mut request, "reverse_lookup_only", options.reverse_lookup_only);
    push_flag(&mut request, "reverse_lookup_unify", options.reverse_lookup_unify);
    push_text(&mut request, "port_range", &options.port_range);
    push_reference(&mut request, "port_list", &options.port_list);

    Ok(request)
}

#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
    pub name: String,
    /// Base64 encoded installer
    pub installer: String,
    pub comment: Option<String>,
    pub howto_install: Option<String>,
    pub howto_use: Option<String>,
}

pub fn create_agent_request(options: &AgentOptions) -> Result<RequestNode> {
    let name = required("create_agent", "name", &options.name)?;
    let installer = required("create_agent", "installer", &options.installer)?;

    let mut request = RequestNode::new("create_agent")
        .child(RequestNode::leaf("name", name))
        .child(RequestNode::leaf("installer", installer));
    push_text(&mut request, "comment", &options.comment);
    push_text(&mut request, "howto_install", &options.howto_install);
    push_text(&mut request, "howto_use", &options.howto_use);
    Ok(request)
}

#[derive(Debug, Clone, Default)]
pub struct GroupOptions {
    pub name: String,
    pub comment: Option<String>,
    pub users: Vec<String>,
    /// Id of an existing group to clone
    pub copy: Option<String>,
}

pub fn create_group_request(options: &GroupOptions) -> Result<RequestNode> {
    let name = required("create_group", "name", &options.name)?;

    let mut request = RequestNode::new("create_group").child(RequestNode::leaf("name", name));
    push_text(&mut request, "comment", &options.comment);
    if !options.users.is_empty() {
        request.push_child(RequestNode::leaf("users", options.users.join(",")));
    }
    push_text(&mut request, "copy", &options.copy);
    Ok(request)
}

/// A typed resource reference: `<subject id="..."><type>user</type></subject>`
#[derive(Debug, Clone, Default)]
pub struct TypedReference {
    pub id: String,
    pub kind: String,
}

#[derive(Debug, Clone, Default)]
pub struct PermissionOptions {
    /// Command the permission grants, e.g. `get_targets`
    pub name: String,
    pub comment: Option<String>,
    pub subject: TypedReference,
    pub resource: Option<TypedReference>,
}

fn typed_reference(command: &str, element: &str, reference: &TypedReference) -> Result<RequestNode> {
    let id = required(command, &format!("{element}.id"), &reference.id)?;
    let kind = required(command, &format!("{element}.type"), &reference.kind)?;
    Ok(RequestNode::new(element)
        .attr("id", id)
        .child(RequestNode::leaf("type", kind)))
}

pub fn create_permission_request(options: &PermissionOptions) -> Result<RequestNode> {
    let name = required("create_permission", "name", &options.name)?;

    let mut request = RequestNode::new("create_permission").child(RequestNode::leaf("name", name));
    push_text(&mut request, "comment", &options.comment);
    request.push_child(typed_reference("create_permission", "subject", &options.subject)?);
    if let Some(resource) = &options.resource {
        request.push_child(typed_reference("create_permission", "resource", resource)?);
    }
    Ok(request)
}

#[derive(Debug, Clone, Default)]
pub struct PortListOptions {
    pub name: String,
    pub comment: Option<String>,
    pub port_range: String,
}

pub fn create_port_list_request(options: &PortListOptions) -> Result<RequestNode> {
    let name = required("create_port_list", "name", &options.name)?;
    let port_range = required("create_port_list", "port_range", &options.port_range)?;

    let mut request = RequestNode::new("create_port_list").child(RequestNode::leaf("name", name));
    push_text(&mut request, "comment", &options.comment);
    request.push_child(RequestNode::leaf("port_range", port_range));
    Ok(request)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortProtocol {
    #[default]
    Tcp,
    Udp,
}

impl PortProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortProtocol::Tcp => "TCP",
            PortProtocol::Udp => "UDP",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PortRangeOptions {
    pub port_list_id: String,
    pub start: u16,
    pub end: u16,
    pub protocol: PortProtocol,
    pub comment: Option<String>,
}

pub fn create_port_range_request(options: &PortRangeOptions) -> Result<RequestNode> {
    let port_list_id = required("create_port_range", "port_list_id", &options.port_list_id)?;
    if options.start == 0 || options.start > options.end {
        return Err(OmpError::invalid_argument(format!(
            "port range {}-{} is not within 1..=65535 in ascending order",
            options.start, options.end
        )));
    }

    let mut request = RequestNode::new("create_port_range")
        .child(RequestNode::new("port_list").attr("id", port_list_id))
        .child(RequestNode::leaf("start", options.start.to_string()))
        .child(RequestNode::leaf("end", options.end.to_string()))
        .child(RequestNode::leaf("type", options.protocol.as_str()));
    push_text(&mut request, "comment", &options.comment);
    Ok(request)
}

#[derive(Debug, Clone, Default)]
pub struct CredentialOptions {
    pub name: String,
    pub comment: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
}

pub fn create_credential_request(options: &CredentialOptions) -> Result<RequestNode> {
    let name = required("create_credential", "name", &options.name)?;

    let mut request = RequestNode::new("create_credential").child(RequestNode::leaf("name", name));
    push_text(&mut request, "comment", &options.comment);
    push_text(&mut request, "login", &options.login);
    push_text(&mut request, "password", &options.password);
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_request;
    use crate::message::Content;

    fn child_names(node: &RequestNode) -> Vec<&str> {
        match node.content() {
            Content::Children(children) => children.iter().map(RequestNode::name).collect(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn test_authenticate_request() {
        let request = authenticate_request("admin", "pw").expect("valid request");
        assert_eq!(
            encode_request(&request).expect("encoding failed"),
            "<authenticate><credentials><username>admin</username>\
             <password>pw</password></credentials></authenticate>"
        );
    }

    #[test]
    fn test_authenticate_requires_credentials() {
        assert!(matches!(
            authenticate_request("", "pw"),
            Err(OmpError::InvalidArgument(_))
        ));
        assert!(matches!(
            authenticate_request("admin", ""),
            Err(OmpError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_get_targets_request() {
        let all = get_targets_request(None).expect("valid request");
        assert_eq!(encode_request(&all).expect("encoding failed"), "<get_targets/>");

        let one = get_targets_request(Some("abc")).expect("valid request");
        assert_eq!(
            encode_request(&one).expect("encoding failed"),
            r#"<get_targets target_id="abc"/>"#
        );

        assert!(get_targets_request(Some(" ")).is_err());
    }

    #[test]
    fn test_create_target_minimal() {
        let options = TargetOptions {
            name: "T".to_string(),
            ..TargetOptions::default()
        };
        let request = create_target_request(&options).expect("valid request");
        assert_eq!(
            encode_request(&request).expect("encoding failed"),
            "<create_target><name>T</name><hosts></hosts></create_target>"
        );
    }

    #[test]
    fn test_create_target_field_order() {
        let options = TargetOptions {
            name: "Test Target".to_string(),
            hosts: Some("192.168.1.0/24".to_string()),
            comment: Some("only a test".to_string()),
            exclude_hosts: Some("192.168.1.255".to_string()),
            ssh_credential: Some(SshCredential {
                id: "ssh-1".to_string(),
                port: Some(2222),
            }),
            smb_credential: Some("smb-1".to_string()),
            esxi_credential: Some("esxi-1".to_string()),
            alive_tests: Some("ICMP Ping".to_string()),
            reverse_lookup_only: Some(true),
            reverse_lookup_unify: Some(false),
            port_range: Some("1-1024".to_string()),
            port_list: Some("pl-1".to_string()),
        };

        let request = create_target_request(&options).expect("valid request");
        assert_eq!(
            child_names(&request),
            [
                "name",
                "hosts",
                "comment",
                "exclude_hosts",
                "ssh_lsc_credential",
                "smb_lsc_credential",
                "esxi_lsc_credential",
                "alive_tests",
                "reverse_lookup_only",
                "reverse_lookup_unify",
                "port_range",
                "port_list",
            ]
        );

        let encoded = encode_request(&request).expect("encoding failed");
        assert!(encoded.contains(r#"<ssh_lsc_credential id="ssh-1"><port>2222</port></ssh_lsc_credential>"#));
        assert!(encoded.contains(r#"<smb_lsc_credential id="smb-1"/>"#));
        assert!(encoded.contains("<reverse_lookup_only>1</reverse_lookup_only>"));
        assert!(encoded.contains("<reverse_lookup_unify>0</reverse_lookup_unify>"));
        assert!(encoded.contains(r#"<port_list id="pl-1"/>"#));
    }

    #[test]
    fn test_create_target_requires_name() {
        let options = TargetOptions {
            hosts: Some("10.0.0.1".to_string()),
            ..TargetOptions::default()
        };
        assert!(matches!(
            create_target_request(&options),
            Err(OmpError::InvalidArgument(msg)) if msg.contains("name")
        ));
    }

    #[test]
    fn test_create_agent_requires_installer() {
        let options = AgentOptions {
            name: "agent".to_string(),
            ..AgentOptions::default()
        };
        assert!(create_agent_request(&options).is_err());

        let options = AgentOptions {
            installer: "ZWNobw==".to_string(),
            howto_use: Some("run it".to_string()),
            ..options
        };
        let request = create_agent_request(&options).expect("valid request");
        assert_eq!(child_names(&request), ["name", "installer", "howto_use"]);
    }

    #[test]
    fn test_create_group_joins_users() {
        let options = GroupOptions {
            name: "ops".to_string(),
            users: vec!["alice".to_string(), "bob".to_string()],
            ..GroupOptions::default()
        };
        let encoded = encode_request(&create_group_request(&options).expect("valid request"))
            .expect("encoding failed");
        assert_eq!(
            encoded,
            "<create_group><name>ops</name><users>alice,bob</users></create_group>"
        );
    }

    #[test]
    fn test_create_permission() {
        let options = PermissionOptions {
            name: "get_targets".to_string(),
            subject: TypedReference {
                id: "user-1".to_string(),
                kind: "user".to_string(),
            },
            resource: Some(TypedReference {
                id: "target-1".to_string(),
                kind: "target".to_string(),
            }),
            ..PermissionOptions::default()
        };
        let encoded = encode_request(&create_permission_request(&options).expect("valid request"))
            .expect("encoding failed");
        assert_eq!(
            encoded,
            "<create_permission><name>get_targets</name>\
             <subject id=\"user-1\"><type>user</type></subject>\
             <resource id=\"target-1\"><type>target</type></resource></create_permission>"
        );
    }

    #[test]
    fn test_create_permission_requires_subject() {
        let options = PermissionOptions {
            name: "get_targets".to_string(),
            ..PermissionOptions::default()
        };
        assert!(matches!(
            create_permission_request(&options),
            Err(OmpError::InvalidArgument(msg)) if msg.contains("subject.id")
        ));
    }

    #[test]
    fn test_create_port_list() {
        let options = PortListOptions {
            name: "web".to_string(),
            port_range: "T:80,T:443".to_string(),
            ..PortListOptions::default()
        };
        let request = create_port_list_request(&options).expect("valid request");
        assert_eq!(child_names(&request), ["name", "port_range"]);

        let missing = PortListOptions {
            name: "web".to_string(),
            ..PortListOptions::default()
        };
        assert!(create_port_list_request(&missing).is_err());
    }

    #[test]
    fn test_create_port_range() {
        let options = PortRangeOptions {
            port_list_id: "pl-1".to_string(),
            start: 1,
            end: 100,
            protocol: PortProtocol::Udp,
            comment: None,
        };
        let encoded = encode_request(&create_port_range_request(&options).expect("valid request"))
            .expect("encoding failed");
        assert_eq!(
            encoded,
            "<create_port_range><port_list id=\"pl-1\"/><start>1</start>\
             <end>100</end><type>UDP</type></create_port_range>"
        );
    }

    #[test]
    fn test_create_port_range_rejects_bad_bounds() {
        for (start, end) in [(0, 10), (20, 10)] {
            let options = PortRangeOptions {
                port_list_id: "pl-1".to_string(),
                start,
                end,
                ..PortRangeOptions::default()
            };
            assert!(matches!(
                create_port_range_request(&options),
                Err(OmpError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_create_credential() {
        let options = CredentialOptions {
            name: "ssh key".to_string(),
            login: Some("root".to_string()),
            password: Some("pw".to_string()),
            ..CredentialOptions::default()
        };
        let request = create_credential_request(&options).expect("valid request");
        assert_eq!(child_names(&request), ["name", "login", "password"]);
    }
}
