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

//! XML codec for OMP messages
//!
//! Every command and every reply is a single top-level element:
//!
//! ```text
//! <get_targets target_id="f2c1..."/>
//! <get_targets_response status="200" status_text="OK">...</get_targets_response>
//! ```
//!
//! The stream carries no length prefix, so a `ReplyFramer` scans buffered
//! bytes for the end of the first complete element before `decode_reply` runs.
use crate::error::{OmpError, Result};
use crate::message::{Content, Element, RequestNode};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

/// Maximum size of a single buffered reply (100MB)
/// This prevents a misbehaving manager from growing the read buffer without bound
pub const MAX_REPLY_LENGTH: usize = 100 * 1024 * 1024;

pub fn encode_request(request: &RequestNode) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    write_node(&mut writer, request)?;
    String::from_utf8(writer.into_inner()).map_err(|e| OmpError::Encode(e.to_string()))
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &RequestNode) -> Result<()> {
    let mut start = BytesStart::new(node.name());
    for (key, value) in node.attributes() {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    match node.content() {
        Content::Empty => write_event(writer, Event::Empty(start)),
        Content::Text(text) => {
            write_event(writer, Event::Start(start))?;
            if !text.is_empty() {
                write_event(writer, Event::Text(BytesText::new(text)))?;
            }
            write_event(writer, Event::End(BytesEnd::new(node.name())))
        }
        Content::Children(children) => {
            write_event(writer, Event::Start(start))?;
            for child in children {
                write_node(writer, child)?;
            }
            write_event(writer, Event::End(BytesEnd::new(node.name())))
        }
    }
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| OmpError::Encode(e.to_string()))
}

/// Position just past `needle` in `data[from..]`, if present
fn find_after(data: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    data.get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| from + i + needle.len())
}

const COMMENT_OPEN: &[u8] = b"<!--";
const CDATA_OPEN: &[u8] = b"<![CDATA[";

/// `rest` is too short to tell whether it opens `marker`
fn is_truncated(rest: &[u8], marker: &[u8]) -> bool {
    rest.len() < marker.len() && marker.starts_with(rest)
}

/// Resumable scan for the end of the first complete reply element
///
/// Bytes examined by one call are not examined again by the next, so framing
/// a reply costs time linear in its length however the stream splits it.
#[derive(Debug, Default)]
pub struct ReplyFramer {
    /// Start of the first construct not yet consumed
    pos: usize,
    depth: usize,
    /// Bytes of the construct at `pos` already examined without finding its end
    scanned: usize,
    /// Open quote inside a partially scanned tag
    quote: Option<u8>,
}

impl ReplyFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue scanning `data`, which must extend the bytes seen by earlier calls
    ///
    /// Returns the length of the first complete reply and resets for the
    /// next one. `Ok(None)` means more bytes are needed. Declarations,
    /// comments and processing instructions before the root are counted as
    /// part of the reply. After an error the framer must be replaced.
    pub fn advance(&mut self, data: &[u8]) -> Result<Option<usize>> {
        while self.pos < data.len() {
            let pos = self.pos;
            if data[pos] != b'<' {
                if self.depth == 0 && !data[pos].is_ascii_whitespace() {
                    return Err(OmpError::malformed_with_preview(
                        format!("Unexpected byte 0x{:02x} outside of a reply element", data[pos]),
                        pos,
                        data,
                    ));
                }
                self.pos += 1;
                continue;
            }

            let rest = &data[pos..];
            if is_truncated(rest, COMMENT_OPEN) || is_truncated(rest, CDATA_OPEN) {
                return Ok(None);
            }

            let end = if rest.starts_with(b"<?") {
                self.skip_until(data, 2, b"?>")
            } else if rest.starts_with(COMMENT_OPEN) {
                self.skip_until(data, COMMENT_OPEN.len(), b"-->")
            } else if rest.starts_with(CDATA_OPEN) {
                if self.depth == 0 {
                    return Err(OmpError::malformed_with_preview(
                        "CDATA outside of a reply element",
                        pos,
                        data,
                    ));
                }
                self.skip_until(data, CDATA_OPEN.len(), b"]]>")
            } else if rest.starts_with(b"<!") {
                self.skip_until(data, 2, b">")
            } else {
                let Some(end) = self.scan_tag(data) else {
                    return Ok(None);
                };
                let tag = &data[pos..end];
                if tag.starts_with(b"</") {
                    self.depth = self.depth.checked_sub(1).ok_or_else(|| {
                        OmpError::malformed_with_preview("Closing tag without a reply element", pos, data)
                    })?;
                } else if !tag.ends_with(b"/>") {
                    self.depth += 1;
                }
                if self.depth == 0 {
                    *self = Self::default();
                    return Ok(Some(end));
                }
                Some(end)
            };

            let Some(end) = end else {
                return Ok(None);
            };
            self.pos = end;
            self.scanned = 0;
        }

        Ok(None)
    }

    /// End of the construct at `pos`, which closes with `needle`
    fn skip_until(&mut self, data: &[u8], opener: usize, needle: &[u8]) -> Option<usize> {
        // Step back far enough to catch a needle split across reads
        let resume = self.scanned.saturating_sub(needle.len() - 1);
        let found = find_after(data, self.pos + opener.max(resume), needle);
        if found.is_none() {
            self.scanned = data.len() - self.pos;
        }
        found
    }

    /// End of the tag at `pos`, honouring quoted attribute values
    fn scan_tag(&mut self, data: &[u8]) -> Option<usize> {
        let from = self.pos + self.scanned.max(1);
        let mut quote = self.quote;
        for (offset, &byte) in data.get(from..)?.iter().enumerate() {
            match (quote, byte) {
                (Some(q), b) if b == q => quote = None,
                (Some(_), _) => {}
                (None, b'"') | (None, b'\'') => quote = Some(byte),
                (None, b'>') => {
                    self.quote = None;
                    return Some(from + offset + 1);
                }
                (None, _) => {}
            }
        }
        self.scanned = data.len() - self.pos;
        self.quote = quote;
        None
    }
}

/// Find the end position of the first complete reply element in `data`
///
/// One-shot form of `ReplyFramer::advance`.
pub fn find_reply_end(data: &[u8]) -> Result<Option<usize>> {
    ReplyFramer::new().advance(data)
}

/// An element whose end tag has not been read yet
struct OpenElement {
    element: Element,
    text: String,
}

impl OpenElement {
    /// Leaf text is kept exactly; text mixed with children is trimmed
    fn finish(self) -> Element {
        let OpenElement { mut element, text } = self;
        element.text = if element.children.is_empty() {
            Some(text)
        } else {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        };
        element
    }
}

fn open_element(start: &BytesStart<'_>, position: usize) -> Result<OpenElement> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| OmpError::malformed(format!("Element name is not UTF-8: {e}"), position))?
        .to_string();

    let mut element = Element::new(name);
    for attribute in start.attributes() {
        let attribute = attribute
            .map_err(|e| OmpError::malformed(format!("Bad attribute: {e}"), position))?;
        let key = std::str::from_utf8(attribute.key.as_ref())
            .map_err(|e| OmpError::malformed(format!("Attribute name is not UTF-8: {e}"), position))?
            .to_string();
        let value = attribute
            .unescape_value()
            .map_err(|e| OmpError::malformed(format!("Bad attribute value: {e}"), position))?
            .into_owned();
        element.attributes.push((key, value));
    }

    Ok(OpenElement {
        element,
        text: String::new(),
    })
}

fn attach(stack: &mut [OpenElement], root: &mut Option<Element>, element: Element, position: usize) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.element.children.push(element);
        return Ok(());
    }
    if root.is_some() {
        return Err(OmpError::malformed(
            format!("Second top-level element <{}>", element.name),
            position,
        ));
    }
    *root = Some(element);
    Ok(())
}

/// Decode one complete reply into an element tree
pub fn decode_reply(data: &[u8]) -> Result<Element> {
    let text = std::str::from_utf8(data).map_err(|e| {
        OmpError::malformed_with_preview(format!("Reply is not UTF-8: {e}"), e.valid_up_to(), data)
    })?;

    let mut reader = Reader::from_str(text);
    let mut stack: Vec<OpenElement> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let position = reader.buffer_position() as usize;
        let event = reader.read_event().map_err(|e| {
            OmpError::malformed_with_preview(e.to_string(), reader.buffer_position() as usize, data)
        })?;

        match event {
            Event::Start(start) => {
                if root.is_some() && stack.is_empty() {
                    return Err(OmpError::malformed("Second top-level element", position));
                }
                stack.push(open_element(&start, position)?);
            }
            Event::Empty(start) => {
                let element = open_element(&start, position)?.element;
                attach(&mut stack, &mut root, element, position)?;
            }
            Event::End(_) => {
                let open = stack
                    .pop()
                    .ok_or_else(|| OmpError::malformed("Unbalanced closing tag", position))?;
                attach(&mut stack, &mut root, open.finish(), position)?;
            }
            Event::Text(content) => {
                let content = content
                    .unescape()
                    .map_err(|e| OmpError::malformed(e.to_string(), position))?;
                match stack.last_mut() {
                    Some(open) => open.text.push_str(&content),
                    None if content.trim().is_empty() => {}
                    None => {
                        return Err(OmpError::malformed_with_preview(
                            "Text outside of the reply element",
                            position,
                            data,
                        ));
                    }
                }
            }
            Event::CData(content) => {
                let raw = content.into_inner();
                let content = std::str::from_utf8(&raw)
                    .map_err(|e| OmpError::malformed(format!("CDATA is not UTF-8: {e}"), position))?;
                match stack.last_mut() {
                    Some(open) => open.text.push_str(content),
                    None => {
                        return Err(OmpError::malformed("CDATA outside of the reply element", position));
                    }
                }
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions, doctype
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(OmpError::malformed_with_preview(
            format!("Unclosed element <{}>", open.element.name),
            data.len(),
            data,
        ));
    }

    root.ok_or_else(|| OmpError::malformed_with_preview("No reply element", 0, data))
}
