#![allow(clippy::result_large_err)]

use crate::core::error::{AppError, CONTEXT_ELEMENT_PATH};
use crate::core::types::ErrorCategory;
use quick_xml::escape::unescape;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;

const XMLNS: &str = "xmlns";

/// Namespace-qualified attribute of an [`XmlElement`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub namespace: Option<String>,
    pub local: String,
    pub value: String,
}

/// Owned element tree with namespaces already resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub namespace: Option<String>,
    pub local: String,
    pub attributes: Vec<XmlAttribute>,
    pub children: Vec<XmlElement>,
    pub text: String,
}

impl XmlElement {
    pub fn new(namespace: Option<&str>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            local: local.into(),
            ..Self::default()
        }
    }

    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.namespace.as_deref() == Some(namespace) && self.local == local
    }

    /// Attribute lookup; `None` namespace matches unprefixed attributes.
    pub fn attribute(&self, namespace: Option<&str>, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.namespace.as_deref() == namespace && attr.local == local)
            .map(|attr| attr.value.as_str())
    }

    pub fn set_attribute(&mut self, namespace: Option<&str>, local: &str, value: impl Into<String>) {
        self.attributes.push(XmlAttribute {
            namespace: namespace.map(str::to_string),
            local: local.to_string(),
            value: value.into(),
        });
    }
}

struct OpenElement {
    element: XmlElement,
    /// Prefix bindings introduced by this element.
    bindings: HashMap<String, String>,
    raw_name: String,
}

fn interchange_error(message: impl Into<String>, path: &str) -> AppError {
    AppError::new(ErrorCategory::InterchangeError, message)
        .with_code("PF-XML-001")
        .with_detail(CONTEXT_ELEMENT_PATH, path)
}

fn open_path(stack: &[OpenElement]) -> String {
    stack
        .iter()
        .map(|open| open.raw_name.as_str())
        .collect::<Vec<_>>()
        .join("/")
}

fn lookup_prefix(stack: &[OpenElement], own: &HashMap<String, String>, prefix: &str) -> Option<String> {
    own.get(prefix).cloned().or_else(|| {
        stack
            .iter()
            .rev()
            .find_map(|open| open.bindings.get(prefix).cloned())
    })
}

fn split_name(raw: &str) -> (Option<&str>, &str) {
    match raw.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, raw),
    }
}

fn decode_attribute(attr: &Attribute<'_>, path: &str) -> Result<(String, String), AppError> {
    let key = std::str::from_utf8(attr.key.as_ref())
        .map_err(|err| interchange_error(format!("attribute name is not UTF-8: {}", err), path))?;
    let raw = std::str::from_utf8(&attr.value)
        .map_err(|err| interchange_error(format!("attribute {} is not UTF-8: {}", key, err), path))?;
    let value = unescape(raw)
        .map_err(|err| interchange_error(format!("attribute {} has a bad escape: {}", key, err), path))?;
    Ok((key.to_string(), value.into_owned()))
}

fn open_element(
    start: &BytesStart<'_>,
    stack: &[OpenElement],
) -> Result<OpenElement, AppError> {
    let path = open_path(stack);
    let raw_name = std::str::from_utf8(start.name().as_ref())
        .map_err(|err| interchange_error(format!("element name is not UTF-8: {}", err), &path))?
        .to_string();

    let mut bindings = HashMap::new();
    let mut plain = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|err| {
            interchange_error(format!("malformed attribute on <{}>: {}", raw_name, err), &path)
        })?;
        let (key, value) = decode_attribute(&attr, &path)?;
        if key == XMLNS {
            bindings.insert(String::new(), value);
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            bindings.insert(prefix.to_string(), value);
        } else {
            plain.push((key, value));
        }
    }

    let (prefix, local) = split_name(&raw_name);
    let namespace = match prefix {
        Some(prefix) => Some(lookup_prefix(stack, &bindings, prefix).ok_or_else(|| {
            interchange_error(format!("undeclared namespace prefix '{}'", prefix), &path)
        })?),
        None => lookup_prefix(stack, &bindings, "").filter(|ns| !ns.is_empty()),
    };

    let mut element = XmlElement::new(namespace.as_deref(), local);
    for (key, value) in plain {
        let (prefix, local) = split_name(&key);
        // Unprefixed attributes carry no namespace.
        let namespace = match prefix {
            Some(prefix) => Some(lookup_prefix(stack, &bindings, prefix).ok_or_else(|| {
                interchange_error(format!("undeclared namespace prefix '{}'", prefix), &path)
            })?),
            None => None,
        };
        element.attributes.push(XmlAttribute {
            namespace,
            local: local.to_string(),
            value,
        });
    }

    Ok(OpenElement {
        element,
        bindings,
        raw_name,
    })
}

fn close_element(
    open: OpenElement,
    stack: &mut [OpenElement],
    root: &mut Option<XmlElement>,
) -> Result<(), AppError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.element.children.push(open.element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(open.element);
            Ok(())
        }
        None => Err(interchange_error(
            format!("second root element <{}>", open.raw_name),
            "",
        )),
    }
}

fn append_text(stack: &mut [OpenElement], text: &str, path: &str) -> Result<(), AppError> {
    match stack.last_mut() {
        Some(open) => {
            open.element.text.push_str(text);
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(interchange_error("text outside of the root element", path)),
    }
}

fn check_depth(stack: &[OpenElement], max_depth: usize) -> Result<(), AppError> {
    if stack.len() >= max_depth {
        return Err(interchange_error(
            format!("document nesting exceeds {} elements", max_depth),
            &open_path(stack),
        )
        .with_code("PF-XML-009"));
    }
    Ok(())
}

/// Parse a document into an owned element tree.
///
/// Elements nested deeper than `max_depth` are rejected.
pub fn parse_document(text: &str, max_depth: usize) -> Result<XmlElement, AppError> {
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<OpenElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let event = reader.read_event().map_err(|err| {
            interchange_error(
                format!(
                    "malformed XML at byte {}: {}",
                    reader.buffer_position(),
                    err
                ),
                &open_path(&stack),
            )
        })?;
        match event {
            Event::Start(start) => {
                check_depth(&stack, max_depth)?;
                let open = open_element(&start, &stack)?;
                stack.push(open);
            }
            Event::Empty(start) => {
                check_depth(&stack, max_depth)?;
                let open = open_element(&start, &stack)?;
                close_element(open, &mut stack, &mut root)?;
            }
            Event::End(_) => {
                let path = open_path(&stack);
                let open = stack
                    .pop()
                    .ok_or_else(|| interchange_error("unbalanced closing tag", &path))?;
                close_element(open, &mut stack, &mut root)?;
            }
            Event::Text(content) => {
                let path = open_path(&stack);
                let raw = std::str::from_utf8(&content)
                    .map_err(|err| interchange_error(format!("text is not UTF-8: {}", err), &path))?;
                let decoded = unescape(raw)
                    .map_err(|err| interchange_error(format!("bad escape in text: {}", err), &path))?;
                append_text(&mut stack, &decoded, &path)?;
            }
            Event::GeneralRef(reference) => {
                let path = open_path(&stack);
                let name = std::str::from_utf8(&reference)
                    .map_err(|err| interchange_error(format!("entity is not UTF-8: {}", err), &path))?;
                let entity = format!("&{};", name);
                let decoded = unescape(&entity)
                    .map_err(|err| interchange_error(format!("unknown entity {}: {}", entity, err), &path))?;
                append_text(&mut stack, &decoded, &path)?;
            }
            Event::CData(content) => {
                let path = open_path(&stack);
                let raw = std::str::from_utf8(&content)
                    .map_err(|err| interchange_error(format!("CDATA is not UTF-8: {}", err), &path))?;
                append_text(&mut stack, raw, &path)?;
            }
            Event::Eof => break,
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
        }
    }

    if !stack.is_empty() {
        return Err(interchange_error(
            "document ended before all elements were closed",
            &open_path(&stack),
        ));
    }
    root.ok_or_else(|| interchange_error("document has no root element", ""))
}

fn write_error(err: impl std::fmt::Display) -> AppError {
    AppError::new(
        ErrorCategory::SerializationError,
        format!("failed to write XML: {}", err),
    )
    .with_code("PF-XML-008")
}

/// Namespace to prefix table used when rendering. The empty prefix marks the
/// default namespace.
pub struct Prefixes<'a>(pub &'a [(&'a str, &'a str)]);

impl Prefixes<'_> {
    fn qualify(&self, namespace: Option<&str>, local: &str, attribute: bool) -> String {
        let prefix = namespace.and_then(|ns| {
            self.0
                .iter()
                .find(|(uri, _)| *uri == ns)
                .map(|(_, prefix)| *prefix)
        });
        match prefix {
            Some("") if !attribute => local.to_string(),
            Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, local),
            _ => local.to_string(),
        }
    }
}

/// Render `root` as an indented document, declaring every namespace of
/// `prefixes` on the root element.
pub fn render_document(root: &XmlElement, prefixes: &Prefixes<'_>) -> Result<String, AppError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(write_error)?;

    let mut declarations = Vec::new();
    for (uri, prefix) in prefixes.0 {
        let key = if prefix.is_empty() {
            XMLNS.to_string()
        } else {
            format!("{}:{}", XMLNS, prefix)
        };
        declarations.push((key, uri.to_string()));
    }
    write_element(&mut writer, root, prefixes, &declarations)?;

    String::from_utf8(writer.into_inner()).map_err(write_error)
}

fn start_tag<'e>(
    element: &'e XmlElement,
    name: &'e str,
    prefixes: &Prefixes<'_>,
    declarations: &[(String, String)],
) -> BytesStart<'e> {
    let mut start = BytesStart::new(name);
    for (key, value) in declarations {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    for attr in &element.attributes {
        let key = prefixes.qualify(attr.namespace.as_deref(), &attr.local, true);
        start.push_attribute((key.as_str(), attr.value.as_str()));
    }
    start
}

/// Open element being rendered: its qualified name and the next child to emit.
struct RenderFrame<'e> {
    element: &'e XmlElement,
    name: String,
    next_child: usize,
}

/// Emits `root` with an explicit stack so document depth never grows the
/// call stack.
fn write_element(
    writer: &mut Writer<Vec<u8>>,
    root: &XmlElement,
    prefixes: &Prefixes<'_>,
    declarations: &[(String, String)],
) -> Result<(), AppError> {
    let none: &[(String, String)] = &[];
    let mut stack: Vec<RenderFrame<'_>> = Vec::new();
    let mut pending = Some((root, declarations));

    loop {
        if let Some((element, declarations)) = pending.take() {
            let name = prefixes.qualify(element.namespace.as_deref(), &element.local, false);
            let start = start_tag(element, &name, prefixes, declarations);
            if element.children.is_empty() && element.text.is_empty() {
                writer.write_event(Event::Empty(start)).map_err(write_error)?;
            } else {
                writer.write_event(Event::Start(start)).map_err(write_error)?;
                if !element.text.is_empty() {
                    writer
                        .write_event(Event::Text(BytesText::new(&element.text)))
                        .map_err(write_error)?;
                }
                stack.push(RenderFrame {
                    element,
                    name,
                    next_child: 0,
                });
            }
        }

        let Some(frame) = stack.last_mut() else {
            return Ok(());
        };
        match frame.element.children.get(frame.next_child) {
            Some(child) => {
                frame.next_child += 1;
                pending = Some((child, none));
            }
            None => {
                writer
                    .write_event(Event::End(BytesEnd::new(frame.name.as_str())))
                    .map_err(write_error)?;
                stack.pop();
            }
        }
    }
}
