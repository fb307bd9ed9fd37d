//! XML canonicalization of one element subtree.
//!
//! Canonical XML 1.0 and Exclusive XML Canonicalization 1.0, with and without
//! comments: the algorithms XML-DSig `Transform` and `CanonicalizationMethod`
//! elements name. The subtree is re-read with quick-xml, starting from the
//! namespace context its ancestors put in scope.

use std::borrow::Cow;

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use sso_bridge_core::error::{Result, SsoError};

use crate::xml::Document;

pub const C14N_INCLUSIVE: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const C14N_INCLUSIVE_COMMENTS: &str =
    "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments";
pub const C14N_EXCLUSIVE: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const C14N_EXCLUSIVE_COMMENTS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// One namespace binding; the default namespace has an empty prefix and an
/// undeclared default an empty URI.
type Binding = (String, String);

fn failed(msg: impl Into<String>) -> SsoError {
    SsoError::SignatureVerification(msg.into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Canonicalization {
    exclusive: bool,
    with_comments: bool,
    /// `InclusiveNamespaces PrefixList` entries, `#default` stored as "".
    inclusive_prefixes: Vec<String>,
}

impl Canonicalization {
    pub fn inclusive() -> Self {
        Self {
            exclusive: false,
            with_comments: false,
            inclusive_prefixes: Vec::new(),
        }
    }

    pub fn exclusive() -> Self {
        Self {
            exclusive: true,
            ..Self::inclusive()
        }
    }

    /// The method an algorithm URI names, or `None` for anything else.
    pub fn from_algorithm(uri: &str) -> Option<Self> {
        let (base, with_comments) = match uri {
            C14N_INCLUSIVE => (Self::inclusive(), false),
            C14N_INCLUSIVE_COMMENTS => (Self::inclusive(), true),
            C14N_EXCLUSIVE => (Self::exclusive(), false),
            C14N_EXCLUSIVE_COMMENTS => (Self::exclusive(), true),
            _ => return None,
        };
        Some(Self {
            with_comments,
            ..base
        })
    }

    /// Whitespace-separated prefixes to treat inclusively. Ignored by
    /// inclusive canonicalization, which renders every namespace anyway.
    pub fn with_prefix_list(mut self, list: &str) -> Self {
        self.inclusive_prefixes = list
            .split_whitespace()
            .map(|p| if p == "#default" { String::new() } else { p.to_string() })
            .collect();
        self
    }

    /// Same-document references drop comments even under `#WithComments`.
    pub fn without_comments(mut self) -> Self {
        self.with_comments = false;
        self
    }

    /// Canonical form of element `idx`, with `exclude` (when nested inside
    /// it) removed.
    pub fn canonicalize(&self, doc: &Document<'_>, idx: usize, exclude: Option<usize>) -> Result<String> {
        let source = doc.subtree_source(idx, exclude);
        let inherited: Vec<Binding> = doc
            .inherited_namespaces(idx)
            .into_iter()
            .map(|(key, uri)| (declared_prefix(&key).unwrap_or_default().to_string(), uri))
            .collect();

        let mut writer = Writer {
            method: self,
            out: String::with_capacity(source.len()),
            scopes: vec![inherited],
            rendered: vec![vec![(String::new(), String::new())]],
        };

        let mut reader = Reader::from_str(&source);
        reader.config_mut().trim_text(false);
        let mut depth = 0usize;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    writer.open(&e)?;
                    depth += 1;
                }
                Ok(Event::Empty(e)) => {
                    writer.open(&e)?;
                    writer.close(e.name().as_ref());
                }
                Ok(Event::End(e)) => {
                    writer.close(e.name().as_ref());
                    depth = depth.saturating_sub(1);
                }
                Ok(Event::Text(t)) if depth > 0 => {
                    let raw = std::str::from_utf8(&t)
                        .map_err(|e| failed(format!("text is not UTF-8: {e}")))?;
                    let normalized = normalize_line_ends(raw);
                    let text = unescape(&normalized)
                        .map_err(|e| failed(format!("malformed character reference: {e}")))?;
                    escape_text(&text, &mut writer.out);
                }
                Ok(Event::CData(c)) if depth > 0 => {
                    let raw = String::from_utf8_lossy(&c);
                    escape_text(&normalize_line_ends(&raw), &mut writer.out);
                }
                Ok(Event::Comment(c)) if depth > 0 && self.with_comments => {
                    writer.out.push_str("<!--");
                    writer.out.push_str(&normalize_line_ends(&String::from_utf8_lossy(&c)));
                    writer.out.push_str("-->");
                }
                Ok(Event::PI(pi)) if depth > 0 => {
                    writer.out.push_str("<?");
                    writer.out.push_str(&String::from_utf8_lossy(&pi));
                    writer.out.push_str("?>");
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(failed(format!("canonicalization failed: {e}"))),
            }
        }
        Ok(writer.out)
    }
}

/// Prefix declared by an attribute name: `Some("")` for `xmlns`,
/// `Some("p")` for `xmlns:p`, `None` for ordinary attributes.
fn declared_prefix(key: &str) -> Option<&str> {
    if key == "xmlns" {
        Some("")
    } else {
        key.strip_prefix("xmlns:")
    }
}

fn prefix_of(qname: &str) -> Option<&str> {
    qname.split_once(':').map(|(p, _)| p)
}

fn local_of(qname: &str) -> &str {
    qname.split_once(':').map_or(qname, |(_, l)| l)
}

fn normalize_line_ends(raw: &str) -> Cow<'_, str> {
    if raw.contains('\r') {
        Cow::Owned(raw.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(raw)
    }
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

struct Writer<'m> {
    method: &'m Canonicalization,
    out: String,
    /// Declarations made by each open element, innermost last; the first
    /// entry holds what the ancestors of the subtree put in scope.
    scopes: Vec<Vec<Binding>>,
    /// Namespace bindings in effect in the output at each open element.
    rendered: Vec<Vec<Binding>>,
}

impl Writer<'_> {
    fn in_scope(&self, prefix: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    fn all_in_scope(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self
            .scopes
            .iter()
            .flatten()
            .map(|(p, _)| p.clone())
            .collect();
        prefixes.sort();
        prefixes.dedup();
        prefixes
    }

    fn open(&mut self, e: &BytesStart<'_>) -> Result<()> {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();

        let mut declarations: Vec<Binding> = Vec::new();
        let mut attributes: Vec<(String, String)> = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| failed(format!("malformed attribute: {err}")))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let raw = String::from_utf8_lossy(&attr.value);
            let normalized = normalize_line_ends(&raw).replace(['\n', '\t'], " ");
            let value = unescape(&normalized)
                .map_err(|err| failed(format!("malformed attribute value: {err}")))?
                .into_owned();
            match declared_prefix(&key) {
                Some(prefix) => declarations.push((prefix.to_string(), value)),
                None => attributes.push((key, value)),
            }
        }
        self.scopes.push(declarations);

        let mut candidates: Vec<String> = if self.method.exclusive {
            let mut used = vec![prefix_of(&name).unwrap_or_default().to_string()];
            used.extend(
                attributes
                    .iter()
                    .filter_map(|(k, _)| prefix_of(k))
                    .map(str::to_string),
            );
            used.extend(self.method.inclusive_prefixes.iter().cloned());
            used
        } else {
            self.all_in_scope()
        };
        candidates.sort();
        candidates.dedup();

        let parent_rendered = self.rendered.last().cloned().unwrap_or_default();
        let mut emitted: Vec<Binding> = Vec::new();
        for prefix in candidates {
            if prefix == "xml" {
                continue;
            }
            let uri = match self.in_scope(&prefix) {
                Some(uri) => uri.to_string(),
                None if prefix.is_empty() => String::new(),
                None => continue,
            };
            if !prefix.is_empty() && uri.is_empty() {
                continue;
            }
            let current = parent_rendered
                .iter()
                .rev()
                .find(|(p, _)| *p == prefix)
                .map(|(_, u)| u.as_str());
            let already = match current {
                Some(u) => u == uri,
                None => uri.is_empty(),
            };
            if !already {
                emitted.push((prefix, uri));
            }
        }

        let mut sorted: Vec<(String, String, String)> = Vec::with_capacity(attributes.len());
        for (key, value) in attributes {
            let uri = match prefix_of(&key) {
                None => String::new(),
                Some("xml") => XML_NAMESPACE.to_string(),
                Some(p) => self
                    .in_scope(p)
                    .ok_or_else(|| failed(format!("undeclared namespace prefix {p}")))?
                    .to_string(),
            };
            sorted.push((uri, key, value));
        }
        sorted.sort_by(|a, b| (a.0.as_str(), local_of(&a.1)).cmp(&(b.0.as_str(), local_of(&b.1))));

        self.out.push('<');
        self.out.push_str(&name);
        for (prefix, uri) in &emitted {
            if prefix.is_empty() {
                self.out.push_str(" xmlns=\"");
            } else {
                self.out.push_str(" xmlns:");
                self.out.push_str(prefix);
                self.out.push_str("=\"");
            }
            escape_attr(uri, &mut self.out);
            self.out.push('"');
        }
        for (_, key, value) in &sorted {
            self.out.push(' ');
            self.out.push_str(key);
            self.out.push_str("=\"");
            escape_attr(value, &mut self.out);
            self.out.push('"');
        }
        self.out.push('>');

        let mut rendered = parent_rendered;
        rendered.extend(emitted);
        self.rendered.push(rendered);
        Ok(())
    }

    fn close(&mut self, name: &[u8]) {
        self.out.push_str("</");
        self.out.push_str(&String::from_utf8_lossy(name));
        self.out.push('>');
        self.scopes.pop();
        self.rendered.pop();
    }
}
