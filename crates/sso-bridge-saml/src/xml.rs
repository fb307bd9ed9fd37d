//! Minimal XML element index over a SAML document.
//!
//! One quick-xml pass records every element with its byte span, parent and
//! attributes. Response parsing and signature verification both work off this
//! index so that the bytes that get digested are exactly the bytes that were
//! parsed.

use std::borrow::Cow;

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use sso_bridge_core::error::{Result, SsoError};

#[derive(Debug, Clone)]
pub(crate) struct Element {
    /// Qualified name as written (`saml:Assertion`).
    pub name: String,
    pub local: String,
    /// Qualified attribute names with unescaped values.
    pub attrs: Vec<(String, String)>,
    pub start: usize,
    pub inner_start: usize,
    pub inner_end: usize,
    pub end: usize,
    pub parent: Option<usize>,
}

#[derive(Debug)]
pub(crate) struct Document<'a> {
    xml: &'a str,
    elements: Vec<Element>,
}

fn invalid(msg: impl Into<String>) -> SsoError {
    SsoError::InvalidSamlResponse(msg.into())
}

fn read_element(e: &BytesStart<'_>, start: usize, parent: Option<usize>) -> Result<Element> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();

    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| invalid(format!("malformed attribute: {err}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| invalid(format!("malformed attribute value: {err}")))?
            .into_owned();
        attrs.push((key, value));
    }

    Ok(Element {
        name,
        local,
        attrs,
        start,
        inner_start: start,
        inner_end: start,
        end: start,
        parent,
    })
}

impl<'a> Document<'a> {
    /// Index `xml`. DOCTYPE declarations are rejected outright.
    pub fn parse(xml: &'a str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(false);

        let mut elements: Vec<Element> = Vec::new();
        let mut stack: Vec<usize> = Vec::new();

        loop {
            let before = reader.buffer_position() as usize;
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let mut el = read_element(&e, before, stack.last().copied())?;
                    el.inner_start = reader.buffer_position() as usize;
                    elements.push(el);
                    stack.push(elements.len() - 1);
                }
                Ok(Event::Empty(e)) => {
                    let mut el = read_element(&e, before, stack.last().copied())?;
                    let after = reader.buffer_position() as usize;
                    el.inner_start = after;
                    el.inner_end = after;
                    el.end = after;
                    elements.push(el);
                }
                Ok(Event::End(_)) => {
                    let idx = stack.pop().ok_or_else(|| invalid("unbalanced end tag"))?;
                    elements[idx].inner_end = before;
                    elements[idx].end = reader.buffer_position() as usize;
                }
                Ok(Event::DocType(_)) => return Err(invalid("DOCTYPE is not allowed")),
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(invalid(format!("XML parse error: {e}"))),
            }
        }

        if !stack.is_empty() {
            return Err(invalid("unexpected end of document"));
        }
        if elements.is_empty() {
            return Err(invalid("document has no root element"));
        }

        Ok(Self { xml, elements })
    }

    pub fn root(&self) -> usize {
        0
    }

    pub fn element(&self, idx: usize) -> &Element {
        &self.elements[idx]
    }

    pub fn attr(&self, idx: usize, key: &str) -> Option<&str> {
        self.elements[idx]
            .attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn children(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.descendants(idx)
            .filter(move |&i| self.elements[i].parent == Some(idx))
    }

    /// Elements nested anywhere inside `idx`, in document order.
    pub fn descendants(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        let end = self.elements[idx].end;
        (idx + 1..self.elements.len()).take_while(move |&i| self.elements[i].start < end)
    }

    pub fn child(&self, idx: usize, local: &str) -> Option<usize> {
        self.children(idx).find(|&i| self.elements[i].local == local)
    }

    pub fn descendant(&self, idx: usize, local: &str) -> Option<usize> {
        self.descendants(idx).find(|&i| self.elements[i].local == local)
    }

    /// Every element with the given local name, anywhere in the document.
    pub fn all(&self, local: &str) -> Vec<usize> {
        (0..self.elements.len())
            .filter(|&i| self.elements[i].local == local)
            .collect()
    }

    /// The element carrying `ID="<id>"`. Duplicate ids are rejected.
    pub fn by_id(&self, id: &str) -> Result<Option<usize>> {
        let mut found = (0..self.elements.len()).filter(|&i| self.attr(i, "ID") == Some(id));
        let first = found.next();
        if found.next().is_some() {
            return Err(invalid(format!("duplicate ID {id}")));
        }
        Ok(first)
    }

    /// Whether `inner` is `outer` or nested inside it.
    pub fn contains(&self, outer: usize, inner: usize) -> bool {
        let (o, i) = (&self.elements[outer], &self.elements[inner]);
        i.start >= o.start && i.end <= o.end
    }

    /// Trimmed, unescaped text content of a leaf element.
    pub fn text(&self, idx: usize) -> String {
        let el = &self.elements[idx];
        let raw = &self.xml[el.inner_start..el.inner_end];
        unescape(raw)
            .unwrap_or(Cow::Borrowed(raw))
            .trim()
            .to_string()
    }

    /// Namespace declarations in scope at `idx` but declared on an ancestor.
    /// The nearest declaration of a prefix wins; result is sorted by name.
    pub fn inherited_namespaces(&self, idx: usize) -> Vec<(String, String)> {
        let is_decl = |k: &str| k == "xmlns" || k.starts_with("xmlns:");
        let mut seen: Vec<(String, String)> = self.elements[idx]
            .attrs
            .iter()
            .filter(|(k, _)| is_decl(k))
            .cloned()
            .collect();
        let own = seen.len();

        let mut cursor = self.elements[idx].parent;
        while let Some(p) = cursor {
            for (k, v) in &self.elements[p].attrs {
                if is_decl(k) && !seen.iter().any(|(s, _)| s == k) {
                    seen.push((k.clone(), v.clone()));
                }
            }
            cursor = self.elements[p].parent;
        }

        let mut inherited = seen.split_off(own);
        inherited.sort();
        inherited
    }

    /// Source text of `idx` exactly as written, with `exclude` (when nested
    /// inside it) cut out.
    pub fn subtree_source(&self, idx: usize, exclude: Option<usize>) -> String {
        let el = &self.elements[idx];
        match exclude.filter(|&x| x != idx && self.contains(idx, x)) {
            Some(x) => {
                let cut = &self.elements[x];
                format!(
                    "{}{}",
                    &self.xml[el.start..cut.start],
                    &self.xml[cut.end..el.end]
                )
            }
            None => self.xml[el.start..el.end].to_string(),
        }
    }
}
