//! Namespace-aware XML tree and Exclusive XML Canonicalization.
//!
//! Signature checking needs the exact octets the IdP signed, so the parser
//! keeps whitespace text nodes and resolves every prefix while it reads.
//! Comments and processing instructions are dropped (c14n without comments);
//! DOCTYPE declarations are refused outright.

use crate::errors::{AuthError, Result};
use quick_xml::{Reader, events::Event};
use std::collections::{BTreeMap, BTreeSet};

pub const NS_SAML_PROTOCOL: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
pub const NS_SAML_ASSERTION: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const NS_XML_DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const NS_XML: &str = "http://www.w3.org/XML/1998/namespace";

/// Attributes treated as XML IDs when resolving same-document references.
const ID_ATTRIBUTES: [&str; 3] = ["ID", "Id", "id"];

/// Deepest element nesting accepted. Tree walks recurse once per level.
pub const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace: Option<String>,
    pub value: String,
}

impl Attribute {
    fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.local_name),
            None => self.local_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace: Option<String>,
    /// `xmlns` declarations made on this element; the default namespace has prefix `""`
    pub namespace_decls: Vec<(String, String)>,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.local_name),
            None => self.local_name.clone(),
        }
    }

    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == Some(namespace)
    }

    /// Value of an unqualified attribute.
    pub fn attr(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.is_none() && a.local_name == local_name)
            .map(|a| a.value.as_str())
    }

    pub fn id(&self) -> Option<&str> {
        ID_ATTRIBUTES.iter().find_map(|name| self.attr(name))
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        local_name: &'a str,
    ) -> impl Iterator<Item = &'a Element> {
        self.child_elements()
            .filter(move |e| e.is(namespace, local_name))
    }

    pub fn child(&self, namespace: &str, local_name: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.is(namespace, local_name))
    }

    /// Concatenated text content of this element and its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    /// All descendant elements (not including `self`) in document order.
    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        self.collect_descendants(&mut out);
        out
    }

    fn collect_descendants<'a>(&'a self, out: &mut Vec<&'a Element>) {
        for child in self.child_elements() {
            out.push(child);
            child.collect_descendants(out);
        }
    }
}

/// A parsed XML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub root: Element,
}

fn xml_error(message: impl std::fmt::Display) -> AuthError {
    AuthError::malformed_response(format!("XML: {message}"))
}

type Scope = BTreeMap<String, String>;

impl Document {
    pub fn parse(xml: &str) -> Result<Self> {
        // XML end-of-line handling happens before anything else sees the text.
        let normalized = xml.replace("\r\n", "\n").replace('\r', "\n");

        let mut reader = Reader::from_str(&normalized);
        reader.config_mut().trim_text(false);

        let mut stack: Vec<(Element, Scope)> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let event = reader.read_event().map_err(xml_error)?;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    if root.is_some() {
                        return Err(xml_error("content after the document element"));
                    }
                    let parent_scope = stack.last().map(|(_, s)| s.clone()).unwrap_or_default();
                    let (element, scope) = start_element(e, parent_scope)?;
                    if matches!(event, Event::Empty(_)) {
                        close_element(&mut stack, &mut root, element);
                    } else {
                        if stack.len() >= MAX_DEPTH {
                            return Err(xml_error("nesting too deep"));
                        }
                        stack.push((element, scope));
                    }
                }
                Event::End(_) => {
                    let (element, _) = stack
                        .pop()
                        .ok_or_else(|| xml_error("unbalanced end tag"))?;
                    close_element(&mut stack, &mut root, element);
                }
                Event::Text(ref t) => {
                    let text = t.unescape().map_err(xml_error)?;
                    push_text(&mut stack, &text)?;
                }
                Event::CData(ref c) => {
                    let text = std::str::from_utf8(c).map_err(xml_error)?;
                    push_text(&mut stack, text)?;
                }
                Event::DocType(_) => return Err(xml_error("DOCTYPE is not allowed")),
                Event::Comment(_) | Event::PI(_) | Event::Decl(_) => {}
                Event::Eof => break,
            }
        }

        if !stack.is_empty() {
            return Err(xml_error("unexpected end of document"));
        }
        let root = root.ok_or_else(|| xml_error("document has no root element"))?;
        Ok(Self { root })
    }

    /// The unique element carrying `id`; zero or several matches are an error.
    pub fn find_by_id(&self, id: &str) -> Result<&Element> {
        let mut matches = std::iter::once(&self.root)
            .chain(self.root.descendants())
            .filter(|e| ID_ATTRIBUTES.iter().any(|name| e.attr(name) == Some(id)));

        let found = matches
            .next()
            .ok_or_else(|| AuthError::invalid_signature(format!("no element with ID {id}")))?;
        if matches.next().is_some() {
            return Err(AuthError::invalid_signature(format!(
                "ID {id} appears more than once"
            )));
        }
        Ok(found)
    }

    /// Namespaces in scope at `target`, excluding its own declarations.
    pub fn inherited_namespaces(&self, target: &Element) -> Option<BTreeMap<String, String>> {
        let mut path = Vec::new();
        if !path_to(&self.root, target, &mut path) {
            return None;
        }
        let mut scope = BTreeMap::new();
        for ancestor in &path[..path.len() - 1] {
            for (prefix, uri) in &ancestor.namespace_decls {
                scope.insert(prefix.clone(), uri.clone());
            }
        }
        Some(scope)
    }
}

fn path_to<'a>(current: &'a Element, target: &Element, path: &mut Vec<&'a Element>) -> bool {
    path.push(current);
    if std::ptr::eq(current, target) {
        return true;
    }
    for child in current.child_elements() {
        if path_to(child, target, path) {
            return true;
        }
    }
    path.pop();
    false
}

fn push_text(stack: &mut [(Element, Scope)], text: &str) -> Result<()> {
    match stack.last_mut() {
        Some((element, _)) => {
            if let Some(Node::Text(prev)) = element.children.last_mut() {
                prev.push_str(text);
            } else {
                element.children.push(Node::Text(text.to_string()));
            }
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(xml_error("text outside the document element")),
    }
}

fn close_element(stack: &mut [(Element, Scope)], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some((parent, _)) => parent.children.push(Node::Element(element)),
        None => *root = Some(element),
    }
}

fn split_name(name: &str) -> (Option<String>, String) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
        None => (None, name.to_string()),
    }
}

fn resolve(scope: &Scope, prefix: Option<&str>) -> Result<Option<String>> {
    match prefix {
        Some("xml") => Ok(Some(NS_XML.to_string())),
        Some(p) => scope
            .get(p)
            .filter(|uri| !uri.is_empty())
            .cloned()
            .map(Some)
            .ok_or_else(|| xml_error(format!("undeclared namespace prefix {p}"))),
        None => Ok(scope.get("").filter(|uri| !uri.is_empty()).cloned()),
    }
}

/// Literal whitespace in attribute values becomes a space; character
/// references are expanded afterwards so `&#xA;` survives.
fn attribute_value(raw: &[u8]) -> Result<String> {
    let raw = std::str::from_utf8(raw).map_err(xml_error)?;
    let normalized = raw.replace(['\t', '\n', '\r'], " ");
    let value = quick_xml::escape::unescape(&normalized).map_err(xml_error)?;
    Ok(value.into_owned())
}

fn start_element(
    start: &quick_xml::events::BytesStart<'_>,
    mut scope: Scope,
) -> Result<(Element, Scope)> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(xml_error)?
        .to_string();

    let mut namespace_decls = Vec::new();
    let mut raw_attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(xml_error)?
            .to_string();
        let value = attribute_value(&attr.value)?;

        if key == "xmlns" {
            namespace_decls.push((String::new(), value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            namespace_decls.push((prefix.to_string(), value));
        } else {
            raw_attributes.push((key, value));
        }
    }

    for (prefix, uri) in &namespace_decls {
        scope.insert(prefix.clone(), uri.clone());
    }

    let (prefix, local_name) = split_name(&name);
    let namespace = resolve(&scope, prefix.as_deref())?;

    let mut attributes = Vec::with_capacity(raw_attributes.len());
    for (key, value) in raw_attributes {
        let (prefix, local_name) = split_name(&key);
        let namespace = match prefix.as_deref() {
            Some(_) => resolve(&scope, prefix.as_deref())?,
            None => None,
        };
        attributes.push(Attribute {
            prefix,
            local_name,
            namespace,
            value,
        });
    }

    Ok((
        Element {
            prefix,
            local_name,
            namespace,
            namespace_decls,
            attributes,
            children: Vec::new(),
        },
        scope,
    ))
}

/// Exclusive XML Canonicalization 1.0 (without comments).
#[derive(Debug, Default)]
pub struct ExclusiveCanonicalizer<'a> {
    /// Element left out of the output (enveloped-signature transform)
    exclude: Option<&'a Element>,
    /// `InclusiveNamespaces PrefixList`; `#default` is the default namespace
    inclusive_prefixes: BTreeSet<String>,
}

impl<'a> ExclusiveCanonicalizer<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn excluding(mut self, element: &'a Element) -> Self {
        self.exclude = Some(element);
        self
    }

    pub fn with_inclusive_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inclusive_prefixes = prefixes
            .into_iter()
            .map(|p| match p.as_ref() {
                "#default" => String::new(),
                other => other.to_string(),
            })
            .collect();
        self
    }

    /// Canonical form of the subtree rooted at `target` within `document`.
    pub fn canonicalize(&self, document: &Document, target: &Element) -> Result<String> {
        let inherited = document
            .inherited_namespaces(target)
            .ok_or_else(|| AuthError::internal("element is not part of the document"))?;
        let mut out = String::new();
        self.render(target, &inherited, &BTreeMap::new(), &mut out);
        Ok(out)
    }

    fn render(
        &self,
        element: &Element,
        parent_scope: &Scope,
        rendered: &Scope,
        out: &mut String,
    ) {
        let mut scope = parent_scope.clone();
        for (prefix, uri) in &element.namespace_decls {
            scope.insert(prefix.clone(), uri.clone());
        }

        let mut used: BTreeSet<String> = BTreeSet::new();
        used.insert(element.prefix.clone().unwrap_or_default());
        for attr in &element.attributes {
            if let Some(prefix) = &attr.prefix {
                used.insert(prefix.clone());
            }
        }
        for prefix in &self.inclusive_prefixes {
            if scope.contains_key(prefix) {
                used.insert(prefix.clone());
            }
        }
        used.remove("xml");

        let mut to_render: Vec<(String, String)> = Vec::new();
        for prefix in used {
            let uri = scope.get(&prefix).cloned().unwrap_or_default();
            let already = rendered.get(&prefix);
            let needed = if prefix.is_empty() && uri.is_empty() {
                already.is_some_and(|v| !v.is_empty())
            } else {
                already != Some(&uri)
            };
            if needed {
                to_render.push((prefix, uri));
            }
        }

        let mut attributes: Vec<&Attribute> = element.attributes.iter().collect();
        attributes.sort_by(|a, b| {
            let ka = (a.namespace.as_deref().unwrap_or(""), a.local_name.as_str());
            let kb = (b.namespace.as_deref().unwrap_or(""), b.local_name.as_str());
            ka.cmp(&kb)
        });

        let name = element.qualified_name();
        out.push('<');
        out.push_str(&name);
        for (prefix, uri) in &to_render {
            if prefix.is_empty() {
                out.push_str(" xmlns=\"");
            } else {
                out.push_str(" xmlns:");
                out.push_str(prefix);
                out.push_str("=\"");
            }
            escape_attribute(uri, out);
            out.push('"');
        }
        for attr in attributes {
            out.push(' ');
            out.push_str(&attr.qualified_name());
            out.push_str("=\"");
            escape_attribute(&attr.value, out);
            out.push('"');
        }
        out.push('>');

        let mut child_rendered = rendered.clone();
        for (prefix, uri) in to_render {
            child_rendered.insert(prefix, uri);
        }

        for node in &element.children {
            match node {
                Node::Text(text) => escape_text(text, out),
                Node::Element(child) => {
                    if self.exclude.is_some_and(|ex| std::ptr::eq(ex, child)) {
                        continue;
                    }
                    self.render(child, &scope, &child_rendered, out);
                }
            }
        }

        out.push_str("</");
        out.push_str(&name);
        out.push('>');
    }
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}
