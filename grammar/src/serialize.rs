//! Serialization of syntax trees into S-expressions, XML, indented trees and JSON, plus a reader
//! for S-expressions (which is very useful for writing down expected trees in tests).
//!
//! All formats keep the tag names, leaf contents and child order of a tree, but none of them
//! guarantee bit-exact round trips.

use std::{
    borrow::Cow,
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::Deserialize;
use serde_json::{json, Value};

use crate::{config::Config, node::Node};

/// The supported tree serializations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Serialization {
    Sxpr,
    Xml,
    Tree,
    Json,
}

impl Serialization {
    /// The file extension used when writing trees in this format
    pub fn extension(self) -> &'static str {
        match self {
            Serialization::Sxpr => "sxpr",
            Serialization::Xml => "xml",
            Serialization::Tree => "tree",
            Serialization::Json => "json",
        }
    }
}

impl FromStr for Serialization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "sxpr" | "s-expression" => Serialization::Sxpr,
            "xml" => Serialization::Xml,
            "tree" | "indented" => Serialization::Tree,
            "json" => Serialization::Json,
            _ => return Err(format!("unknown serialization {:?}", s)),
        })
    }
}

impl Display for Serialization {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl Node {
    /// Serialize this tree in a given format
    pub fn serialize(&self, how: Serialization, config: &Config) -> String {
        match how {
            Serialization::Sxpr => self.as_sxpr(config.flatten_sxpr_threshold),
            Serialization::Xml => self.as_xml(),
            Serialization::Tree => self.as_tree(),
            Serialization::Json => {
                // Serializing a `Value` can't fail
                serde_json::to_string_pretty(&self.as_json(true)).unwrap_or_default()
            }
        }
    }

    /////////////////
    // S-EXPRESSION //
    /////////////////

    /// Serialize this tree as an S-expression.  Any sub-tree whose single-line form is at most
    /// `flatten_threshold` bytes long is written on one line.
    pub fn as_sxpr(&self, flatten_threshold: usize) -> String {
        let mut out = String::new();
        write_sxpr(self, 0, flatten_threshold, &mut out);
        out
    }

    /// Serialize this tree as a single-line S-expression
    pub fn as_flat_sxpr(&self) -> String {
        let mut out = String::new();
        write_flat_sxpr(self, &mut out);
        out
    }

    /////////
    // XML //
    /////////

    pub fn as_xml(&self) -> String {
        let mut out = String::new();
        write_xml(self, 0, &mut out);
        out
    }

    ///////////////////
    // INDENTED TREE //
    ///////////////////

    /// Serialize this tree with one node per line, indenting children by two spaces
    pub fn as_tree(&self) -> String {
        let mut out = String::new();
        write_tree(self, 0, &mut out);
        out
    }

    //////////
    // JSON //
    //////////

    /// Convert this tree into a JSON array `[tag, content-or-children]`, followed by the source
    /// position if `include_pos` is set.
    pub fn as_json(&self, include_pos: bool) -> Value {
        let payload = if self.is_leaf() {
            Value::String(self.text().to_owned())
        } else {
            Value::Array(
                self.children()
                    .iter()
                    .map(|child| child.as_json(include_pos))
                    .collect(),
            )
        };
        if include_pos {
            json!([self.tag(), payload, self.pos()])
        } else {
            json!([self.tag(), payload])
        }
    }
}

fn write_sxpr(node: &Node, depth: usize, flatten_threshold: usize, out: &mut String) {
    let flat = node.as_flat_sxpr();
    if node.is_leaf() || flat.len() <= flatten_threshold {
        out.push_str(&flat);
        return;
    }
    out.push('(');
    out.push_str(node.tag());
    for child in node.children() {
        out.push('\n');
        push_indent(out, depth + 1);
        write_sxpr(child, depth + 1, flatten_threshold, out);
    }
    out.push(')');
}

fn write_flat_sxpr(node: &Node, out: &mut String) {
    out.push('(');
    out.push_str(node.tag());
    if node.is_leaf() {
        out.push(' ');
        out.push_str(&quote(node.text()));
    } else {
        for child in node.children() {
            out.push(' ');
            write_flat_sxpr(child, out);
        }
    }
    out.push(')');
}

/// Quote a string for an S-expression: `"..."` if possible, `'...'` if the string contains
/// double quotes or backslashes, and escaped double quotes if it contains both kinds of quotes.
fn quote(s: &str) -> String {
    if !s.contains('"') && !s.contains('\\') {
        format!("\"{}\"", s)
    } else if !s.contains('\'') {
        format!("'{}'", s)
    } else {
        format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

fn write_xml(node: &Node, depth: usize, out: &mut String) {
    let tag = xml_tag_name(node.tag());
    push_indent(out, depth);
    if node.is_leaf() {
        if node.text().is_empty() {
            out.push_str(&format!("<{}/>", tag));
        } else {
            out.push_str(&format!("<{tag}>{}</{tag}>", escape_xml(node.text()), tag = tag));
        }
        return;
    }
    out.push_str(&format!("<{}>", tag));
    for child in node.children() {
        out.push('\n');
        write_xml(child, depth + 1, out);
    }
    out.push('\n');
    push_indent(out, depth);
    out.push_str(&format!("</{}>", tag));
}

/// The name under which a tag is written as XML.  Anonymous tags (`:Text`) aren't valid XML
/// names, so they become `ANONYMOUS_Text__`.
pub fn xml_tag_name(tag: &str) -> Cow<'_, str> {
    match tag.strip_prefix(':') {
        Some(name) => Cow::Owned(format!("ANONYMOUS_{}__", name)),
        None => Cow::Borrowed(tag),
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn write_tree(node: &Node, depth: usize, out: &mut String) {
    if depth > 0 {
        out.push('\n');
    }
    push_indent(out, depth);
    out.push_str(node.tag());
    if node.is_leaf() {
        out.push(' ');
        out.push_str(&quote(node.text()));
    }
    for child in node.children() {
        write_tree(child, depth + 1, out);
    }
}

fn push_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

////////////////////////
// S-EXPRESSION INPUT //
////////////////////////

/// The ways that reading an S-expression can fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SxprError {
    /// The input ended before the expression was complete
    UnexpectedEnd,
    /// An unexpected character was found at a given byte offset
    Unexpected { pos: usize, found: char },
    /// A node was opened without a tag name
    MissingTag { pos: usize },
    /// There was more input after the first complete expression
    TrailingInput { pos: usize },
}

impl Display for SxprError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SxprError::UnexpectedEnd => write!(f, "S-expression ended unexpectedly"),
            SxprError::Unexpected { pos, found } => {
                write!(f, "unexpected {:?} at offset {}", found, pos)
            }
            SxprError::MissingTag { pos } => write!(f, "missing tag name at offset {}", pos),
            SxprError::TrailingInput { pos } => write!(f, "trailing input at offset {}", pos),
        }
    }
}

impl std::error::Error for SxprError {}

/// Reads a tree from an S-expression such as `(expr (num "1") (op "+") (num "2"))`.  Bare atoms
/// are read as content, so `(expr 1)` is a leaf `expr` with content `1`.  If a node contains both
/// strings and sub-nodes, the strings become anonymous `:Text` leaves.  Tags which start with `:`
/// produce disposable nodes.
pub fn parse_sxpr(s: &str) -> Result<Node, SxprError> {
    let mut reader = SxprReader { src: s, pos: 0 };
    let node = reader.node()?;
    reader.skip_whitespace();
    if reader.pos < s.len() {
        return Err(SxprError::TrailingInput { pos: reader.pos });
    }
    Ok(node)
}

/// A piece of a node's body: either a sub-node or a piece of content
enum Item {
    Node(Node),
    Content(String),
}

struct SxprReader<'s> {
    src: &'s str,
    pos: usize,
}

impl<'s> SxprReader<'s> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().map_or(false, char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), SxprError> {
        match self.bump() {
            Some(ch) if ch == expected => Ok(()),
            Some(found) => Err(SxprError::Unexpected {
                pos: self.pos - found.len_utf8(),
                found,
            }),
            None => Err(SxprError::UnexpectedEnd),
        }
    }

    fn node(&mut self) -> Result<Node, SxprError> {
        self.skip_whitespace();
        self.expect('(')?;
        self.skip_whitespace();
        let tag_pos = self.pos;
        let tag = self.atom();
        if tag.is_empty() {
            return Err(SxprError::MissingTag { pos: tag_pos });
        }

        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Err(SxprError::UnexpectedEnd),
                Some(')') => {
                    self.bump();
                    break;
                }
                Some('(') => items.push(Item::Node(self.node()?)),
                Some(q @ '"') | Some(q @ '\'') => items.push(Item::Content(self.string(q)?)),
                Some(_) => items.push(Item::Content(self.atom().to_owned())),
            }
        }

        let disposable = tag.starts_with(':');
        let node = if items.iter().all(|item| matches!(item, Item::Content(_))) {
            let text: String = items
                .into_iter()
                .map(|item| match item {
                    Item::Content(s) => s,
                    Item::Node(_) => String::new(),
                })
                .collect();
            Node::leaf(tag, text)
        } else {
            let children = items
                .into_iter()
                .map(|item| match item {
                    Item::Node(n) => n,
                    Item::Content(s) => Node::leaf(":Text", s).with_disposable(true),
                })
                .collect();
            Node::branch(tag, children)
        };
        Ok(node.with_disposable(disposable))
    }

    /// Reads a bare word, stopping at whitespace, brackets or quotes
    fn atom(&mut self) -> &'s str {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() || "()\"'".contains(ch) {
                break;
            }
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn string(&mut self, quote: char) -> Result<String, SxprError> {
        self.expect(quote)?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(SxprError::UnexpectedEnd),
                Some(ch) if ch == quote => return Ok(out),
                // Only double-quoted strings contain escapes
                Some('\\') if quote == '"' => match self.bump() {
                    Some(escaped) => out.push(escaped),
                    None => return Err(SxprError::UnexpectedEnd),
                },
                Some(ch) => out.push(ch),
            }
        }
    }
}
