//! The syntax tree produced by the engine, rewritten in place by the transformer and read by the
//! compiler.

use std::ops::Range;

use crate::error::Error;

/// The tag given to nodes which hold text that the engine had to skip over in order to recover
/// from a parsing error.
pub const ZOMBIE_TAG: &str = "ZOMBIE__";

/// A node of a syntax tree.  A `Node` is either a **leaf** (no children, with its own content
/// string) or a **branch**, whose content is the concatenation of the contents of its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    tag: String,
    children: Vec<Node>,
    /// The content of a leaf.  **Invariant**: empty whenever `children` is non-empty.
    text: String,
    /// Byte range of the source text from which this node was parsed
    pos: usize,
    len: usize,
    errors: Vec<Error>,
    /// `true` for nodes which only exist because of the way the grammar was composed (anonymous
    /// parsers or rules marked as disposable).  These are removed by the transformer.
    disposable: bool,
}

impl Node {
    /// Creates a leaf node.  Its span starts at `0` and covers the text.
    pub fn leaf(tag: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            tag: tag.into(),
            children: Vec::new(),
            len: text.len(),
            text,
            pos: 0,
            errors: Vec::new(),
            disposable: false,
        }
    }

    /// Creates a branch node.  Its span covers the spans of its children.
    pub fn branch(tag: impl Into<String>, children: Vec<Node>) -> Self {
        let (pos, len) = match (children.first(), children.last()) {
            (Some(first), Some(last)) => (first.pos, last.end().saturating_sub(first.pos)),
            _ => (0, 0),
        };
        Self {
            tag: tag.into(),
            children,
            text: String::new(),
            pos,
            len,
            errors: Vec::new(),
            disposable: false,
        }
    }

    pub fn with_span(mut self, pos: usize, len: usize) -> Self {
        self.pos = pos;
        self.len = len;
        self
    }

    pub fn with_disposable(mut self, disposable: bool) -> Self {
        self.disposable = disposable;
        self
    }

    pub fn with_error(mut self, error: Error) -> Self {
        self.errors.push(error);
        self
    }

    /////////////////
    // TAG & FLAGS //
    /////////////////

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Renames this node.  Renaming a node to a tag makes it a regular (i.e. non-disposable)
    /// node, unless it is renamed to an anonymous (`:`-prefixed) tag.
    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.tag = tag.into();
        self.disposable = self.tag.starts_with(':');
    }

    pub fn is_disposable(&self) -> bool {
        self.disposable
    }

    pub fn set_disposable(&mut self, disposable: bool) {
        self.disposable = disposable;
    }

    //////////////
    // CHILDREN //
    //////////////

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<Node> {
        &mut self.children
    }

    /// Removes and returns all the children of this node, turning it into an empty leaf
    pub fn take_children(&mut self) -> Vec<Node> {
        std::mem::take(&mut self.children)
    }

    /// Replaces the result of this node by a list of children (discarding any leaf content)
    pub fn set_children(&mut self, children: Vec<Node>) {
        self.text.clear();
        self.children = children;
    }

    /////////////
    // CONTENT //
    /////////////

    /// The content of a leaf node.  Returns `""` for branches (see [`Node::content`]).
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replaces the result of this node by a string (discarding any children)
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children.clear();
        self.text = text.into();
    }

    /// The content of this node: its own text for leaves, or the concatenated content of all
    /// its leaves for branches.
    pub fn content(&self) -> String {
        if self.is_leaf() {
            return self.text.clone();
        }
        let mut s = String::new();
        self.write_content(&mut s);
        s
    }

    /// Appends the content of this node to `out`
    pub fn write_content(&self, out: &mut String) {
        if self.is_leaf() {
            out.push_str(&self.text);
        } else {
            for child in &self.children {
                child.write_content(out);
            }
        }
    }

    /// Returns `true` if this node's content is the empty string
    pub fn is_empty(&self) -> bool {
        self.leaves().all(|leaf| leaf.text.is_empty())
    }

    //////////
    // SPAN //
    //////////

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// The byte offset directly after the source text covered by this node
    pub fn end(&self) -> usize {
        self.pos + self.len
    }

    pub fn span(&self) -> Range<usize> {
        self.pos..self.end()
    }

    ////////////
    // ERRORS //
    ////////////

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn add_error(&mut self, error: Error) {
        self.errors.push(error);
    }

    /// Removes the errors attached to this node itself (not those of its descendants)
    pub fn take_errors(&mut self) -> Vec<Error> {
        std::mem::take(&mut self.errors)
    }

    /// Clones every error attached to this node or any of its descendants, in document order
    pub fn collect_errors(&self) -> Vec<Error> {
        self.descendants()
            .flat_map(|node| node.errors.iter().cloned())
            .collect()
    }

    /// Like [`Node::collect_errors`], but removes the errors from the tree
    pub fn drain_errors(&mut self) -> Vec<Error> {
        let mut errors = std::mem::take(&mut self.errors);
        for child in &mut self.children {
            errors.extend(child.drain_errors());
        }
        errors
    }

    ///////////////
    // ITERATION //
    ///////////////

    /// Iterates over this node and all its descendants in pre-order (i.e. document order)
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }

    /// Iterates over the leaves of this tree, in document order
    pub fn leaves(&self) -> impl Iterator<Item = &Node> + '_ {
        self.descendants().filter(|node| node.is_leaf())
    }

    /// Iterates over every node in this tree (including `self`) with a given tag
    pub fn select<'n>(&'n self, tag: &'n str) -> impl Iterator<Item = &'n Node> + 'n {
        self.descendants().filter(move |node| node.tag == tag)
    }

    /// The first node in this tree (in document order) with a given tag
    pub fn pick(&self, tag: &str) -> Option<&Node> {
        self.descendants().find(|node| node.tag == tag)
    }
}

/// Pre-order iterator over a tree, created by [`Node::descendants`]
#[derive(Debug, Clone)]
pub struct Descendants<'n> {
    stack: Vec<&'n Node>,
}

impl<'n> Iterator for Descendants<'n> {
    type Item = &'n Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        // Push the children in reverse so that the first child is visited next
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}
