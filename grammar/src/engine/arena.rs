//! The nodes built while a document is being parsed.
//!
//! Matches refer to their nodes by [`NodeId`], so handing out a memoized match never copies a
//! subtree.  Nodes are never modified once they are added, which means that one node can be
//! shared by any number of matches.  The owned [`Node`] tree is only built at the end of a run,
//! from the nodes which actually made it into the result.

use std::ops::Range;

use index_vec::IndexVec;

use crate::node::Node;

index_vec::define_index_type! { pub(super) struct NodeId = usize; }

#[derive(Debug, Clone)]
pub(super) struct RawNode<'g> {
    pub(super) tag: &'g str,
    pub(super) kind: Kind,
    pub(super) pos: usize,
    pub(super) end: usize,
    pub(super) disposable: bool,
}

#[derive(Debug, Clone)]
pub(super) enum Kind {
    /// The byte range of the source text which the leaf holds
    Leaf(Range<usize>),
    /// Never empty
    Branch(Vec<NodeId>),
}

impl<'g> RawNode<'g> {
    pub(super) fn leaf(tag: &'g str, text: Range<usize>) -> Self {
        Self {
            tag,
            pos: text.start,
            end: text.end,
            kind: Kind::Leaf(text),
            disposable: false,
        }
    }

    pub(super) fn branch(tag: &'g str, children: Vec<NodeId>, span: Range<usize>) -> Self {
        Self {
            tag,
            kind: Kind::Branch(children),
            pos: span.start,
            end: span.end,
            disposable: false,
        }
    }

    pub(super) fn with_span(mut self, span: Range<usize>) -> Self {
        self.pos = span.start;
        self.end = span.end;
        self
    }

    pub(super) fn with_disposable(mut self, disposable: bool) -> Self {
        self.disposable = disposable;
        self
    }

    pub(super) fn is_empty_leaf(&self) -> bool {
        matches!(&self.kind, Kind::Leaf(text) if text.is_empty())
    }
}

#[derive(Debug, Default)]
pub(super) struct Arena<'g> {
    nodes: IndexVec<NodeId, RawNode<'g>>,
}

impl<'g> Arena<'g> {
    pub(super) fn add(&mut self, node: RawNode<'g>) -> NodeId {
        self.nodes.push(node)
    }

    pub(super) fn get(&self, id: NodeId) -> &RawNode<'g> {
        &self.nodes[id]
    }

    /// Adds a copy of a node under a different tag and span.  Like [`Node::set_tag`], this makes
    /// the copy non-disposable unless the new tag is anonymous.
    pub(super) fn retag(&mut self, id: NodeId, tag: &'g str, span: Range<usize>) -> NodeId {
        let node = RawNode {
            tag,
            ..self.nodes[id].clone()
        }
        .with_span(span)
        .with_disposable(tag.starts_with(':'));
        self.add(node)
    }

    pub(super) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// The text covered by the leaves below `id`
    pub(super) fn content(&self, id: NodeId, text: &str) -> String {
        let mut out = String::new();
        self.write_content(id, text, &mut out);
        out
    }

    fn write_content(&self, id: NodeId, text: &str, out: &mut String) {
        match &self.nodes[id].kind {
            Kind::Leaf(range) => out.push_str(&text[range.clone()]),
            Kind::Branch(children) => {
                for &child in children {
                    self.write_content(child, text, out);
                }
            }
        }
    }

    /// Builds the owned tree rooted at `id`
    pub(super) fn build(&self, id: NodeId, text: &str) -> Node {
        let raw = &self.nodes[id];
        let node = match &raw.kind {
            Kind::Leaf(range) => Node::leaf(raw.tag, &text[range.clone()]),
            Kind::Branch(children) => Node::branch(
                raw.tag,
                children.iter().map(|&child| self.build(child, text)).collect(),
            ),
        };
        node.with_span(raw.pos, raw.end - raw.pos)
            .with_disposable(raw.disposable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_nodes() {
        let text = "ab";
        let mut arena = Arena::default();
        let a = arena.add(RawNode::leaf("a", 0..1));
        let b = arena.add(RawNode::leaf(":Text", 1..2).with_disposable(true));
        let pair = arena.add(RawNode::branch("pair", vec![a, b], 0..2));
        // The same node appears twice in the tree
        let twice = arena.add(RawNode::branch("twice", vec![pair, pair], 0..2));
        let renamed = arena.retag(b, "b", 1..2);

        assert_eq!(arena.content(twice, text), "abab");
        assert_eq!(
            arena.build(twice, text).as_flat_sxpr(),
            r#"(twice (pair (a "a") (:Text "b")) (pair (a "a") (:Text "b")))"#
        );
        assert!(arena.get(b).disposable);
        assert!(!arena.get(renamed).disposable);
        assert_eq!(arena.build(renamed, text).as_flat_sxpr(), r#"(b "b")"#);
        assert_eq!(arena.len(), 5);
    }
}
