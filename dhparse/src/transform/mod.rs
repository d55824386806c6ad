//! The transformer, which rewrites the concrete syntax tree produced by the parser into an
//! abstract syntax tree.
//!
//! A transformation is described by [`RuleTable`]s, each of which maps node tags to lists of
//! [`Rewrite`]s.  Tables are applied one after another by a [`Transformer`], which finally sweeps
//! away every disposable node that the tables left behind.

use std::{
    collections::HashMap,
    fmt::{Debug, Display, Formatter},
    sync::Arc,
};

use dhparse_grammar::Node;

use self::primitives::WHITESPACE_TAG;

mod named;
pub mod primitives;

pub use named::{
    named_condition, named_rewrite, table_from_spec, RewriteArg, RewriteSpec, TableSpec,
};

/// An in-place rewrite of one node.  The second argument holds the tags of the node's ancestors,
/// outermost first.
pub type Rewrite = Arc<dyn Fn(&mut Node, &[String]) + Send + Sync>;
/// A predicate over a node and the tags of its ancestors
pub type Condition = Arc<dyn Fn(&Node, &[String]) -> bool + Send + Sync>;

pub fn rewrite(f: impl Fn(&mut Node, &[String]) + Send + Sync + 'static) -> Rewrite {
    Arc::new(f)
}

pub fn condition(f: impl Fn(&Node, &[String]) -> bool + Send + Sync + 'static) -> Condition {
    Arc::new(f)
}

/// Maps tags to the [`Rewrite`]s which are applied to nodes with that tag.
///
/// Besides plain tags, a key can be:
/// - a comma separated list of tags, which all share the same rewrites
/// - `*`, whose rewrites apply to every node without a specific entry
/// - `<` (or `+`), whose rewrites apply to every node before its specific rewrites
/// - `>` (or `~`), whose rewrites apply to every node after its children have been visited
#[derive(Clone, Default)]
pub struct RuleTable {
    rules: HashMap<String, Vec<Rewrite>>,
    wildcard: Option<Vec<Rewrite>>,
    pre: Option<Vec<Rewrite>>,
    post: Option<Vec<Rewrite>>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<K: AsRef<str>>(
        entries: impl IntoIterator<Item = (K, Vec<Rewrite>)>,
    ) -> TableResult<Self> {
        let mut table = Self::new();
        for (key, rewrites) in entries {
            table.add(key.as_ref(), rewrites)?;
        }
        Ok(table)
    }

    /// Adds an entry to this table.  Every tag (or marker) may only be given once.
    pub fn add(&mut self, key: &str, rewrites: Vec<Rewrite>) -> TableResult<()> {
        for part in key.split(',').map(str::trim) {
            let slot = match part {
                "" => return Err(TableError::EmptyKey(key.to_owned())),
                "*" => &mut self.wildcard,
                "<" | "+" => &mut self.pre,
                ">" | "~" => &mut self.post,
                tag => {
                    if self.rules.contains_key(tag) {
                        return Err(TableError::DuplicateKey(tag.to_owned()));
                    }
                    self.rules.insert(tag.to_owned(), rewrites.clone());
                    continue;
                }
            };
            if slot.is_some() {
                return Err(TableError::DuplicateKey(part.to_owned()));
            }
            *slot = Some(rewrites.clone());
        }
        Ok(())
    }

    /// The rewrites applied to nodes tagged `tag`: either its specific rules or the wildcard's
    pub fn rules_for(&self, tag: &str) -> &[Rewrite] {
        match self.rules.get(tag) {
            Some(rewrites) => rewrites,
            None => self.wildcard.as_deref().unwrap_or(&[]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.wildcard.is_none() && self.pre.is_none() && self.post.is_none()
    }

    /// Rewrites `tree` in place according to this table
    pub fn apply(&self, tree: &mut Node) {
        self.traverse(tree, &mut Vec::new());
    }

    /// Visits `node` and its descendants.  The `<` and tag rules are re-run until they stop
    /// changing the node's [`Shape`], so that a node which takes the place of another still gets
    /// its own rules applied.  The same goes for the `>` rules.
    fn traverse(&self, node: &mut Node, ancestors: &mut Vec<String>) {
        self.rewrite_until_stable(node, ancestors, |table, tag| {
            table.pre.iter().flatten().chain(table.rules_for(tag))
        });

        ancestors.push(node.tag().to_owned());
        for child in node.children_mut() {
            self.traverse(child, ancestors);
        }
        ancestors.pop();

        self.rewrite_until_stable(node, ancestors, |table, _| table.post.iter().flatten());
    }

    fn rewrite_until_stable<'a, I>(
        &'a self,
        node: &mut Node,
        ancestors: &[String],
        rewrites: impl Fn(&'a Self, &str) -> I,
    ) where
        I: Iterator<Item = &'a Rewrite>,
    {
        let mut seen = Vec::new();
        for _ in 0..MAX_REWRITE_ROUNDS {
            let mut rules = rewrites(self, node.tag()).peekable();
            if rules.peek().is_none() {
                return;
            }
            seen.push(Shape::of(node));
            for rewrite in rules {
                rewrite(node, ancestors);
            }
            // Stop once the rewrites stop changing the node, or start going round in circles
            if seen.contains(&Shape::of(node)) {
                return;
            }
        }
        log::warn!(
            "Rewrites of {:?} still changing it after {} rounds",
            node.tag(),
            MAX_REWRITE_ROUNDS
        );
    }
}

/// How many times the rewrites for one node are repeated while they keep changing it
pub const MAX_REWRITE_ROUNDS: usize = 64;

/// The parts of a node which decide what its rewrites do: its tag, its text (if it's a leaf) and
/// the tags of its children
#[derive(Debug, PartialEq, Eq)]
struct Shape {
    tag: String,
    text: Option<String>,
    children: Vec<String>,
}

impl Shape {
    fn of(node: &Node) -> Self {
        Self {
            tag: node.tag().to_owned(),
            text: node.is_leaf().then(|| node.text().to_owned()),
            children: node.children().iter().map(|c| c.tag().to_owned()).collect(),
        }
    }
}

impl Debug for RuleTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("RuleTable")
            .field("tags", &keys)
            .field("wildcard", &self.wildcard.is_some())
            .field("pre", &self.pre.is_some())
            .field("post", &self.post.is_some())
            .finish()
    }
}

/// Rewrites `tree` in place according to a single table (without the final sweep of a
/// [`Transformer`])
pub fn apply(tree: &mut Node, table: &RuleTable) {
    table.apply(tree);
}

/// Applies a fixed sequence of [`RuleTable`]s, one complete pass per table, and then (unless
/// disabled) sweeps every remaining disposable node out of the tree.
#[derive(Debug, Clone)]
pub struct Transformer {
    tables: Vec<RuleTable>,
    sweep: bool,
}

impl Transformer {
    pub fn new(tables: Vec<RuleTable>) -> Self {
        Self {
            tables,
            sweep: true,
        }
    }

    pub fn single(table: RuleTable) -> Self {
        Self::new(vec![table])
    }

    /// Keeps disposable nodes in the tree after the last pass
    pub fn without_sweep(mut self) -> Self {
        self.sweep = false;
        self
    }

    pub fn tables(&self) -> &[RuleTable] {
        &self.tables
    }

    pub fn apply(&self, tree: &mut Node) {
        for (pass, table) in self.tables.iter().enumerate() {
            log::trace!("Transformation pass {} on {:?}", pass, tree.tag());
            table.apply(tree);
        }
        if self.sweep {
            sweep(tree);
        }
    }
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Removes every disposable node from a tree, working bottom-up:
/// - insignificant whitespace is dropped
/// - a node whose remaining children are all disposable leaves becomes a leaf holding their
///   content
/// - other disposable branches are replaced by their children
/// - other disposable leaves (i.e. anonymous tokens) are dropped
///
/// Errors attached to removed nodes move to their parent.  A disposable root is renamed to its
/// tag without the leading `:`.
pub fn sweep(tree: &mut Node) {
    sweep_children(tree);
    if tree.is_disposable() {
        let tag = tree.tag().trim_start_matches(':').to_owned();
        tree.set_tag(tag);
    }
}

fn sweep_children(node: &mut Node) {
    if node.is_leaf() {
        return;
    }
    for child in node.children_mut() {
        sweep_children(child);
    }

    let mut orphaned_errors = Vec::new();
    let mut children = Vec::with_capacity(node.children().len());
    for mut child in node.take_children() {
        if child.is_leaf() && child.is_disposable() && child.tag() == WHITESPACE_TAG {
            orphaned_errors.extend(child.take_errors());
        } else {
            children.push(child);
        }
    }

    if children.iter().all(|c| c.is_leaf() && c.is_disposable()) {
        let mut text = String::new();
        for mut child in children {
            text.push_str(child.text());
            orphaned_errors.extend(child.take_errors());
        }
        node.set_text(text);
    } else {
        let mut kept = Vec::with_capacity(children.len());
        for mut child in children {
            if child.is_disposable() {
                orphaned_errors.extend(child.take_errors());
                kept.extend(child.take_children());
            } else {
                kept.push(child);
            }
        }
        node.set_children(kept);
    }
    for e in orphaned_errors {
        node.add_error(e);
    }
}

//////////////////
// TABLE ERRORS //
//////////////////

pub type TableResult<T> = Result<T, TableError>;

/// The ways that building a [`RuleTable`] can fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// A key (or one of the parts of a comma separated key) is empty
    EmptyKey(String),
    /// The same tag or marker was given more than once
    DuplicateKey(String),
    /// A rewrite or condition was referred to by a name which doesn't exist
    UnknownRewrite(String),
    /// A rewrite was given an argument it can't use (or wasn't given one it needs)
    BadArgument { rewrite: String, reason: String },
}

impl Display for TableError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TableError::EmptyKey(key) => write!(f, "empty tag in rule table key {:?}", key),
            TableError::DuplicateKey(key) => write!(f, "{:?} appears twice in the rule table", key),
            TableError::UnknownRewrite(name) => write!(f, "unknown rewrite {:?}", name),
            TableError::BadArgument { rewrite, reason } => {
                write!(f, "bad argument for {:?}: {}", rewrite, reason)
            }
        }
    }
}

impl std::error::Error for TableError {}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use dhparse_grammar::{serialize::parse_sxpr, Error};

    use super::{primitives::*, *};

    fn sxpr(s: &str) -> Node {
        parse_sxpr(s).unwrap()
    }

    #[test]
    fn replace_group_by_its_child() {
        let table = RuleTable::from_entries([("group", vec![replace_by_single_child()])]).unwrap();
        let mut tree = sxpr("(group (expr 1))");
        apply(&mut tree, &table);
        assert_eq!(tree.as_flat_sxpr(), "(expr \"1\")");
    }

    #[test]
    fn keys() {
        let mut table = RuleTable::new();
        table.add("a, b", vec![collapse()]).unwrap();
        table.add("*", vec![]).unwrap();
        assert_eq!(table.rules_for("a").len(), 1);
        assert_eq!(table.rules_for("b").len(), 1);
        assert!(table.rules_for("c").is_empty());
        assert_eq!(table.add("b", vec![]), Err(TableError::DuplicateKey("b".to_owned())));
        assert_eq!(table.add("+", vec![]), Ok(()));
        assert_eq!(table.add("<", vec![]), Err(TableError::DuplicateKey("<".to_owned())));
        assert_eq!(table.add("x,,y", vec![]), Err(TableError::EmptyKey("x,,y".to_owned())));
    }

    #[test]
    fn traversal_order() {
        use std::sync::Mutex;

        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        let record = |label: &'static str| {
            let log = log.clone();
            rewrite(move |node: &mut Node, _: &[String]| {
                log.lock().unwrap().push(format!("{}{}", label, node.tag()));
            })
        };
        let table = RuleTable::from_entries([
            ("<", vec![record("<")]),
            ("a", vec![record("=")]),
            ("*", vec![record("*")]),
            (">", vec![record(">")]),
        ])
        .unwrap();
        let mut tree = sxpr("(a (b x) (c y))");
        table.apply(&mut tree);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["<a", "=a", "<b", "*b", ">b", "<c", "*c", ">c", ">a"]
        );
    }

    #[test]
    fn ancestors_are_passed_down() {
        let table = RuleTable::from_entries([(
            "leaf",
            vec![apply_if(rename("inner"), parent_is(&["inner_parent"]))],
        )])
        .unwrap();
        let mut tree = sxpr("(root (leaf a) (inner_parent (leaf b)))");
        table.apply(&mut tree);
        assert_eq!(
            tree.as_flat_sxpr(),
            r#"(root (leaf "a") (inner_parent (inner "b")))"#
        );
    }

    #[test]
    fn multiple_passes() {
        // The first pass removes the brackets, which the second pass relies upon
        let first = RuleTable::from_entries([("group", vec![remove_brackets()])]).unwrap();
        let second =
            RuleTable::from_entries([("group", vec![replace_by_single_child()])]).unwrap();
        let transformer = Transformer::new(vec![first, second]);
        let mut tree = sxpr(r#"(sum (group (:Text "(") (num 1) (:Text ")")))"#);
        transformer.apply(&mut tree);
        assert_eq!(tree.as_flat_sxpr(), r#"(sum (num "1"))"#);
    }

    #[test]
    fn replacement_gets_its_own_rules() {
        let table = RuleTable::from_entries([
            ("group", vec![replace_by_single_child()]),
            ("num", vec![rename("number")]),
        ])
        .unwrap();
        let mut tree = sxpr("(sum (group (group (group (num 1)))))");
        table.apply(&mut tree);
        assert_eq!(tree.as_flat_sxpr(), r#"(sum (number "1"))"#);
    }

    #[test]
    fn endless_rewrites_are_cut_off() {
        let flips = Arc::new(AtomicUsize::new(0));
        let counter = flips.clone();
        let flip = rewrite(move |node, _| {
            counter.fetch_add(1, Ordering::Relaxed);
            let next = if node.tag() == "a" { "b" } else { "a" };
            node.set_tag(next);
        });
        let grow = rewrite(|node, _| node.children_mut().push(Node::leaf("x", "")));
        let table = RuleTable::from_entries([("a, b", vec![flip]), ("list", vec![grow])]).unwrap();

        let mut tree = sxpr("(a x)");
        table.apply(&mut tree);
        assert_eq!(tree.tag(), "a");
        assert_eq!(flips.load(Ordering::Relaxed), 2);

        let mut tree = sxpr("(list (x a))");
        table.apply(&mut tree);
        assert_eq!(tree.children().len(), MAX_REWRITE_ROUNDS + 1);
    }

    #[test]
    fn sweep_removes_disposables() {
        let mut tree = sxpr(
            r#"(expr (num 1) (:Whitespace " ") (:Series (op "+") (:Text " ") (num 2))
                     (INT (:Text "-") (:RegExp "12") (:Whitespace " ")))"#,
        );
        sweep(&mut tree);
        assert_eq!(
            tree.as_flat_sxpr(),
            r#"(expr (num "1") (op "+") (num "2") (INT "-12"))"#
        );
        assert!(tree.descendants().all(|n| !n.is_disposable()));
    }

    #[test]
    fn sweep_keeps_errors() {
        let mut tree = Node::branch(
            "doc",
            vec![
                Node::leaf("word", "a"),
                Node::leaf(":Text", ";")
                    .with_disposable(true)
                    .with_error(Error::error(1, "stray semicolon")),
            ],
        );
        Transformer::default().apply(&mut tree);
        assert_eq!(tree.as_flat_sxpr(), r#"(doc (word "a"))"#);
        assert_eq!(tree.errors().len(), 1);
    }

    #[test]
    fn disposable_root_is_renamed() {
        let mut tree = sxpr(r#"(:Series (:Text "a") (:Text "b"))"#);
        sweep(&mut tree);
        assert_eq!(tree.as_flat_sxpr(), r#"(Series "ab")"#);
    }
}
