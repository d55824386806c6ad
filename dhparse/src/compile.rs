//! The compiler, which turns an abstract syntax tree into a value by dispatching on node tags.
//!
//! Every tag can have a [`Handler`]; nodes without one are passed to the fallback handler.  The
//! default fallback ([`fallback_compiler`]) compiles all children and combines the results with
//! [`Aggregate::aggregate`], so that every tree produces *some* value, even if the compiler only
//! knows about part of the language.

use std::{collections::HashMap, fmt::Debug};

use dhparse_grammar::{error::has_fatal, Error, ErrorCode, Node};
use serde_json::{Map, Value};

/// A function which compiles one node.  Handlers get full access to the [`Compiler`], so they can
/// compile sub-trees, read and modify the compiler's state and record errors.
pub type Handler<S, V> = fn(&mut Compiler<S, V>, &Node) -> V;

/// Compiles trees into values of type `V`, carrying mutable state of type `S` through each
/// top-level call of [`Compiler::compile`].
pub struct Compiler<S, V> {
    handlers: HashMap<String, Handler<S, V>>,
    fallback: Handler<S, V>,
    prepare: Option<fn(&mut Compiler<S, V>, &Node)>,
    finalize: Option<fn(&mut Compiler<S, V>, V) -> V>,
    /// State which handlers can use however they like.  It is reset to `S::default()` at the
    /// start of every call to [`Compiler::compile`].
    pub state: S,
    errors: Vec<Error>,
    /// Tags of the nodes which are currently being compiled, outermost first
    path: Vec<String>,
}

impl<S: Default, V: Aggregate> Compiler<S, V> {
    /// A compiler without any handlers, which uses [`fallback_compiler`] for every node
    pub fn new() -> Self {
        Self::with_fallback(fallback_compiler)
    }
}

impl<S: Default, V: Aggregate> Default for Compiler<S, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Default, V> Compiler<S, V> {
    pub fn with_fallback(fallback: Handler<S, V>) -> Self {
        Self {
            handlers: HashMap::new(),
            fallback,
            prepare: None,
            finalize: None,
            state: S::default(),
            errors: Vec::new(),
            path: Vec::new(),
        }
    }

    /// Registers the handler for nodes tagged `tag`, replacing any previous one
    pub fn on(&mut self, tag: &str, handler: Handler<S, V>) -> &mut Self {
        self.handlers.insert(tag.to_owned(), handler);
        self
    }

    /// Builder-style version of [`Compiler::on`]
    pub fn with_handler(mut self, tag: &str, handler: Handler<S, V>) -> Self {
        self.on(tag, handler);
        self
    }

    /// A hook which runs before the root of the tree is compiled
    pub fn with_prepare(mut self, prepare: fn(&mut Compiler<S, V>, &Node)) -> Self {
        self.prepare = Some(prepare);
        self
    }

    /// A hook which can modify the value produced for the root of the tree
    pub fn with_finalize(mut self, finalize: fn(&mut Compiler<S, V>, V) -> V) -> Self {
        self.finalize = Some(finalize);
        self
    }

    /// Returns the compiler to the state it was in before its first use
    pub fn reset(&mut self) {
        self.state = S::default();
        self.errors.clear();
        self.path.clear();
    }

    /// Compiles a whole tree, returning the value along with every error which the handlers
    /// recorded.  The compiler is [`reset`](Self::reset) first, so no state leaks between calls.
    pub fn compile(&mut self, tree: &Node) -> (V, Vec<Error>) {
        self.reset();
        log::debug!("Compiling tree with root {:?}", tree.tag());
        if let Some(prepare) = self.prepare {
            prepare(self, tree);
        }
        let mut value = self.compile_node(tree);
        if let Some(finalize) = self.finalize {
            value = finalize(self, value);
        }
        log::debug!("Compiled with {} errors", self.errors.len());
        (value, std::mem::take(&mut self.errors))
    }

    /// Compiles one node with the handler for its tag (or the fallback handler)
    pub fn compile_node(&mut self, node: &Node) -> V {
        let handler = self
            .handlers
            .get(node.tag())
            .copied()
            .unwrap_or(self.fallback);
        self.path.push(node.tag().to_owned());
        let value = handler(self, node);
        self.path.pop();
        value
    }

    pub fn compile_children(&mut self, node: &Node) -> Vec<V> {
        node.children()
            .iter()
            .map(|child| self.compile_node(child))
            .collect()
    }

    /// The tags of the node currently being compiled and its ancestors, outermost first
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn has_fatal(&self) -> bool {
        has_fatal(&self.errors)
    }

    pub fn add_error(&mut self, error: Error) {
        self.errors.push(error);
    }

    pub fn error(&mut self, node: &Node, message: impl Into<String>) {
        self.add_error(Error::new(node.pos(), ErrorCode::COMPILER_ERROR, message));
    }

    pub fn warning(&mut self, node: &Node, message: impl Into<String>) {
        self.add_error(Error::warning(node.pos(), message));
    }

    pub fn fatal(&mut self, node: &Node, message: impl Into<String>) {
        self.add_error(Error::fatal(node.pos(), message));
    }
}

impl<S: Debug, V> Debug for Compiler<S, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        tags.sort_unstable();
        f.debug_struct("Compiler")
            .field("handlers", &tags)
            .field("state", &self.state)
            .field("errors", &self.errors)
            .finish()
    }
}

/// Compiles all children of a node and combines their values with [`Aggregate::aggregate`]
pub fn fallback_compiler<S: Default, V: Aggregate>(compiler: &mut Compiler<S, V>, node: &Node) -> V {
    let children = compiler.compile_children(node);
    V::aggregate(node, children)
}

/// Values which can be built generically from a node and the values of its children
pub trait Aggregate: Sized {
    /// Combines the already compiled `children` of `node` (empty if `node` is a leaf)
    fn aggregate(node: &Node, children: Vec<Self>) -> Self;
}

/// Rebuilds the tree, so a compiler without handlers is the identity
impl Aggregate for Node {
    fn aggregate(node: &Node, children: Vec<Self>) -> Self {
        let mut rebuilt = if node.is_leaf() {
            Node::leaf(node.tag(), node.text())
        } else {
            Node::branch(node.tag(), children)
        };
        rebuilt = rebuilt
            .with_span(node.pos(), node.end() - node.pos())
            .with_disposable(node.is_disposable());
        for e in node.errors() {
            rebuilt.add_error(e.clone());
        }
        rebuilt
    }
}

/// Leaves become strings and branches become `{ tag: [children] }`
impl Aggregate for Value {
    fn aggregate(node: &Node, children: Vec<Self>) -> Self {
        if node.is_leaf() {
            return Value::String(node.text().to_owned());
        }
        let mut map = Map::new();
        map.insert(node.tag().to_owned(), Value::Array(children));
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use dhparse_grammar::serialize::parse_sxpr;
    use serde_json::json;

    use super::*;

    /// Evaluates `(sum ...)`/`(product ...)` trees, counting the numbers it has seen
    fn calculator() -> Compiler<usize, f64> {
        fn number(c: &mut Compiler<usize, f64>, node: &Node) -> f64 {
            c.state += 1;
            match node.content().parse() {
                Ok(n) => n,
                Err(_) => {
                    c.error(node, format!("{:?} isn't a number", node.content()));
                    0.0
                }
            }
        }
        fn sum(c: &mut Compiler<usize, f64>, node: &Node) -> f64 {
            c.compile_children(node).into_iter().sum()
        }
        fn product(c: &mut Compiler<usize, f64>, node: &Node) -> f64 {
            c.compile_children(node).into_iter().product()
        }
        fn unknown(c: &mut Compiler<usize, f64>, node: &Node) -> f64 {
            c.warning(node, format!("ignoring {:?}", node.tag()));
            0.0
        }
        Compiler::with_fallback(unknown)
            .with_handler("num", number)
            .with_handler("sum", sum)
            .with_handler("product", product)
    }

    #[test]
    fn dispatch_by_tag() {
        let tree = parse_sxpr("(sum (num 1) (product (num 2) (num 3.5)) (comment x))").unwrap();
        let mut compiler = calculator();
        let (value, errors) = compiler.compile(&tree);
        assert_eq!(value, 8.0);
        assert_eq!(compiler.state, 3);
        assert_eq!(errors.len(), 1);
        assert!(!errors[0].is_error());
    }

    #[test]
    fn errors_are_local() {
        let tree = parse_sxpr("(sum (num 1) (num x) (num 2))").unwrap();
        let mut compiler = calculator();
        let (value, errors) = compiler.compile(&tree);
        // The broken number doesn't stop its siblings from being compiled
        assert_eq!(value, 3.0);
        assert_eq!(errors[0].code, ErrorCode::COMPILER_ERROR);

        // Nothing leaks into the next run
        let (_, errors) = compiler.compile(&parse_sxpr("(num 4)").unwrap());
        assert!(errors.is_empty());
        assert_eq!(compiler.state, 1);
    }

    #[test]
    fn hooks() {
        fn count_nodes(c: &mut Compiler<usize, f64>, tree: &Node) {
            c.state = tree.descendants().count();
        }
        fn scale(c: &mut Compiler<usize, f64>, value: f64) -> f64 {
            value * c.state as f64
        }
        let mut compiler = calculator()
            .with_prepare(count_nodes)
            .with_finalize(scale);
        let (value, _) = compiler.compile(&parse_sxpr("(sum (num 1) (num 2))").unwrap());
        // 3 nodes, plus one for each number compiled
        assert_eq!(value, 15.0);
    }

    #[test]
    fn fallback_aggregates() {
        let tree = parse_sxpr("(doc (title Hi) (para (word a) (word b)))").unwrap();
        let mut identity = Compiler::<(), Node>::new();
        let (copy, errors) = identity.compile(&tree);
        assert_eq!(copy, tree);
        assert!(errors.is_empty());

        let mut to_json = Compiler::<(), Value>::new();
        let (value, _) = to_json.compile(&tree);
        assert_eq!(
            value,
            json!({ "doc": ["Hi", { "para": ["a", "b"] }] })
        );
    }

    #[test]
    fn path_of_the_current_node() {
        fn record(c: &mut Compiler<Vec<String>, ()>, node: &Node) {
            c.state.push(c.path().join("/"));
            c.compile_children(node);
        }
        let mut compiler = Compiler::with_fallback(record);
        compiler.compile(&parse_sxpr("(a (b (c x)) (d y))").unwrap());
        assert_eq!(compiler.state, vec!["a", "a/b", "a/b/c", "a/d"]);
    }
}
