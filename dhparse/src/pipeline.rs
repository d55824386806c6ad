//! Running documents through the whole pipeline: parsing, transformation and compilation.
//!
//! A [`Pipeline`] owns everything that may not be shared between threads (the compiler and its
//! state), but only holds a shared reference to the [`Grammar`].  A [`Frontend`] is the
//! thread-safe factory which hands out one [`Worker`] per thread.

use std::sync::Arc;

use dhparse_grammar::{
    error::{has_errors, has_fatal, sort_errors},
    Config, Error, Grammar, Node, Serialization,
};
use serde_json::Value;

use crate::{compile::Compiler, transform::Transformer};

/// Everything produced by running one document through a [`Pipeline`]
#[derive(Debug, Clone)]
pub struct Compilation<V> {
    /// The concrete syntax tree, if the pipeline keeps trees
    pub cst: Option<Node>,
    /// The abstract syntax tree, if the pipeline keeps trees and the document got that far
    pub ast: Option<Node>,
    /// The compiled value, or `None` if any fatal error occurred
    pub value: Option<V>,
    /// Every error from all stages, located against the source and sorted by position
    pub errors: Vec<Error>,
}

impl<V> Compilation<V> {
    pub fn has_errors(&self) -> bool {
        has_errors(&self.errors)
    }

    pub fn has_fatal(&self) -> bool {
        has_fatal(&self.errors)
    }

    /// The errors, one per line
    pub fn error_messages(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}\n", e))
            .collect()
    }
}

/// Parser, transformer and compiler for one language
#[derive(Debug)]
pub struct Pipeline<S, V> {
    grammar: Arc<Grammar>,
    start_rule: Option<String>,
    transformer: Transformer,
    compiler: Compiler<S, V>,
    keep_trees: bool,
}

impl<S: Default, V> Pipeline<S, V> {
    pub fn new(grammar: Arc<Grammar>, transformer: Transformer, compiler: Compiler<S, V>) -> Self {
        Self {
            grammar,
            start_rule: None,
            transformer,
            compiler,
            keep_trees: false,
        }
    }

    /// Parse documents starting from `rule` instead of the grammar's root
    pub fn with_start_rule(mut self, rule: &str) -> Self {
        self.start_rule = Some(rule.to_owned());
        self
    }

    /// Whether or not to return copies of the syntax trees in each [`Compilation`]
    pub fn keep_trees(&mut self, keep: bool) -> &mut Self {
        self.keep_trees = keep;
        self
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn compile_source(&mut self, source: &str) -> Compilation<V> {
        let start_rule = self.start_rule.as_deref().unwrap_or_else(|| self.grammar.root());
        let (mut tree, mut errors) = self.grammar.parse(source, start_rule, true);
        let cst = self.keep_trees.then(|| tree.clone());

        // Each stage only runs if nothing fatal has happened so far
        let mut ast = None;
        let mut value = None;
        if !has_fatal(&errors) {
            self.transformer.apply(&mut tree);
            errors.extend(tree.drain_errors());
            ast = self.keep_trees.then(|| tree.clone());
            if !has_fatal(&errors) {
                let (v, compile_errors) = self.compiler.compile(&tree);
                errors.extend(compile_errors);
                value = Some(v);
            }
        }
        if has_fatal(&errors) {
            value = None;
        }

        for e in &mut errors {
            e.locate(source);
        }
        sort_errors(&mut errors);
        log::debug!(
            "Compiled {} bytes with {} errors (fatal: {})",
            source.len(),
            errors.len(),
            has_fatal(&errors)
        );
        Compilation {
            cst,
            ast,
            value,
            errors,
        }
    }
}

///////////////
// FRONTENDS //
///////////////

/// Values which a [`Worker`] can write out as text
pub trait Render {
    fn render(&self, how: Serialization, config: &Config) -> String;
}

impl Render for Node {
    fn render(&self, how: Serialization, config: &Config) -> String {
        self.serialize(how, config)
    }
}

/// JSON values are always written as JSON, whatever serialization is requested
impl Render for Value {
    fn render(&self, _how: Serialization, _config: &Config) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// How a [`Worker`] should process and write out a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub serialization: Serialization,
    /// Also render the concrete and abstract syntax trees
    pub keep_trees: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            serialization: Serialization::Sxpr,
            keep_trees: false,
        }
    }
}

/// The text produced by processing one document
#[derive(Debug, Clone, Default)]
pub struct Report {
    /// The rendered value, or `None` if a fatal error occurred
    pub output: Option<String>,
    pub cst: Option<String>,
    pub ast: Option<String>,
    pub errors: Vec<Error>,
}

impl Report {
    pub fn has_errors(&self) -> bool {
        has_errors(&self.errors)
    }
}

/// A language which documents can be processed in.  A `Frontend` is shared between threads, each
/// of which creates its own [`Worker`].
pub trait Frontend: Send + Sync {
    fn name(&self) -> &str;

    /// The file extensions (without the `.`) of documents in this language
    fn extensions(&self) -> &[String];

    /// The serialization used when none is requested
    fn default_serialization(&self) -> Serialization {
        Serialization::Sxpr
    }

    /// The file extension of the output written for a given serialization
    fn output_extension(&self, how: Serialization) -> &'static str {
        how.extension()
    }

    fn worker(&self) -> Box<dyn Worker>;
}

/// Processes documents for one thread
pub trait Worker {
    fn process(&mut self, source: &str, options: &Options) -> Report;
}

impl<S: Default, V: Render> Worker for Pipeline<S, V> {
    fn process(&mut self, source: &str, options: &Options) -> Report {
        self.keep_trees(options.keep_trees);
        let compilation = self.compile_source(source);
        let config = self.grammar.config();
        let how = options.serialization;
        Report {
            output: compilation.value.map(|v| v.render(how, config)),
            cst: compilation.cst.map(|t| t.render(how, config)),
            ast: compilation.ast.map(|t| t.render(how, config)),
            errors: compilation.errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use dhparse_grammar::{ErrorCode, GrammarBuilder, Severity};

    use super::*;
    use crate::{
        compile::Compiler,
        transform::{primitives::*, RuleTable},
    };

    /// `list = "[" §item ("," §item)* "]"` with `item = /[a-z]+/`
    fn list_pipeline() -> Pipeline<(), Value> {
        let mut g = GrammarBuilder::default();
        let item = g.regex("[a-z]+").unwrap();
        let ws = g.whitespace();
        let item = g.series([item, ws]);
        let item = g.define("item", item).unwrap();
        let open = g.token("[");
        let comma = g.token(",");
        let close = g.token("]");
        let more = g.series_mandatory([comma, item], 1);
        let more = g.zero_or_more(more);
        let list = g.series_mandatory([open, item, more, close], 1);
        g.define("list", list).unwrap();
        let grammar = g.build_shared("list").unwrap();

        let table = RuleTable::from_entries([("list", vec![remove_tokens::<&str>(&[])])]).unwrap();
        fn on_item(c: &mut Compiler<(), Value>, node: &Node) -> Value {
            if node.content() == "bad" {
                c.error(node, "bad item");
            }
            if node.content() == "fatal" {
                c.fatal(node, "fatal item");
            }
            Value::String(node.content())
        }
        fn on_list(c: &mut Compiler<(), Value>, node: &Node) -> Value {
            Value::Array(c.compile_children(node))
        }
        let compiler = Compiler::new()
            .with_handler("item", on_item)
            .with_handler("list", on_list);
        Pipeline::new(grammar, Transformer::single(table), compiler)
    }

    #[test]
    fn successful_compilation() {
        let mut pipeline = list_pipeline();
        pipeline.keep_trees(true);
        let result = pipeline.compile_source("[a, b,c]");
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(result.value, Some(serde_json::json!(["a", "b", "c"])));
        assert_eq!(
            result.ast.map(|t| t.as_flat_sxpr()).as_deref(),
            Some(r#"(list (item "a") (item "b") (item "c"))"#)
        );
        assert!(result.cst.is_some());
    }

    #[test]
    fn errors_from_all_stages() {
        let mut pipeline = list_pipeline();
        let result = pipeline.compile_source("[a,\n bad, c");
        assert!(result.has_errors());
        assert!(!result.has_fatal());
        // The value is still produced, because there was no fatal error
        assert!(result.value.is_some());
        let codes: Vec<ErrorCode> = result.errors.iter().map(|e| e.code).collect();
        assert_eq!(
            codes,
            vec![ErrorCode::COMPILER_ERROR, ErrorCode::MANDATORY_CONTINUATION]
        );
        // Errors are located and sorted
        assert_eq!(result.errors[0].line, Some(2));
        assert!(result.error_messages().starts_with("2:2: Error (1200): bad item\n"));
        assert!(result.cst.is_none());
    }

    #[test]
    fn fatal_errors_suppress_the_value() {
        let mut pipeline = list_pipeline();
        let result = pipeline.compile_source("[a, fatal]");
        assert!(result.has_fatal());
        assert_eq!(result.value, None);
        assert_eq!(result.errors[0].severity, Severity::Fatal);
    }

    #[test]
    fn workers_render_their_output() {
        let mut pipeline = list_pipeline();
        let options = Options {
            serialization: Serialization::Xml,
            keep_trees: true,
        };
        let report = pipeline.process("[a]", &options);
        assert_eq!(report.output.as_deref(), Some("[\n  \"a\"\n]"));
        assert_eq!(report.ast.as_deref(), Some("<list>\n  <item>a</item>\n</list>"));
        assert!(!report.has_errors());
    }
}
