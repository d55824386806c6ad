//! Specification for the file format in which grammars are written.  This can be roughly thought
//! of as an 'AST' for the `[grammar]` table of a language file.
//!
//! Loading a grammar happens in the following sequence:
//! 1. Read a `*.toml` file into a [`SpecGrammar`]
//! 2. Convert that [`SpecGrammar`] into a full [`Grammar`] (see [`SpecGrammar::into_grammar`])
//!
//! Both stages can generate errors, which are bubbled up to the caller.
//!
//! Rules are written as expressions:
//! ```toml
//! [grammar]
//! root = "list"
//!
//! [grammar.rules]
//! list = { seq = [{ text = "[", ws = true }, "item", { many = "_more" }, { text = "]" }], mandatory = 3 }
//! _more = { seq = [{ text = ",", ws = true }, "item"] }
//! item = { regex = "[0-9]+", ws = true }
//!
//! [grammar.resume]
//! list = ["\\]"]
//!
//! [grammar.errors]
//! list = [{ when = '$', message = "unclosed list" }, { message = "expected {expected}" }]
//! ```

pub(crate) mod convert;

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{config::Config, grammar::MatchFn, Grammar};

pub use self::convert::{ConvertError, ConvertResult};

type RuleName = String;

/// A simplified version of [`Grammar`] which can be [`Deserialize`]d from any JSON-like data
/// structure (usually TOML).  The only exported method is
/// [`into_grammar`](SpecGrammar::into_grammar), which checks the source data and returns a
/// [`Grammar`] specifying the same language.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecGrammar {
    root: RuleName,
    /// Pattern of insignificant whitespace, matched by `~` (default `\s*`)
    #[serde(default)]
    whitespace: Option<String>,
    /// Pattern of comments, which can appear wherever whitespace can
    #[serde(default)]
    comment: Option<String>,
    /// Rules whose names match this pattern are disposable (default `^_`)
    #[serde(default)]
    disposable: Option<String>,
    rules: BTreeMap<RuleName, Expr>,
    /// For each rule, the patterns at which parsing resumes after a mandatory-point failure
    #[serde(default)]
    resume: BTreeMap<RuleName, Vec<String>>,
    /// For each rule, custom messages for mandatory-point failures
    #[serde(default)]
    errors: BTreeMap<RuleName, Vec<SpecErrorMessage>>,
}

/// A custom error message, e.g. `{ when = '$', message = "{expected} missing at the end" }`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecErrorMessage {
    /// Regex which has to match where the failure happened.  The default always matches.
    #[serde(default)]
    when: String,
    message: String,
}

impl SpecGrammar {
    #[inline]
    pub fn into_grammar(self, config: Config) -> ConvertResult<Grammar> {
        convert::convert(self, config)
    }
}

/// A parsing expression.  Each variant is recognised by its unique key.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, untagged)]
pub(crate) enum Expr {
    /// A reference to another rule, or `~` for insignificant whitespace
    Rule(RuleName),
    Text {
        text: String,
        /// If `true`, trailing whitespace is consumed after the text
        #[serde(default)]
        ws: bool,
    },
    Regex {
        regex: String,
        #[serde(default)]
        ws: bool,
    },
    Seq {
        seq: Vec<Expr>,
        /// Index of the first element whose failure is reported as an error
        mandatory: Option<usize>,
    },
    Alt {
        alt: Vec<Expr>,
    },
    Opt {
        opt: Box<Expr>,
    },
    Many {
        many: Box<Expr>,
    },
    OneOrMore {
        some: Box<Expr>,
    },
    Repeat {
        repeat: Box<Expr>,
        #[serde(default)]
        min: usize,
        max: Option<usize>,
    },
    Ahead {
        ahead: Box<Expr>,
    },
    NotAhead {
        not_ahead: Box<Expr>,
    },
    Behind {
        behind: Box<Expr>,
    },
    NotBehind {
        not_behind: Box<Expr>,
    },
    /// Pushes the matched text onto a stack, named after the enclosing rule unless `name` is given
    Capture {
        capture: Box<Expr>,
        name: Option<String>,
    },
    Retrieve {
        retrieve: String,
        #[serde(default, rename = "match")]
        match_fn: MatchFn,
    },
    Pop {
        pop: String,
        #[serde(default, rename = "match")]
        match_fn: MatchFn,
    },
    Drop {
        drop: Box<Expr>,
    },
}
