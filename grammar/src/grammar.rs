use std::{
    collections::{HashMap, HashSet},
    fmt::{Display, Formatter},
    sync::Arc,
};

use index_vec::{IndexSlice, IndexVec};
use itertools::Itertools;
use regex::Regex;
use serde::Deserialize;

use crate::{config::Config, engine, error::Error, node::Node};

/// A complete, immutable description of how to parse documents of one language: an arena of
/// [`Parser`]s (the combinator graph) plus the named rules which point into it.
///
/// A `Grammar` is built once (see [`GrammarBuilder`]) and can then be shared freely between
/// threads; every call to [`Grammar::parse`] gets its own private run state.
#[derive(Debug, Clone)]
pub struct Grammar {
    parsers: ParserVec<Parser>,
    /// Maps rule names to the [`ParserId`] through which the rule is referenced
    rules: HashMap<String, ParserId>,
    /// Rule names in order of definition
    rule_names: Vec<String>,
    root: String,

    /// The combined whitespace+comment pattern, anchored to the start of the haystack
    whitespace: Regex,
    /// The comment pattern on its own (unanchored), used to skip comments while searching for
    /// a place to resume after an error
    comment: Option<Regex>,
    /// Resynchronization patterns, indexed by rule name
    resume: HashMap<String, Vec<Regex>>,
    /// Custom messages for mandatory-point failures, indexed by rule name
    error_messages: HashMap<String, Vec<ErrorMessage>>,

    config: Config,
}

impl Grammar {
    /// Parse a document, starting with a given rule.  If `complete_match` is set, any input left
    /// over after the start rule has matched is reported as an error.
    ///
    /// Mismatches never cause this to fail; instead, the returned errors describe what went
    /// wrong, and the returned tree contains as much of the document as could be parsed.
    pub fn parse(&self, text: &str, start_rule: &str, complete_match: bool) -> (Node, Vec<Error>) {
        engine::parse(self, text, start_rule, complete_match)
    }

    /// Parse a complete document, starting with the root rule
    pub fn parse_root(&self, text: &str) -> (Node, Vec<Error>) {
        self.parse(text, &self.root, true)
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns a copy of this grammar which uses a different [`Config`]
    pub fn with_config(&self, config: Config) -> Self {
        Self {
            config,
            ..self.clone()
        }
    }

    ///////////
    // RULES //
    ///////////

    /// The [`ParserId`] through which a rule is referenced
    pub fn rule(&self, name: &str) -> Option<ParserId> {
        self.rules.get(name).copied()
    }

    /// Rule names in order of definition
    pub fn rule_names(&self) -> &[String] {
        &self.rule_names
    }

    pub fn parsers(&self) -> &IndexSlice<ParserId, [Parser]> {
        &self.parsers
    }

    pub fn parser(&self, id: ParserId) -> &Parser {
        &self.parsers[id]
    }

    pub(crate) fn whitespace_regex(&self) -> &Regex {
        &self.whitespace
    }

    pub(crate) fn comment_regex(&self) -> Option<&Regex> {
        self.comment.as_ref()
    }

    pub(crate) fn resume_patterns(&self, rule: &str) -> &[Regex] {
        self.resume.get(rule).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn error_messages(&self, rule: &str) -> &[ErrorMessage] {
        self.error_messages.get(rule).map_or(&[], Vec::as_slice)
    }

    /// A short human-readable description of what a parser expects, used in error messages
    pub fn describe(&self, id: ParserId) -> String {
        self.describe_inner(id, 0)
    }

    fn describe_inner(&self, id: ParserId, depth: usize) -> String {
        let parser = &self.parsers[id];
        if let Some(name) = &parser.name {
            if !parser.disposable || depth > 0 {
                return name.clone();
            }
        }
        if depth > 3 {
            return "...".to_owned();
        }
        let describe_all = |children: &[ParserId], sep: &str| {
            children
                .iter()
                .filter(|&&c| !self.is_whitespace(c))
                .map(|&c| self.describe_inner(c, depth + 1))
                .join(sep)
        };
        match &parser.kind {
            Combinator::Text(text) => format!("'{}'", text),
            Combinator::RegExp(pattern) => format!("/{}/", pattern.source),
            Combinator::Whitespace => "whitespace".to_owned(),
            Combinator::Series { children, .. } => describe_all(children, " "),
            Combinator::Alternative(children) => describe_all(children, " | "),
            Combinator::Repetition { child, .. }
            | Combinator::Lookahead { child, .. }
            | Combinator::Lookbehind { child, .. }
            | Combinator::Capture { child, .. }
            | Combinator::Drop(child)
            | Combinator::Synonym(child) => self.describe_inner(*child, depth + 1),
            Combinator::Forward(Some(target)) => self.describe_inner(*target, depth),
            Combinator::Forward(None) => "?".to_owned(),
            Combinator::Retrieve { stack, .. } | Combinator::Pop { stack, .. } => stack.clone(),
        }
    }

    /// Returns `true` if a parser only ever matches insignificant whitespace
    fn is_whitespace(&self, id: ParserId) -> bool {
        match &self.parsers[id].kind {
            Combinator::Whitespace => true,
            Combinator::Drop(child) => self.is_whitespace(*child),
            _ => false,
        }
    }
}

/////////////
// PARSERS //
/////////////

/// A single node of the combinator graph
#[derive(Debug, Clone)]
pub struct Parser {
    /// The rule name of this parser, which becomes the tag of the nodes it produces.  Unnamed
    /// parsers produce anonymous nodes (with tags like `:Series`).
    pub(crate) name: Option<String>,
    /// Nodes created by disposable parsers are dissolved into their parents
    pub(crate) disposable: bool,
    /// The name of the rule which contains this parser
    pub(crate) symbol: Option<String>,
    pub(crate) kind: Combinator,
}

impl Parser {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The tag given to nodes created by this parser.  Disposable rules produce anonymous nodes,
    /// just like unnamed parsers.
    pub fn tag(&self) -> &str {
        match &self.name {
            Some(name) if !self.disposable => name,
            _ => self.kind.anonymous_tag(),
        }
    }

    pub fn is_disposable(&self) -> bool {
        self.disposable
    }

    /// The rule to which this parser belongs, if any
    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    pub fn kind(&self) -> &Combinator {
        &self.kind
    }
}

/// The different kinds of parser in the combinator graph.  Parsers refer to each other through
/// [`ParserId`]s into the [`Grammar`]'s arena; cycles are only possible through
/// [`Combinator::Forward`].
#[derive(Debug, Clone)]
pub enum Combinator {
    /// A fixed piece of text
    Text(String),
    /// A regular expression, matched at the current position
    RegExp(Pattern),
    /// Insignificant whitespace and comments, as specified by the [`Grammar`]
    Whitespace,
    /// A sequence of parsers which must match one after the other.  Once the parser at index
    /// `mandatory` has been reached, later failures are reported as errors and the engine
    /// resynchronizes instead of backtracking.
    Series {
        children: Vec<ParserId>,
        mandatory: Option<usize>,
    },
    /// Ordered choice: the first matching child wins
    Alternative(Vec<ParserId>),
    /// Between `min` and `max` (inclusive) repetitions of `child`
    Repetition {
        child: ParserId,
        min: usize,
        max: Option<usize>,
    },
    /// A placeholder for a rule, bound to the rule's body once it is defined.  This is the only
    /// way to create recursive grammars.
    Forward(Option<ParserId>),
    /// Succeeds (without consuming input) if `child` matches, or doesn't match if `negate` is
    /// set.
    Lookahead { child: ParserId, negate: bool },
    /// Like [`Combinator::Lookahead`], but checks the text *before* the current position.  The
    /// `child` must be a [`Combinator::Text`] or [`Combinator::RegExp`].
    Lookbehind {
        child: ParserId,
        matcher: Behind,
        negate: bool,
    },
    /// Matches `child`, then pushes the matched text onto the named stack
    Capture { stack: String, child: ParserId },
    /// Matches the input against the top of the named stack, without popping it
    Retrieve { stack: String, match_fn: MatchFn },
    /// Matches the input against the top of the named stack, and pops it on success
    Pop { stack: String, match_fn: MatchFn },
    /// Matches `child`, but doesn't add any nodes to the tree
    Drop(ParserId),
    /// Matches `child` under a different name
    Synonym(ParserId),
}

impl Combinator {
    /// The tag given to the nodes of unnamed parsers of this kind
    pub fn anonymous_tag(&self) -> &'static str {
        match self {
            Combinator::Text(_) => ":Text",
            Combinator::RegExp(_) => ":RegExp",
            Combinator::Whitespace => ":Whitespace",
            Combinator::Series { .. } => ":Series",
            Combinator::Alternative(_) => ":Alternative",
            Combinator::Repetition {
                min: 0,
                max: Some(1),
                ..
            } => ":Option",
            Combinator::Repetition { min: 0, max: None, .. } => ":ZeroOrMore",
            Combinator::Repetition { min: 1, max: None, .. } => ":OneOrMore",
            Combinator::Repetition { .. } => ":Counted",
            Combinator::Forward(_) => ":Forward",
            Combinator::Lookahead { .. } => ":Lookahead",
            Combinator::Lookbehind { .. } => ":Lookbehind",
            Combinator::Capture { .. } => ":Capture",
            Combinator::Retrieve { .. } => ":Retrieve",
            Combinator::Pop { .. } => ":Pop",
            Combinator::Drop(_) => ":Drop",
            Combinator::Synonym(_) => ":Synonym",
        }
    }

    /// The [`ParserId`]s directly referenced by this parser
    pub fn children(&self) -> Vec<ParserId> {
        match self {
            Combinator::Series { children, .. } | Combinator::Alternative(children) => {
                children.clone()
            }
            Combinator::Repetition { child, .. }
            | Combinator::Lookahead { child, .. }
            | Combinator::Lookbehind { child, .. }
            | Combinator::Capture { child, .. }
            | Combinator::Drop(child)
            | Combinator::Synonym(child) => vec![*child],
            Combinator::Forward(target) => target.iter().copied().collect(),
            Combinator::Text(_)
            | Combinator::RegExp(_)
            | Combinator::Whitespace
            | Combinator::Retrieve { .. }
            | Combinator::Pop { .. } => Vec::new(),
        }
    }
}

/// A compiled regular expression, along with the source it was compiled from
#[derive(Debug, Clone)]
pub struct Pattern {
    pub(crate) source: String,
    /// `source`, anchored to the start of the haystack
    pub(crate) anchored: Regex,
}

impl Pattern {
    fn new(source: &str) -> BuildResult<Self> {
        Ok(Self {
            source: source.to_owned(),
            anchored: compile_regex(&format!(r"\A(?:{})", source))?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// The thing that a [`Combinator::Lookbehind`] looks for before the current position
#[derive(Debug, Clone)]
pub enum Behind {
    Text(String),
    /// A regex which is anchored to the **end** of the haystack
    RegExp(Regex),
}

/// How [`Combinator::Retrieve`] and [`Combinator::Pop`] compare the input to the value on top
/// of their stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchFn {
    /// The input must start with the value on top of the stack
    LastValue,
    /// Like `LastValue`, but matches the empty string instead of failing
    OptionalLastValue,
    /// The input must start with the closing bracket(s) matching the value on top of the stack
    /// (`(`, `[`, `{` and `<` become `)`, `]`, `}` and `>`)
    MatchingBracket,
}

impl Default for MatchFn {
    fn default() -> Self {
        MatchFn::LastValue
    }
}

impl MatchFn {
    /// The text which this function expects, given the value on top of the stack
    pub fn expected(self, top: &str) -> String {
        match self {
            MatchFn::LastValue | MatchFn::OptionalLastValue => top.to_owned(),
            MatchFn::MatchingBracket => top
                .chars()
                .map(|ch| match ch {
                    '(' => ')',
                    '[' => ']',
                    '{' => '}',
                    '<' => '>',
                    other => other,
                })
                .collect(),
        }
    }

    /// Returns the length of the prefix of `text` matched by this function, or `None` if it
    /// doesn't match
    pub fn apply(self, text: &str, top: &str) -> Option<usize> {
        let expected = self.expected(top);
        if text.starts_with(&expected) {
            Some(expected.len())
        } else if self == MatchFn::OptionalLastValue {
            Some(0)
        } else {
            None
        }
    }
}

/////////////
// BUILDER //
/////////////

/// Builds a [`Grammar`] in two phases: rules can be [`declare`](Self::declare)d as placeholders
/// before their bodies exist, and are bound once they are [`define`](Self::define)d.  This is
/// what allows rules to refer to each other recursively.
#[derive(Debug, Clone)]
pub struct GrammarBuilder {
    parsers: ParserVec<Parser>,
    rules: HashMap<String, ParserId>,
    rule_names: Vec<String>,
    whitespace_id: Option<ParserId>,

    whitespace: String,
    comment: Option<String>,
    /// `None` means names starting with `_`
    disposable: Option<Regex>,
    resume: Vec<(String, Vec<String>)>,
    /// `(rule, condition, template)`
    error_messages: Vec<(String, String, String)>,
    config: Config,
}

impl Default for GrammarBuilder {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl GrammarBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            parsers: ParserVec::new(),
            rules: HashMap::new(),
            rule_names: Vec::new(),
            whitespace_id: None,

            whitespace: r"\s*".to_owned(),
            comment: None,
            disposable: None,
            resume: Vec::new(),
            error_messages: Vec::new(),
            config,
        }
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /* GRAMMAR-WIDE SETTINGS */

    /// Sets the pattern of insignificant whitespace (default `\s*`)
    pub fn whitespace_pattern(&mut self, pattern: &str) -> &mut Self {
        self.whitespace = pattern.to_owned();
        self
    }

    /// Sets the pattern of comments, which are treated like whitespace
    pub fn comment(&mut self, pattern: &str) -> &mut Self {
        self.comment = Some(pattern.to_owned());
        self
    }

    /// Rules whose names match this pattern (default `^_`) produce disposable nodes
    pub fn disposable(&mut self, pattern: &str) -> BuildResult<&mut Self> {
        self.disposable = Some(compile_regex(pattern)?);
        Ok(self)
    }

    /// Sets the patterns used to resynchronize after a mandatory-point failure in `rule`
    pub fn resume<S: AsRef<str>>(&mut self, rule: &str, patterns: &[S]) -> &mut Self {
        let patterns = patterns.iter().map(|p| p.as_ref().to_owned()).collect();
        self.resume.push((rule.to_owned(), patterns));
        self
    }

    /// Adds a custom message for mandatory-point failures in `rule`.  The message is used if
    /// `condition` (a regex, where the empty pattern always matches) matches the text at the
    /// point of failure.  Conditions are tried in the order they are added.
    ///
    /// In `template`, `{expected}` and `{found}` are replaced by what the parser expected and
    /// the text it found instead.  Literal braces are written `{{` and `}}`.
    pub fn error_message(&mut self, rule: &str, condition: &str, template: &str) -> &mut Self {
        self.error_messages
            .push((rule.to_owned(), condition.to_owned(), template.to_owned()));
        self
    }

    /* LEAVES */

    fn add(&mut self, kind: Combinator) -> ParserId {
        self.parsers.push(Parser {
            name: None,
            disposable: true,
            symbol: None,
            kind,
        })
    }

    pub fn text(&mut self, text: &str) -> ParserId {
        self.add(Combinator::Text(text.to_owned()))
    }

    pub fn regex(&mut self, pattern: &str) -> BuildResult<ParserId> {
        let pattern = Pattern::new(pattern)?;
        Ok(self.add(Combinator::RegExp(pattern)))
    }

    /// The (shared) parser for insignificant whitespace
    pub fn whitespace(&mut self) -> ParserId {
        match self.whitespace_id {
            Some(id) => id,
            None => {
                let id = self.add(Combinator::Whitespace);
                self.whitespace_id = Some(id);
                id
            }
        }
    }

    /// A piece of text followed by insignificant whitespace
    pub fn token(&mut self, text: &str) -> ParserId {
        let text = self.text(text);
        let ws = self.whitespace();
        self.series([text, ws])
    }

    /// A piece of text followed by insignificant whitespace, neither of which appear in the tree
    pub fn dropped_token(&mut self, text: &str) -> ParserId {
        let text = self.text(text);
        let text = self.drop(text);
        let ws = self.whitespace();
        let ws = self.drop(ws);
        self.series([text, ws])
    }

    /* COMBINATORS */

    pub fn series(&mut self, children: impl IntoIterator<Item = ParserId>) -> ParserId {
        self.add(Combinator::Series {
            children: children.into_iter().collect(),
            mandatory: None,
        })
    }

    /// A series in which every failure from the `mandatory`th child onwards is reported as an
    /// error instead of causing the series to backtrack
    pub fn series_mandatory(
        &mut self,
        children: impl IntoIterator<Item = ParserId>,
        mandatory: usize,
    ) -> ParserId {
        self.add(Combinator::Series {
            children: children.into_iter().collect(),
            mandatory: Some(mandatory),
        })
    }

    pub fn alternative(&mut self, children: impl IntoIterator<Item = ParserId>) -> ParserId {
        self.add(Combinator::Alternative(children.into_iter().collect()))
    }

    pub fn repeat(&mut self, child: ParserId, min: usize, max: Option<usize>) -> ParserId {
        self.add(Combinator::Repetition { child, min, max })
    }

    pub fn optional(&mut self, child: ParserId) -> ParserId {
        self.repeat(child, 0, Some(1))
    }

    pub fn zero_or_more(&mut self, child: ParserId) -> ParserId {
        self.repeat(child, 0, None)
    }

    pub fn one_or_more(&mut self, child: ParserId) -> ParserId {
        self.repeat(child, 1, None)
    }

    pub fn lookahead(&mut self, child: ParserId) -> ParserId {
        self.add(Combinator::Lookahead {
            child,
            negate: false,
        })
    }

    pub fn negative_lookahead(&mut self, child: ParserId) -> ParserId {
        self.add(Combinator::Lookahead {
            child,
            negate: true,
        })
    }

    pub fn lookbehind(&mut self, child: ParserId) -> BuildResult<ParserId> {
        self.add_lookbehind(child, false)
    }

    pub fn negative_lookbehind(&mut self, child: ParserId) -> BuildResult<ParserId> {
        self.add_lookbehind(child, true)
    }

    fn add_lookbehind(&mut self, child: ParserId, negate: bool) -> BuildResult<ParserId> {
        let matcher = match &self.parsers[child].kind {
            Combinator::Text(text) => Behind::Text(text.clone()),
            Combinator::RegExp(pattern) => {
                Behind::RegExp(compile_regex(&format!(r"(?:{})\z", pattern.source))?)
            }
            _ => return Err(BuildError::InvalidLookbehind(self.describe(child))),
        };
        Ok(self.add(Combinator::Lookbehind {
            child,
            matcher,
            negate,
        }))
    }

    pub fn capture(&mut self, stack: &str, child: ParserId) -> ParserId {
        self.add(Combinator::Capture {
            stack: stack.to_owned(),
            child,
        })
    }

    pub fn retrieve(&mut self, stack: &str, match_fn: MatchFn) -> ParserId {
        self.add(Combinator::Retrieve {
            stack: stack.to_owned(),
            match_fn,
        })
    }

    pub fn pop(&mut self, stack: &str, match_fn: MatchFn) -> ParserId {
        self.add(Combinator::Pop {
            stack: stack.to_owned(),
            match_fn,
        })
    }

    pub fn drop(&mut self, child: ParserId) -> ParserId {
        self.add(Combinator::Drop(child))
    }

    pub fn synonym(&mut self, child: ParserId) -> ParserId {
        self.add(Combinator::Synonym(child))
    }

    /* RULES */

    /// Declares a rule before its body exists, returning a placeholder which can be used in other
    /// rules.  The rule must later be [`define`](Self::define)d.
    pub fn declare(&mut self, name: &str) -> BuildResult<ParserId> {
        if self.rules.contains_key(name) {
            return Err(BuildError::DuplicateRule(name.to_owned()));
        }
        let id = self.add(Combinator::Forward(None));
        self.rules.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Gives a name to a parser, turning it into a rule.  If the rule has been
    /// [`declare`](Self::declare)d, its placeholder is bound to `body`.  Returns the
    /// [`ParserId`] through which the rule should be referenced.
    pub fn define(&mut self, name: &str, body: ParserId) -> BuildResult<ParserId> {
        let placeholder = match self.rules.get(name) {
            Some(&id) if matches!(self.parsers[id].kind, Combinator::Forward(None)) => Some(id),
            Some(_) => return Err(BuildError::DuplicateRule(name.to_owned())),
            None => None,
        };
        // A parser which already has a name (or a reference to another rule) gets wrapped so
        // that both names survive
        let is_rule_reference = self.parsers[body].name.is_some()
            || matches!(self.parsers[body].kind, Combinator::Forward(_))
            || self.whitespace_id == Some(body);
        let body = if is_rule_reference {
            self.synonym(body)
        } else {
            body
        };

        let parser = &mut self.parsers[body];
        parser.name = Some(name.to_owned());
        parser.disposable = match &self.disposable {
            Some(pattern) => pattern.is_match(name),
            None => name.starts_with('_'),
        };
        self.rule_names.push(name.to_owned());

        Ok(match placeholder {
            Some(id) => {
                self.parsers[id].kind = Combinator::Forward(Some(body));
                id
            }
            None => {
                self.rules.insert(name.to_owned(), body);
                body
            }
        })
    }

    /// Looks up a rule which has already been declared or defined
    pub fn rule(&self, name: &str) -> BuildResult<ParserId> {
        self.rules
            .get(name)
            .copied()
            .ok_or_else(|| BuildError::UndefinedRule(name.to_owned()))
    }

    fn describe(&self, id: ParserId) -> String {
        match &self.parsers[id].kind {
            Combinator::Text(text) => format!("'{}'", text),
            Combinator::RegExp(pattern) => format!("/{}/", pattern.source),
            kind => self.parsers[id]
                .name
                .clone()
                .unwrap_or_else(|| kind.anonymous_tag().to_owned()),
        }
    }

    /* BUILDING */

    /// Checks the grammar and freezes it into a [`Grammar`] whose start rule is `root`
    pub fn build(self, root: &str) -> BuildResult<Grammar> {
        let GrammarBuilder {
            mut parsers,
            rules,
            rule_names,
            whitespace,
            comment,
            resume,
            error_messages,
            config,
            ..
        } = self;

        // Every placeholder must have been bound
        for name in rules.keys().sorted() {
            let id = rules[name];
            if matches!(parsers[id].kind, Combinator::Forward(None)) {
                return Err(BuildError::UnboundForward(name.clone()));
            }
        }
        if !rules.contains_key(root) {
            return Err(BuildError::UnknownRoot(root.to_owned()));
        }
        check_rule_cycles(&parsers, &rules, &rule_names)?;
        check_parsers(&parsers)?;
        assign_symbols(&mut parsers, &rules, &rule_names);

        // Compile whitespace, comment and resume patterns
        let whitespace_regex = match &comment {
            Some(c) => compile_regex(&format!(
                r"\A(?:{ws}(?:(?:{c}){ws})*)",
                ws = whitespace,
                c = c
            ))?,
            None => compile_regex(&format!(r"\A(?:{})", whitespace))?,
        };
        let comment = comment.as_deref().map(compile_regex).transpose()?;
        let mut resume_map = HashMap::<String, Vec<Regex>>::new();
        for (rule, patterns) in resume {
            if !rules.contains_key(&rule) {
                return Err(BuildError::UnknownResumeRule(rule));
            }
            let compiled = patterns
                .iter()
                .map(|p| compile_regex(p))
                .collect::<BuildResult<Vec<_>>>()?;
            resume_map.entry(rule).or_default().extend(compiled);
        }
        let mut messages_map = HashMap::<String, Vec<ErrorMessage>>::new();
        for (rule, condition, template) in error_messages {
            if !rules.contains_key(&rule) {
                return Err(BuildError::UnknownErrorMessageRule(rule));
            }
            let message = ErrorMessage::new(&condition, &template)?;
            messages_map.entry(rule).or_default().push(message);
        }

        log::debug!(
            "Built grammar with {} rules and {} parsers (root {:?})",
            rule_names.len(),
            parsers.len(),
            root
        );
        Ok(Grammar {
            parsers,
            rules,
            rule_names,
            root: root.to_owned(),
            whitespace: whitespace_regex,
            comment,
            resume: resume_map,
            error_messages: messages_map,
            config,
        })
    }

    /// Builds the grammar and wraps it in an [`Arc`], ready to be shared between workers
    pub fn build_shared(self, root: &str) -> BuildResult<Arc<Grammar>> {
        self.build(root).map(Arc::new)
    }
}

/// Checks for rules which are only defined in terms of each other (e.g. `a = b; b = a`), which
/// could never match anything.
fn check_rule_cycles(
    parsers: &IndexSlice<ParserId, [Parser]>,
    rules: &HashMap<String, ParserId>,
    rule_names: &[String],
) -> BuildResult<()> {
    // For every rule, the rule which it is a synonym of (if any)
    let synonym_of = |name: &str| -> Option<String> {
        let mut id = rules[name];
        if let Combinator::Forward(Some(target)) = parsers[id].kind {
            id = target;
        }
        match parsers[id].kind {
            Combinator::Synonym(child) => match &parsers[child].kind {
                Combinator::Forward(_) => rules
                    .iter()
                    .find(|(_, &rule_id)| rule_id == child)
                    .map(|(name, _)| name.clone()),
                _ => parsers[child].name.clone(),
            },
            _ => None,
        }
    };

    for name in rule_names {
        // The chain of synonyms which are being followed, used to detect cycles
        let mut chain = vec![name.clone()];
        let mut current = name.clone();
        while let Some(next) = synonym_of(&current) {
            if let Some(idx) = chain.iter().position(|n| *n == next) {
                // `chain[idx..] + next` forms the cycle
                let cycle = chain[idx..]
                    .iter()
                    .cloned()
                    .chain(std::iter::once(next))
                    .collect_vec();
                return Err(BuildError::RuleCycle(cycle));
            }
            chain.push(next.clone());
            current = next;
        }
    }
    Ok(())
}

/// Checks the properties of individual parsers which can't be checked while they are created
fn check_parsers(parsers: &IndexSlice<ParserId, [Parser]>) -> BuildResult<()> {
    let captured: HashSet<&str> = parsers
        .iter()
        .filter_map(|p| match &p.kind {
            Combinator::Capture { stack, .. } => Some(stack.as_str()),
            _ => None,
        })
        .collect();
    for parser in parsers.iter() {
        match &parser.kind {
            Combinator::Retrieve { stack, .. } | Combinator::Pop { stack, .. } => {
                if !captured.contains(stack.as_str()) {
                    return Err(BuildError::UncapturedSymbol(stack.clone()));
                }
            }
            Combinator::Series {
                children,
                mandatory: Some(mandatory),
            } if *mandatory >= children.len() => {
                return Err(BuildError::MandatoryOutOfRange {
                    index: *mandatory,
                    len: children.len(),
                })
            }
            _ => {}
        }
    }
    Ok(())
}

/// Records, for every parser, the first rule (in order of definition) whose body contains it
fn assign_symbols(
    parsers: &mut IndexSlice<ParserId, [Parser]>,
    rules: &HashMap<String, ParserId>,
    rule_names: &[String],
) {
    for name in rule_names {
        let mut stack = vec![rules[name.as_str()]];
        while let Some(id) = stack.pop() {
            if parsers[id].symbol.is_some() {
                continue;
            }
            let children = match &parsers[id].kind {
                // Forward references lead into other rules, except for this rule's own placeholder
                Combinator::Forward(target) => {
                    let own_body = (*target)
                        .filter(|&t| parsers[t].name.as_deref() == Some(name.as_str()));
                    stack.extend(own_body);
                    continue;
                }
                kind => kind.children(),
            };
            let parser = &mut parsers[id];
            if parser.name.as_deref().map_or(false, |n| n != name) {
                continue;
            }
            parser.symbol = Some(name.clone());
            stack.extend(children);
        }
    }
}

fn compile_regex(pattern: &str) -> BuildResult<Regex> {
    Regex::new(pattern).map_err(|inner| BuildError::Regex {
        pattern: pattern.to_owned(),
        inner,
    })
}

////////////////////
// ERROR MESSAGES //
////////////////////

/// A custom message for mandatory-point failures, used when its condition matches the text at
/// the point of failure
#[derive(Debug, Clone)]
pub(crate) struct ErrorMessage {
    condition: Regex,
    template: Vec<Piece>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Text(String),
    Expected,
    Found,
}

impl ErrorMessage {
    fn new(condition: &str, template: &str) -> BuildResult<Self> {
        let malformed = |reason: &str| BuildError::MalformedErrorMessage {
            template: template.to_owned(),
            reason: reason.to_owned(),
        };

        let mut pieces = Vec::new();
        let mut text = String::new();
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    text.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    text.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(malformed("unmatched '{'"));
                    }
                    let piece = match name.as_str() {
                        "expected" => Piece::Expected,
                        "found" => Piece::Found,
                        _ => return Err(malformed(&format!("unknown placeholder {{{}}}", name))),
                    };
                    if !text.is_empty() {
                        pieces.push(Piece::Text(std::mem::take(&mut text)));
                    }
                    pieces.push(piece);
                }
                '}' => return Err(malformed("unmatched '}'")),
                c => text.push(c),
            }
        }
        if !text.is_empty() {
            pieces.push(Piece::Text(text));
        }

        Ok(Self {
            condition: compile_regex(&format!(r"\A(?:{})", condition))?,
            template: pieces,
        })
    }

    /// Does this message apply to a failure directly before `rest`?
    pub(crate) fn applies_to(&self, rest: &str) -> bool {
        self.condition.is_match(rest)
    }

    pub(crate) fn render(&self, expected: &str, found: &str) -> String {
        self.template
            .iter()
            .map(|piece| match piece {
                Piece::Text(text) => text.as_str(),
                Piece::Expected => expected,
                Piece::Found => found,
            })
            .collect()
    }
}

////////////
// ERRORS //
////////////

pub type BuildResult<T> = Result<T, BuildError>;

/// The ways that building a [`Grammar`] can fail.  These are all defects of the grammar itself,
/// and are detected before any document is parsed.
#[derive(Debug)]
pub enum BuildError {
    Regex {
        pattern: String,
        inner: regex::Error,
    },
    DuplicateRule(String),
    UndefinedRule(String),
    /// A rule was declared, but never defined
    UnboundForward(String),
    UnknownRoot(String),
    UnknownResumeRule(String),
    UnknownErrorMessageRule(String),
    /// An error message template with unbalanced braces or an unknown placeholder
    MalformedErrorMessage {
        template: String,
        reason: String,
    },
    /// A cycle of rules which are only defined in terms of each other
    RuleCycle(Vec<String>),
    /// A symbol is retrieved or popped, but never captured
    UncapturedSymbol(String),
    /// Lookbehinds can only contain texts or regexes
    InvalidLookbehind(String),
    MandatoryOutOfRange {
        index: usize,
        len: usize,
    },
}

impl Display for BuildError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::Regex { pattern, inner } => {
                write!(f, "invalid regex {:?}: {}", pattern, inner)
            }
            BuildError::DuplicateRule(name) => write!(f, "rule {:?} is defined twice", name),
            BuildError::UndefinedRule(name) => write!(f, "rule {:?} is not defined", name),
            BuildError::UnboundForward(name) => {
                write!(f, "rule {:?} is declared but never defined", name)
            }
            BuildError::UnknownRoot(name) => write!(f, "root rule {:?} is not defined", name),
            BuildError::UnknownResumeRule(name) => {
                write!(f, "resume patterns given for undefined rule {:?}", name)
            }
            BuildError::UnknownErrorMessageRule(name) => {
                write!(f, "error message given for undefined rule {:?}", name)
            }
            BuildError::MalformedErrorMessage { template, reason } => {
                write!(f, "malformed error message {:?}: {}", template, reason)
            }
            BuildError::RuleCycle(names) => {
                write!(f, "rules only refer to each other: {}", names.join(" -> "))
            }
            BuildError::UncapturedSymbol(name) => {
                write!(f, "symbol {:?} is retrieved but never captured", name)
            }
            BuildError::InvalidLookbehind(what) => write!(
                f,
                "lookbehinds can only contain texts or regexes, not {}",
                what
            ),
            BuildError::MandatoryOutOfRange { index, len } => write!(
                f,
                "mandatory index {} is out of range for a series of {} parsers",
                index, len
            ),
        }
    }
}

impl std::error::Error for BuildError {}

//////////////////
// HELPER TYPES //
//////////////////

index_vec::define_index_type! { pub struct ParserId = usize; }

pub type ParserVec<T> = IndexVec<ParserId, T>;
