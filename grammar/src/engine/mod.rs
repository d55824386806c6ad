//! The matching algorithm: recursive descent over a [`Grammar`]'s combinator graph, with packrat
//! memoization, bounded left recursion, capture stacks and mandatory-point error recovery.

mod arena;
mod recovery;
mod stacks;

use std::collections::HashMap;

use crate::{
    error::{Error, ErrorCode},
    grammar::{Behind, Combinator, Grammar, Parser, ParserId},
    node::{Node, ZOMBIE_TAG},
};

use self::{
    arena::{Arena, Kind, NodeId, RawNode},
    stacks::Stacks,
};

/// Parse `text` with `grammar`, starting at a given rule.  See [`Grammar::parse`].
pub(crate) fn parse(
    grammar: &Grammar,
    text: &str,
    start_rule: &str,
    complete_match: bool,
) -> (Node, Vec<Error>) {
    let start = match grammar.rule(start_rule) {
        Some(id) => id,
        None => {
            let error = Error::new(
                0,
                ErrorCode::UNKNOWN_START_RULE,
                format!("unknown start rule {:?}", start_rule),
            );
            return (zombie(text, 0, text.len()), vec![error]);
        }
    };

    let mut run = Run::new(grammar, text);
    let mut pieces = Vec::<Node>::new();
    let mut errors = Vec::<Error>::new();
    let mut pos = 0;
    let mut dropouts = 0;
    loop {
        let outcome = run.apply(start, pos);
        if let Some(fatal) = run.fatal.take() {
            errors.push(fatal);
            pieces.extend(outcome.and_then(|m| m.node).map(|id| run.arena.build(id, text)));
            if pos < text.len() {
                pieces.push(zombie(text, pos, text.len()));
            }
            break;
        }

        match outcome {
            Some(m) => {
                errors.extend(m.errors);
                let node = match m.node {
                    Some(id) => run.arena.build(id, text),
                    None => Node::leaf(start_rule, "").with_span(pos, m.end - pos),
                };
                pieces.push(node);
                pos = m.end;
                if !complete_match || pos >= text.len() {
                    break;
                }
                errors.push(Error::new(
                    pos,
                    ErrorCode::PARSER_STOPPED_BEFORE_END,
                    format!(
                        "parser {:?} stopped before end, {} remains",
                        start_rule,
                        found(text, pos)
                    ),
                ));
            }
            None => {
                let (fail_pos, expected) = run.farthest_failure(pos);
                errors.push(Error::new(
                    fail_pos,
                    ErrorCode::PARSER_DID_NOT_MATCH,
                    format!(
                        "parser {:?} did not match: expected {}, but {} found instead",
                        start_rule,
                        expected,
                        found(text, fail_pos)
                    ),
                ));
                if !complete_match {
                    pieces.push(zombie(text, pos, text.len()));
                    break;
                }
            }
        }

        // Skip to the next line and try again, up to a limited number of times
        if dropouts >= grammar.config().max_parser_dropouts {
            pieces.push(zombie(text, pos, text.len()));
            break;
        }
        dropouts += 1;
        let next_line = text[pos..]
            .find('\n')
            .map_or(text.len(), |offset| pos + offset + 1);
        pieces.push(zombie(text, pos, next_line));
        pos = next_line;
        if pos >= text.len() {
            break;
        }
    }

    if complete_match {
        let open_stacks = run.stacks.non_empty();
        if !open_stacks.is_empty() {
            let code = if start_rule == grammar.root() {
                ErrorCode::CAPTURE_STACK_NOT_EMPTY
            } else {
                ErrorCode::CAPTURE_STACK_NOT_EMPTY_WARNING
            };
            errors.push(Error::new(
                text.len(),
                code,
                format!("capture stacks not empty at end of input: {}", open_stacks.join(", ")),
            ));
        }
    }

    let root = match pieces.len() {
        0 => zombie(text, 0, text.len()),
        1 => pieces.remove(0),
        _ => Node::branch(ZOMBIE_TAG, pieces).with_span(0, text.len()),
    };
    log::debug!(
        "Parsed {} bytes from rule {:?}: {} errors, {} memo entries, {} nodes built",
        text.len(),
        start_rule,
        errors.len(),
        run.memo.len(),
        run.arena.len()
    );
    (root, errors)
}

/// A successful match
#[derive(Debug, Clone)]
struct Match {
    /// The node produced, or `None` if the match doesn't contribute to the tree
    node: Option<NodeId>,
    /// The position directly after the matched text
    end: usize,
    /// Errors found while recovering from mandatory-point failures within this match
    errors: Vec<Error>,
}

impl Match {
    fn new(node: Option<NodeId>, end: usize) -> Self {
        Self {
            node,
            end,
            errors: Vec::new(),
        }
    }
}

/// The outcome of trying a parser at some position (`None` means no match)
type Outcome = Option<Match>;

type Key = (ParserId, usize);

/// The state of one call to [`parse`].  This is never shared: each parse gets its own `Run`.
struct Run<'g, 't> {
    grammar: &'g Grammar,
    text: &'t str,

    memo: HashMap<Key, Outcome>,
    arena: Arena<'g>,
    stacks: Stacks,

    /// The current best result for every left-recursive rule which is currently being grown
    lr_seeds: HashMap<Key, Outcome>,
    /// Every time a seed in `lr_seeds` is used.  Results which depend on a seed can't be
    /// memoized.
    lr_hits: Vec<Key>,

    call_depth: usize,
    /// The address of a local variable in the frame which started this run
    stack_base: usize,
    /// Set inside lookaheads and lookbehinds, whose failures aren't reported
    lookaround_depth: usize,
    /// The furthest position at which a leaf parser failed, and what was expected there
    farthest: Option<(usize, Vec<String>)>,
    /// A fatal error, which stops the run
    fatal: Option<Error>,
}

impl<'g, 't> Run<'g, 't> {
    fn new(grammar: &'g Grammar, text: &'t str) -> Self {
        Self {
            grammar,
            text,
            memo: HashMap::new(),
            arena: Arena::default(),
            stacks: Stacks::default(),
            lr_seeds: HashMap::new(),
            lr_hits: Vec::new(),
            call_depth: 0,
            stack_base: stack_address(),
            lookaround_depth: 0,
            farthest: None,
            fatal: None,
        }
    }

    /// Try to match a parser at `pos`.  On failure, all changes to the capture stacks are undone.
    fn apply(&mut self, id: ParserId, pos: usize) -> Outcome {
        if self.fatal.is_some() {
            return None;
        }
        let key = (id, pos);
        if let Some(outcome) = self.memo.get(&key) {
            return outcome.clone();
        }
        let config = self.grammar.config();
        if self.call_depth >= config.max_call_depth {
            self.abort(Error::new(
                pos,
                ErrorCode::RECURSION_LIMIT,
                format!("maximum call depth of {} exceeded", config.max_call_depth),
            ));
            return None;
        }
        if stack_address().abs_diff(self.stack_base) > config.max_stack_size {
            self.abort(Error::new(
                pos,
                ErrorCode::RECURSION_LIMIT,
                format!(
                    "stack budget of {} bytes exceeded after {} nested calls",
                    config.max_stack_size, self.call_depth
                ),
            ));
            return None;
        }

        let grammar = self.grammar;
        let parser = grammar.parser(id);
        let accesses_before = self.stacks.accesses();
        let hits_before = self.lr_hits.len();
        let mark = self.stacks.mark();

        self.call_depth += 1;
        let outcome = self.dispatch(id, parser, pos);
        self.call_depth -= 1;

        if outcome.is_none() {
            self.stacks.rollback(mark);
        }
        // Only results which depend on nothing but the position can be memoized
        let is_pure = self.stacks.accesses() == accesses_before
            && self.lr_hits.len() == hits_before
            && self.fatal.is_none();
        if is_pure && is_memoized(parser) {
            self.memo.insert(key, outcome.clone());
        }
        outcome
    }

    fn dispatch(&mut self, id: ParserId, parser: &'g Parser, pos: usize) -> Outcome {
        let text = self.text;
        let rest = &text[pos..];
        match &parser.kind {
            Combinator::Text(text) => {
                if rest.starts_with(text.as_str()) {
                    Some(self.leaf(parser, pos, pos + text.len()))
                } else {
                    self.expected(pos, id);
                    None
                }
            }
            Combinator::RegExp(pattern) => match pattern.anchored.find(rest) {
                Some(m) => Some(self.leaf(parser, pos, pos + m.end())),
                None => {
                    self.expected(pos, id);
                    None
                }
            },
            Combinator::Whitespace => {
                let len = self.grammar.whitespace_regex().find(rest).map(|m| m.end());
                len.map(|len| self.leaf(parser, pos, pos + len))
            }

            Combinator::Series {
                children,
                mandatory,
            } => self.series(parser, children, *mandatory, pos),
            Combinator::Alternative(children) => {
                for &child in children {
                    if let Some(m) = self.apply(child, pos) {
                        return Some(self.wrap_one(parser, m, pos));
                    }
                    if self.fatal.is_some() {
                        return None;
                    }
                }
                None
            }
            Combinator::Repetition { child, min, max } => {
                self.repetition(parser, *child, *min, *max, pos)
            }
            Combinator::Forward(Some(target)) => self.forward(id, *target, pos),
            // Rejected by `GrammarBuilder::build`
            Combinator::Forward(None) => None,

            Combinator::Lookahead { child, negate } => {
                let mark = self.stacks.mark();
                self.lookaround_depth += 1;
                let matched = self.apply(*child, pos).is_some();
                self.lookaround_depth -= 1;
                self.stacks.rollback(mark);
                self.lookaround(id, parser, matched != *negate, pos)
            }
            Combinator::Lookbehind {
                matcher, negate, ..
            } => {
                let before = &text[..pos];
                let matched = match matcher {
                    Behind::Text(text) => before.ends_with(text.as_str()),
                    Behind::RegExp(regex) => regex.is_match(before),
                };
                self.lookaround(id, parser, matched != *negate, pos)
            }

            Combinator::Capture { stack, child } => {
                let m = self.apply(*child, pos)?;
                let value = match m.node {
                    Some(id) => self.arena.content(id, text),
                    None => text[pos..m.end].to_owned(),
                };
                self.stacks.push(stack, value);
                Some(self.wrap_one(parser, m, pos))
            }
            Combinator::Retrieve { stack, match_fn } | Combinator::Pop { stack, match_fn } => {
                let is_pop = matches!(parser.kind, Combinator::Pop { .. });
                let top = match self.stacks.top(stack).map(str::to_owned) {
                    Some(top) => top,
                    None => {
                        self.abort(Error::new(
                            pos,
                            ErrorCode::CAPTURE_STACK_UNDERFLOW,
                            format!("capture stack {:?} is empty", stack),
                        ));
                        return None;
                    }
                };
                match match_fn.apply(rest, &top) {
                    Some(len) => {
                        if is_pop {
                            self.stacks.pop(stack);
                        }
                        let tag = match parser.name {
                            Some(_) => parser.tag(),
                            None => stack.as_str(),
                        };
                        let node = RawNode::leaf(tag, pos..pos + len)
                            .with_disposable(tag.starts_with(':'));
                        Some(Match::new(Some(self.arena.add(node)), pos + len))
                    }
                    None => {
                        self.expected_text(pos, format!("'{}'", match_fn.expected(&top)));
                        None
                    }
                }
            }

            Combinator::Drop(child) => {
                let m = self.apply(*child, pos)?;
                Some(self.wrap_one(
                    parser,
                    Match {
                        node: None,
                        ..m
                    },
                    pos,
                ))
            }
            Combinator::Synonym(child) => {
                let m = self.apply(*child, pos)?;
                Some(self.wrap_one(parser, m, pos))
            }
        }
    }

    fn leaf(&mut self, parser: &'g Parser, pos: usize, end: usize) -> Match {
        let tag = parser.tag();
        let node = RawNode::leaf(tag, pos..end).with_disposable(tag.starts_with(':'));
        Match::new(Some(self.arena.add(node)), end)
    }

    /// A node holding text which was skipped during error recovery
    fn zombie(&mut self, pos: usize, end: usize) -> NodeId {
        self.arena.add(RawNode::leaf(ZOMBIE_TAG, pos..end))
    }

    fn lookaround(
        &mut self,
        id: ParserId,
        parser: &'g Parser,
        success: bool,
        pos: usize,
    ) -> Outcome {
        if success {
            Some(self.wrap_one(parser, Match::new(None, pos), pos))
        } else {
            self.expected(pos, id);
            None
        }
    }

    /* COMBINATORS */

    fn repetition(
        &mut self,
        parser: &'g Parser,
        child: ParserId,
        min: usize,
        max: Option<usize>,
        pos: usize,
    ) -> Outcome {
        let mut nodes = Vec::new();
        let mut errors = Vec::new();
        let mut end = pos;
        let mut count = 0;
        while max.map_or(true, |max| count < max) {
            let m = match self.apply(child, end) {
                Some(m) => m,
                None => break,
            };
            count += 1;
            let made_progress = m.end > end;
            nodes.extend(m.node);
            errors.extend(m.errors);
            end = m.end;
            if !made_progress {
                break;
            }
        }
        if count < min || self.fatal.is_some() {
            return None;
        }
        Some(Match {
            node: self.wrap_many(parser, nodes, pos, end),
            end,
            errors,
        })
    }

    /// Enters a rule through its forward reference, growing the result if the rule turns out to
    /// be left-recursive.
    ///
    /// When first entered at some position, the rule is run with a failing 'seed' in place of
    /// any left-recursive call.  If the seed was used, the rule is run again with the previous
    /// result as the seed, and so on, for as long as the match keeps getting longer (up to
    /// `left_recursion_depth` times).
    fn forward(&mut self, id: ParserId, target: ParserId, pos: usize) -> Outcome {
        let key = (id, pos);
        if let Some(seed) = self.lr_seeds.get(&key) {
            self.lr_hits.push(key);
            return seed.clone();
        }

        self.lr_seeds.insert(key, None);
        let hits_before = self.lr_hits.len();
        let mark = self.stacks.mark();
        let mut result = self.apply(target, pos);

        let is_left_recursive = self.lr_hits[hits_before..].contains(&key);
        if is_left_recursive {
            let limit = self.grammar.config().left_recursion_depth;
            let mut accepted_ops = self.stacks.ops_since(mark);
            let mut depth = 0;
            while let Some(current_end) = result.as_ref().map(|m| m.end) {
                if self.fatal.is_some() {
                    break;
                }
                self.lr_seeds.insert(key, result.clone());
                self.stacks.rollback(mark);
                let grown = match self.apply(target, pos) {
                    Some(next) if next.end > current_end => Some(next),
                    _ => None,
                };
                let at_limit = depth >= limit;
                match grown {
                    Some(next) if !at_limit => {
                        depth += 1;
                        accepted_ops = self.stacks.ops_since(mark);
                        result = Some(next);
                    }
                    still_growing => {
                        // Only a match which could still grow means that the limit was too low
                        if still_growing.is_some() {
                            if let Some(m) = &mut result {
                                m.errors.push(Error::new(
                                    pos,
                                    ErrorCode::LEFT_RECURSION_LIMIT,
                                    format!(
                                        "left recursion of {:?} stopped after {} iterations",
                                        self.grammar.describe(target),
                                        limit
                                    ),
                                ));
                            }
                        }
                        // Growing stopped, so restore the state after the best match
                        self.stacks.rollback(mark);
                        self.stacks.redo(&accepted_ops);
                        break;
                    }
                }
            }
        }

        self.lr_seeds.remove(&key);
        // If the only seed used was our own, then the result no longer depends on any seed
        if self.lr_hits[hits_before..].iter().all(|hit| *hit == key) {
            self.lr_hits.truncate(hits_before);
        }
        result
    }

    /* BUILDING THE TREE */

    /// Turns the result of a parser's only child into the result of the parser itself:
    /// - disposable parsers pass the child's node through unchanged
    /// - named parsers rename anonymous nodes, and wrap named ones
    fn wrap_one(&mut self, parser: &'g Parser, m: Match, pos: usize) -> Match {
        let Match { node, end, errors } = m;
        let node = match node {
            _ if parser.disposable => node,
            Some(id) if self.arena.get(id).disposable => {
                Some(self.arena.retag(id, parser.tag(), pos..end))
            }
            Some(id) => Some(
                self.arena
                    .add(RawNode::branch(parser.tag(), vec![id], pos..end)),
            ),
            None => Some(
                self.arena
                    .add(RawNode::leaf(parser.tag(), pos..pos).with_span(pos..end)),
            ),
        };
        Match { node, end, errors }
    }

    /// Combines the nodes produced by several children into one node: anonymous branches are
    /// spliced in, and empty anonymous leaves are dropped.
    fn wrap_many(
        &mut self,
        parser: &'g Parser,
        nodes: Vec<NodeId>,
        pos: usize,
        end: usize,
    ) -> Option<NodeId> {
        let mut children = Vec::with_capacity(nodes.len());
        for id in nodes {
            let node = self.arena.get(id);
            if node.disposable {
                if let Kind::Branch(grandchildren) = &node.kind {
                    children.extend(grandchildren.iter().copied());
                    continue;
                }
                if node.is_empty_leaf() {
                    continue;
                }
            }
            children.push(id);
        }

        if children.len() == 1 {
            let only = children.pop();
            return self.wrap_one(parser, Match::new(only, end), pos).node;
        }
        if children.is_empty() && parser.disposable {
            return None;
        }
        let node = if children.is_empty() {
            RawNode::leaf(parser.tag(), pos..pos)
        } else {
            RawNode::branch(parser.tag(), children, pos..end)
        };
        Some(
            self.arena
                .add(node.with_span(pos..end).with_disposable(parser.disposable)),
        )
    }

    /* ERROR REPORTING */

    fn abort(&mut self, error: Error) {
        log::warn!("Parsing aborted: {}", error.message);
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
    }

    /// Records that the parser `id` failed to match at `pos`
    fn expected(&mut self, pos: usize, id: ParserId) {
        if self.lookaround_depth > 0 {
            return;
        }
        let description = match self.grammar.parser(id).kind() {
            Combinator::Lookahead {
                child,
                negate: true,
            } => format!("anything but {}", self.grammar.describe(*child)),
            _ => self.grammar.describe(id),
        };
        self.expected_text(pos, description);
    }

    fn expected_text(&mut self, pos: usize, description: String) {
        if self.lookaround_depth > 0 {
            return;
        }
        match &mut self.farthest {
            Some((farthest, expected)) if *farthest == pos => {
                if !expected.contains(&description) {
                    expected.push(description);
                }
            }
            Some((farthest, _)) if *farthest > pos => {}
            _ => self.farthest = Some((pos, vec![description])),
        }
    }

    /// The farthest position (not before `pos`) at which a leaf failed, and a description of what
    /// was expected there
    fn farthest_failure(&self, pos: usize) -> (usize, String) {
        match &self.farthest {
            Some((farthest, expected)) if *farthest >= pos => (*farthest, expected.join(" or ")),
            _ => (pos, "something else".to_owned()),
        }
    }
}

/// The address of a local in the caller's frame, for measuring how deep the stack has grown
#[inline(never)]
fn stack_address() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}

/// Only rules and forward references are memoized; re-running anything else is cheap
fn is_memoized(parser: &Parser) -> bool {
    parser.name.is_some() || matches!(parser.kind, Combinator::Forward(_))
}

/// A node holding text which was skipped during error recovery
fn zombie(text: &str, pos: usize, end: usize) -> Node {
    Node::leaf(ZOMBIE_TAG, &text[pos..end]).with_span(pos, end - pos)
}

/// Describes the text found at `pos`, for use in error messages
fn found(text: &str, pos: usize) -> String {
    let rest = &text[pos.min(text.len())..];
    if rest.is_empty() {
        return "end of input".to_owned();
    }
    let snippet: String = rest.chars().take(10).collect();
    let ellipsis = if snippet.len() < rest.len() { "..." } else { "" };
    format!("»{}{}«", snippet.replace('\n', "\\n"), ellipsis)
}
