//! The vocabulary of rewrites and conditions from which rule tables are built.
//!
//! Every rewrite is a total function: applied to a node it doesn't fit (e.g. `collapse` on a
//! leaf), it leaves the node untouched.  Errors attached to nodes which are removed are moved to
//! the node being rewritten, so that nothing reported by the parser gets lost.

use std::collections::HashSet;

use dhparse_grammar::{Error, ErrorCode, Node};
use regex::Regex;

use super::{condition, rewrite, Condition, Rewrite, TableError, TableResult};

/// The tag of the nodes created by the whitespace parser
pub const WHITESPACE_TAG: &str = ":Whitespace";

///////////////
// RESHAPING //
///////////////

/// If a node has exactly one child, replace the node by that child.  An anonymous child takes
/// over the tag of the node it replaces.
pub fn replace_by_single_child() -> Rewrite {
    rewrite(|node, _| {
        if let Some(child) = take_single_child(node) {
            replace_by(node, child);
        }
    })
}

/// If a node has exactly one child, replace the node's content by the content of that child
/// (the node keeps its tag).
pub fn reduce_single_child() -> Rewrite {
    rewrite(|node, _| {
        if let Some(child) = take_single_child(node) {
            reduce_to(node, child);
        }
    })
}

/// If a node has exactly one child, either [replace](replace_by_single_child) the node by it
/// (if the child satisfies `condition`) or [reduce](reduce_single_child) the node to it.
pub fn replace_or_reduce(condition: Condition) -> Rewrite {
    rewrite(move |node, ancestors| {
        if node.children().len() != 1 {
            return;
        }
        let ctx = child_context(node, ancestors);
        let replace = condition(&node.children()[0], &ctx);
        if let Some(child) = take_single_child(node) {
            if replace {
                replace_by(node, child);
            } else {
                reduce_to(node, child);
            }
        }
    })
}

/// Replaces a node by its first child tagged `tag`, discarding all other children
pub fn replace_by_child(tag: impl Into<String>) -> Rewrite {
    let tag = tag.into();
    rewrite(move |node, _| {
        let idx = match node.children().iter().position(|c| c.tag() == tag) {
            Some(idx) => idx,
            None => return,
        };
        let mut children = node.take_children();
        let child = children.remove(idx);
        for mut other in children {
            for e in other.drain_errors() {
                node.add_error(e);
            }
        }
        replace_by(node, child);
    })
}

/// Splices the children of every child branch which satisfies `condition` into the node.  If
/// `recursive` is set, those children are flattened first.
pub fn flatten(condition: Condition, recursive: bool) -> Rewrite {
    rewrite(move |node, ancestors| flatten_node(node, ancestors, &condition, recursive))
}

fn flatten_node(node: &mut Node, ancestors: &[String], condition: &Condition, recursive: bool) {
    if node.is_leaf() {
        return;
    }
    let ctx = child_context(node, ancestors);
    let mut result = Vec::with_capacity(node.children().len());
    for mut child in node.take_children() {
        if child.is_leaf() || !condition(&child, &ctx) {
            result.push(child);
            continue;
        }
        if recursive {
            flatten_node(&mut child, &ctx, condition, true);
        }
        for e in child.take_errors() {
            node.add_error(e);
        }
        result.extend(child.take_children());
    }
    node.set_children(result);
}

/// Turns a node into a leaf holding its whole content
pub fn collapse() -> Rewrite {
    rewrite(|node, _| {
        if node.is_leaf() {
            return;
        }
        let text = node.content();
        let errors: Vec<Error> = node
            .take_children()
            .into_iter()
            .flat_map(|mut c| c.drain_errors())
            .collect();
        node.set_text(text);
        for e in errors {
            node.add_error(e);
        }
    })
}

/// Merges each run of two or more adjacent leaf children which satisfy `condition` into a single
/// leaf tagged `tag`.
pub fn merge_adjacent(condition: Condition, tag: impl Into<String>) -> Rewrite {
    let tag = tag.into();
    rewrite(move |node, ancestors| {
        if node.is_leaf() {
            return;
        }
        let ctx = child_context(node, ancestors);
        let mut merged: Vec<Node> = Vec::with_capacity(node.children().len());
        let mut run = 0;
        for mut child in node.take_children() {
            if !(child.is_leaf() && condition(&child, &ctx)) {
                run = 0;
                merged.push(child);
                continue;
            }
            match merged.last_mut() {
                Some(last) if run > 0 => {
                    let pos = last.pos();
                    let mut joined = Node::leaf("", format!("{}{}", last.text(), child.text()))
                        .with_span(pos, child.end().saturating_sub(pos));
                    joined.set_tag(tag.as_str());
                    for e in last.take_errors().into_iter().chain(child.take_errors()) {
                        joined.add_error(e);
                    }
                    *last = joined;
                }
                _ => merged.push(child),
            }
            run += 1;
        }
        node.set_children(merged);
    })
}

/// Renames a node
pub fn rename(tag: impl Into<String>) -> Rewrite {
    let tag = tag.into();
    rewrite(move |node, _| node.set_tag(tag.as_str()))
}

/// Replaces the content of a node (and any children) by a fixed string
pub fn replace_content_with(text: impl Into<String>) -> Rewrite {
    let text = text.into();
    rewrite(move |node, _| {
        let errors = node.drain_errors();
        node.set_text(text.as_str());
        for e in errors {
            node.add_error(e);
        }
    })
}

/// Collapses every run of whitespace in a leaf into a single space.  In a branch, whitespace
/// children are replaced by a single space.
pub fn normalize_whitespace() -> Rewrite {
    rewrite(|node, _| {
        if node.is_leaf() {
            let normalized = collapse_whitespace(node.text());
            node.set_text(normalized);
            return;
        }
        for child in node.children_mut() {
            if child.tag() == WHITESPACE_TAG {
                child.set_text(" ");
            }
        }
    })
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_whitespace = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                out.push(' ');
            }
            in_whitespace = true;
        } else {
            out.push(c);
            in_whitespace = false;
        }
    }
    out
}

//////////////
// REMOVING //
//////////////

/// Removes every child which satisfies `condition`
pub fn remove_children_if(condition: Condition) -> Rewrite {
    rewrite(move |node, ancestors| {
        if node.is_leaf() {
            return;
        }
        let ctx = child_context(node, ancestors);
        let (removed, kept): (Vec<Node>, Vec<Node>) = node
            .take_children()
            .into_iter()
            .partition(|child| condition(child, &ctx));
        node.set_children(kept);
        for mut child in removed {
            for e in child.drain_errors() {
                node.add_error(e);
            }
        }
    })
}

/// Removes every child with one of the given tags
pub fn remove_nodes<S: AsRef<str>>(tags: &[S]) -> Rewrite {
    remove_children_if(is_one_of(tags))
}

/// Keeps only the children with one of the given tags
pub fn keep_nodes<S: AsRef<str>>(tags: &[S]) -> Rewrite {
    remove_children_if(not_one_of(tags))
}

/// Removes anonymous tokens with the given contents, or every anonymous token if `tokens` is
/// empty
pub fn remove_tokens<S: AsRef<str>>(tokens: &[S]) -> Rewrite {
    remove_children_if(is_token(tokens))
}

pub fn remove_whitespace() -> Rewrite {
    remove_children_if(condition(is_whitespace))
}

pub fn remove_empty() -> Rewrite {
    remove_children_if(condition(is_empty))
}

/// Removes whitespace and empty children
pub fn remove_expendables() -> Rewrite {
    remove_children_if(condition(|node, ctx| {
        is_whitespace(node, ctx) || is_empty(node, ctx)
    }))
}

/// Removes the first and last child of a node if both are anonymous tokens (e.g. the parentheses
/// around a group)
pub fn remove_brackets() -> Rewrite {
    rewrite(|node, _| {
        let children = node.children();
        if children.len() < 2 || !is_token_leaf(&children[0]) {
            return;
        }
        if !children.last().map_or(false, is_token_leaf) {
            return;
        }
        let mut children = node.take_children();
        let mut removed = vec![children.remove(0)];
        removed.extend(children.pop());
        node.set_children(children);
        for mut bracket in removed {
            for e in bracket.take_errors() {
                node.add_error(e);
            }
        }
    })
}

/// Removes every second child (starting with the second), provided that all of them are
/// anonymous tokens.  This turns `(sum 1 "+" 2 "+" 3)` into `(sum 1 2 3)`.
pub fn remove_infix_operator() -> Rewrite {
    rewrite(|node, _| {
        let children = node.children();
        if children.len() < 3 || !children.iter().skip(1).step_by(2).all(is_token_leaf) {
            return;
        }
        let (operands, operators): (Vec<(usize, Node)>, Vec<(usize, Node)>) = node
            .take_children()
            .into_iter()
            .enumerate()
            .partition(|(idx, _)| idx % 2 == 0);
        node.set_children(operands.into_iter().map(|(_, c)| c).collect());
        for (_, mut operator) in operators {
            for e in operator.take_errors() {
                node.add_error(e);
            }
        }
    })
}

/// Removes leading children which satisfy `condition`, descending into the first child
pub fn lstrip(condition: Condition) -> Rewrite {
    rewrite(move |node, ancestors| strip_node(node, ancestors, &condition, End::Start))
}

/// Removes trailing children which satisfy `condition`, descending into the last child
pub fn rstrip(condition: Condition) -> Rewrite {
    rewrite(move |node, ancestors| strip_node(node, ancestors, &condition, End::End))
}

/// Both [`lstrip`] and [`rstrip`]
pub fn strip(condition: Condition) -> Rewrite {
    rewrite(move |node, ancestors| {
        strip_node(node, ancestors, &condition, End::Start);
        strip_node(node, ancestors, &condition, End::End);
    })
}

#[derive(Debug, Clone, Copy)]
enum End {
    Start,
    End,
}

fn strip_node(node: &mut Node, ancestors: &[String], condition: &Condition, end: End) {
    let ctx = child_context(node, ancestors);
    loop {
        let idx = match end {
            End::Start => 0,
            End::End => node.children().len().saturating_sub(1),
        };
        let child = match node.children().get(idx) {
            Some(child) => child,
            None => return,
        };
        if condition(child, &ctx) {
            let mut removed = node.children_mut().remove(idx);
            for e in removed.drain_errors() {
                node.add_error(e);
            }
        } else {
            if !child.is_leaf() {
                strip_node(&mut node.children_mut()[idx], &ctx, condition, end);
            }
            return;
        }
    }
}

////////////
// CHECKS //
////////////

/// Applies `then` only to nodes which satisfy `condition`
pub fn apply_if(then: Rewrite, condition: Condition) -> Rewrite {
    rewrite(move |node, ancestors| {
        if condition(node, ancestors) {
            then(node, ancestors);
        }
    })
}

/// Applies `then` only to nodes which don't satisfy `condition`
pub fn apply_unless(then: Rewrite, condition: Condition) -> Rewrite {
    rewrite(move |node, ancestors| {
        if !condition(node, ancestors) {
            then(node, ancestors);
        }
    })
}

/// Attaches an error to every node whose whole content doesn't match `pattern`
pub fn assert_content(pattern: &str) -> TableResult<Rewrite> {
    let regex = full_match_regex("assert_content", pattern)?;
    let pattern = pattern.to_owned();
    Ok(rewrite(move |node, _| {
        let content = node.content();
        if !regex.is_match(&content) {
            let message = format!(
                "content {:?} of {:?} does not match /{}/",
                content,
                node.tag(),
                pattern
            );
            add_error_once(node, Error::new(node.pos(), ErrorCode::ASSERTION_FAILED, message));
        }
    }))
}

/// Attaches an error to a node for every child whose tag isn't one of `tags`
pub fn require<S: AsRef<str>>(tags: &[S]) -> Rewrite {
    let allowed = tag_set(tags);
    rewrite(move |node, _| {
        let unexpected: Vec<(usize, String)> = node
            .children()
            .iter()
            .filter(|c| !allowed.contains(c.tag()))
            .map(|c| (c.pos(), c.tag().to_owned()))
            .collect();
        for (pos, tag) in unexpected {
            let message = format!("{:?} is not allowed inside {:?}", tag, node.tag());
            add_error_once(node, Error::new(pos, ErrorCode::ASSERTION_FAILED, message));
        }
    })
}

/// Attaches an error to a node for every child whose tag is one of `tags`
pub fn forbid<S: AsRef<str>>(tags: &[S]) -> Rewrite {
    let forbidden = tag_set(tags);
    rewrite(move |node, _| {
        let found: Vec<(usize, String)> = node
            .children()
            .iter()
            .filter(|c| forbidden.contains(c.tag()))
            .map(|c| (c.pos(), c.tag().to_owned()))
            .collect();
        for (pos, tag) in found {
            let message = format!("{:?} must not appear inside {:?}", tag, node.tag());
            add_error_once(node, Error::new(pos, ErrorCode::ASSERTION_FAILED, message));
        }
    })
}

/// Checks are idempotent: running one twice doesn't report the same problem twice
fn add_error_once(node: &mut Node, error: Error) {
    if !node.errors().contains(&error) {
        node.add_error(error);
    }
}

////////////////
// CONDITIONS //
////////////////

pub fn is_disposable(node: &Node, _ancestors: &[String]) -> bool {
    node.is_disposable()
}

pub fn is_named(node: &Node, _ancestors: &[String]) -> bool {
    !node.is_disposable()
}

pub fn is_whitespace(node: &Node, _ancestors: &[String]) -> bool {
    node.tag() == WHITESPACE_TAG
}

pub fn is_empty(node: &Node, _ancestors: &[String]) -> bool {
    node.is_empty()
}

/// Matches anonymous leaves (other than whitespace) whose content is one of `tokens`, or any
/// such leaf if `tokens` is empty
pub fn is_token<S: AsRef<str>>(tokens: &[S]) -> Condition {
    let tokens = tag_set(tokens);
    condition(move |node, _| {
        is_token_leaf(node) && (tokens.is_empty() || tokens.contains(node.text()))
    })
}

pub fn is_one_of<S: AsRef<str>>(tags: &[S]) -> Condition {
    let tags = tag_set(tags);
    condition(move |node, _| tags.contains(node.tag()))
}

pub fn not_one_of<S: AsRef<str>>(tags: &[S]) -> Condition {
    let tags = tag_set(tags);
    condition(move |node, _| !tags.contains(node.tag()))
}

/// Matches nodes whose whole content matches `pattern`
pub fn content_matches(pattern: &str) -> TableResult<Condition> {
    let regex = full_match_regex("content_matches", pattern)?;
    Ok(condition(move |node, _| regex.is_match(&node.content())))
}

/// Matches nodes whose parent has one of the given tags
pub fn parent_is<S: AsRef<str>>(tags: &[S]) -> Condition {
    let tags = tag_set(tags);
    condition(move |_, ancestors| ancestors.last().map_or(false, |tag| tags.contains(tag)))
}

/////////////
// HELPERS //
/////////////

fn is_token_leaf(node: &Node) -> bool {
    node.is_leaf() && node.is_disposable() && node.tag() != WHITESPACE_TAG
}

fn tag_set<S: AsRef<str>>(tags: &[S]) -> HashSet<String> {
    tags.iter().map(|t| t.as_ref().to_owned()).collect()
}

fn full_match_regex(rewrite: &str, pattern: &str) -> TableResult<Regex> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| TableError::BadArgument {
        rewrite: rewrite.to_owned(),
        reason: e.to_string(),
    })
}

/// The ancestors of `node`'s children
fn child_context(node: &Node, ancestors: &[String]) -> Vec<String> {
    let mut ctx = Vec::with_capacity(ancestors.len() + 1);
    ctx.extend_from_slice(ancestors);
    ctx.push(node.tag().to_owned());
    ctx
}

fn take_single_child(node: &mut Node) -> Option<Node> {
    if node.children().len() != 1 {
        return None;
    }
    node.take_children().pop()
}

fn replace_by(node: &mut Node, mut child: Node) {
    if child.is_disposable() {
        child.set_tag(node.tag());
    }
    for e in node.take_errors() {
        child.add_error(e);
    }
    *node = child;
}

fn reduce_to(node: &mut Node, mut child: Node) {
    for e in child.take_errors() {
        node.add_error(e);
    }
    if child.is_leaf() {
        node.set_text(child.text());
    } else {
        node.set_children(child.take_children());
    }
}

#[cfg(test)]
mod tests {
    use dhparse_grammar::serialize::parse_sxpr;

    use super::*;

    /// Applies `rw` to the root of the tree written as `before`
    fn check(rw: Rewrite, before: &str, after: &str) {
        let mut tree = parse_sxpr(before).unwrap();
        rw(&mut tree, &[]);
        assert_eq!(tree.as_flat_sxpr(), after);
    }

    #[test]
    fn single_children() {
        check(replace_by_single_child(), "(a (b x))", r#"(b "x")"#);
        // Anonymous children inherit the tag of the node they replace
        check(
            replace_by_single_child(),
            "(a (:Series (b x) (c y)))",
            r#"(a (b "x") (c "y"))"#,
        );
        check(replace_by_single_child(), "(a (b x) (c y))", r#"(a (b "x") (c "y"))"#);
        check(reduce_single_child(), "(a (b x))", r#"(a "x")"#);
        check(reduce_single_child(), "(a (b (c x)))", r#"(a (c "x"))"#);
        let named = condition(is_named);
        check(replace_or_reduce(named.clone()), "(a (b x))", r#"(b "x")"#);
        check(replace_or_reduce(named), "(a (:Text x))", r#"(a "x")"#);
        check(replace_by_child("c"), "(a (b x) (c y))", r#"(c "y")"#);
    }

    #[test]
    fn flattening() {
        let tree = "(a (:Series (b x) (:Series (c y))) (d (e z)))";
        check(
            flatten(condition(is_disposable), true),
            tree,
            r#"(a (b "x") (c "y") (d (e "z")))"#,
        );
        check(
            flatten(condition(is_disposable), false),
            tree,
            r#"(a (b "x") (:Series (c "y")) (d (e "z")))"#,
        );
        check(collapse(), tree, r#"(a "xyz")"#);
    }

    #[test]
    fn merging() {
        check(
            merge_adjacent(is_one_of(&["char"]), "word"),
            "(a (char h) (char i) (space _) (char x))",
            r#"(a (word "hi") (space "_") (char "x"))"#,
        );
    }

    #[test]
    fn removing() {
        let tree = r#"(a (b x) (:Whitespace " ") (:Text "+") (c "") (d y))"#;
        check(
            remove_nodes(&["b", "d"]),
            tree,
            r#"(a (:Whitespace " ") (:Text "+") (c ""))"#,
        );
        check(keep_nodes(&["b"]), tree, r#"(a (b "x"))"#);
        check(
            remove_tokens(&["+"]),
            tree,
            r#"(a (b "x") (:Whitespace " ") (c "") (d "y"))"#,
        );
        // Tokens which aren't listed stay
        check(
            remove_tokens(&["-"]),
            tree,
            r#"(a (b "x") (:Whitespace " ") (:Text "+") (c "") (d "y"))"#,
        );
        check(
            remove_whitespace(),
            tree,
            r#"(a (b "x") (:Text "+") (c "") (d "y"))"#,
        );
        check(
            remove_empty(),
            tree,
            r#"(a (b "x") (:Whitespace " ") (:Text "+") (d "y"))"#,
        );
        check(remove_expendables(), tree, r#"(a (b "x") (:Text "+") (d "y"))"#);
    }

    #[test]
    fn brackets_and_operators() {
        check(
            remove_brackets(),
            r#"(group (:Text "(") (num 1) (:Text ")"))"#,
            r#"(group (num "1"))"#,
        );
        // Only removed in pairs
        check(
            remove_brackets(),
            r#"(group (:Text "(") (num 1))"#,
            r#"(group (:Text "(") (num "1"))"#,
        );
        check(
            remove_infix_operator(),
            r#"(sum (num 1) (:Text "+") (num 2) (:Text "+") (num 3))"#,
            r#"(sum (num "1") (num "2") (num "3"))"#,
        );
        check(
            remove_infix_operator(),
            r#"(sum (num 1) (op "+") (num 2))"#,
            r#"(sum (num "1") (op "+") (num "2"))"#,
        );
    }

    #[test]
    fn stripping() {
        let ws = condition(is_whitespace);
        let tree = r#"(a (:Whitespace " ") (b (:Whitespace " ") (c x) (:Whitespace " ")) (:Whitespace " "))"#;
        check(
            lstrip(ws.clone()),
            tree,
            r#"(a (b (c "x") (:Whitespace " ")) (:Whitespace " "))"#,
        );
        check(
            rstrip(ws.clone()),
            tree,
            r#"(a (:Whitespace " ") (b (:Whitespace " ") (c "x")))"#,
        );
        check(strip(ws), tree, r#"(a (b (c "x")))"#);
    }

    #[test]
    fn content_rewrites() {
        check(rename("b"), "(a x)", r#"(b "x")"#);
        check(replace_content_with("y"), "(a (b x))", r#"(a "y")"#);
        check(normalize_whitespace(), "(a \"x  \t y\")", r#"(a "x y")"#);
        check(
            normalize_whitespace(),
            r#"(a (b x) (:Whitespace "  ") (b y))"#,
            r#"(a (b "x") (:Whitespace " ") (b "y"))"#,
        );
    }

    #[test]
    fn conditional_rewrites() {
        let is_a = is_one_of(&["a"]);
        check(apply_if(rename("z"), is_a.clone()), "(a x)", r#"(z "x")"#);
        check(apply_if(rename("z"), is_a.clone()), "(b x)", r#"(b "x")"#);
        check(apply_unless(rename("z"), is_a), "(b x)", r#"(z "x")"#);
        let numeric = content_matches("[0-9]+").unwrap();
        assert!(numeric(&Node::leaf("n", "42"), &[]));
        assert!(!numeric(&Node::leaf("n", "42a"), &[]));
        assert!(content_matches("(").is_err());
    }

    #[test]
    fn assertions_attach_errors() {
        let mut tree = parse_sxpr("(list (item 1) (junk 2) (item x))").unwrap();
        let checks = [
            require(&["item"]),
            forbid(&["junk"]),
            assert_content("[0-9 ]*").unwrap(),
        ];
        for _ in 0..2 {
            for rw in &checks {
                rw(&mut tree, &[]);
            }
        }
        // Each problem is only reported once, even though the checks ran twice
        let codes: Vec<ErrorCode> = tree.errors().iter().map(|e| e.code).collect();
        assert_eq!(codes, vec![ErrorCode::ASSERTION_FAILED; 3]);
        assert!(tree.errors()[0].message.contains("\"junk\" is not allowed"));
    }
}
