//! Sequences, and how the engine recovers when a sequence fails after its mandatory point.

use std::ops::Range;

use regex::Regex;

use super::{found, Match, Outcome, Run};
use crate::{
    error::{Error, ErrorCode},
    grammar::{Parser, ParserId},
};

impl<'g> Run<'g, '_> {
    pub(super) fn series(
        &mut self,
        parser: &'g Parser,
        children: &[ParserId],
        mandatory: Option<usize>,
        pos: usize,
    ) -> Outcome {
        let mut nodes = Vec::with_capacity(children.len());
        let mut errors = Vec::new();
        let mut end = pos;
        for (idx, &child) in children.iter().enumerate() {
            if let Some(m) = self.apply(child, end) {
                nodes.extend(m.node);
                errors.extend(m.errors);
                end = m.end;
                continue;
            }
            // Before the mandatory point, failure is ordinary backtracking
            if self.fatal.is_some() || mandatory.map_or(true, |mandatory| idx < mandatory) {
                return None;
            }

            let rule = parser.symbol().unwrap_or_else(|| parser.tag());
            errors.push(Error::new(
                end,
                ErrorCode::MANDATORY_CONTINUATION,
                self.mandatory_message(rule, child, end),
            ));

            match self.reentry_point(rule, end) {
                Some(reentry) => {
                    if reentry > end {
                        nodes.push(self.zombie(end, reentry));
                    }
                    end = reentry;
                    // Try the failed parser again from the point of re-entry
                    if let Some(m) = self.apply(child, end) {
                        nodes.extend(m.node);
                        errors.extend(m.errors);
                        end = m.end;
                    }
                }
                None => {
                    // Nowhere to resume, so the rest of the input is lost
                    if end < self.text.len() {
                        let zombie = self.zombie(end, self.text.len());
                        nodes.push(zombie);
                    }
                    end = self.text.len();
                    break;
                }
            }
        }

        log::trace!("{} matched {}..{}", parser.tag(), pos, end);
        Some(Match {
            node: self.wrap_many(parser, nodes, pos, end),
            end,
            errors,
        })
    }

    /// The message for a failure of `child` at `pos`: the first of the rule's custom messages
    /// which applies there, or a generic one
    fn mandatory_message(&self, rule: &str, child: ParserId, pos: usize) -> String {
        let expected = self.grammar.describe(child);
        let found = found(self.text, pos);
        match self
            .grammar
            .error_messages(rule)
            .iter()
            .find(|message| message.applies_to(&self.text[pos..]))
        {
            Some(message) => message.render(&expected, &found),
            None => format!("expected {} by {:?}, but {} found instead", expected, rule, found),
        }
    }

    /// Where parsing of `rule` should resume after a mandatory-point failure at `pos`: the start
    /// of the closest match of one of the rule's resume patterns
    fn reentry_point(&self, rule: &str, pos: usize) -> Option<usize> {
        let window = self.search_window(pos);
        closest_match(
            &self.text[pos..window],
            self.grammar.resume_patterns(rule),
            self.grammar.comment_regex(),
        )
        .map(|offset| pos + offset)
    }

    /// The end of the region searched for resume patterns, starting from `pos`
    fn search_window(&self, pos: usize) -> usize {
        let mut end = match self.grammar.config().reentry_search_window {
            Some(window) => (pos + window).min(self.text.len()),
            None => self.text.len(),
        };
        while !self.text.is_char_boundary(end) {
            end -= 1;
        }
        end
    }
}

/// The offset of the earliest match of any of `patterns` in `haystack`, ignoring matches which
/// start inside a comment
fn closest_match(haystack: &str, patterns: &[Regex], comment: Option<&Regex>) -> Option<usize> {
    let comments: Vec<Range<usize>> = comment.map_or_else(Vec::new, |c| {
        c.find_iter(haystack)
            .filter(|m| !m.range().is_empty())
            .map(|m| m.range())
            .collect()
    });
    let in_comment = |offset: usize| comments.iter().any(|range| range.contains(&offset));
    patterns
        .iter()
        .filter_map(|pattern| {
            pattern
                .find_iter(haystack)
                .map(|m| m.start())
                .find(|&start| !in_comment(start))
        })
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closest_match_skips_comments() {
        let patterns = [Regex::new(",").unwrap(), Regex::new(r"\}").unwrap()];
        let comment = Regex::new(r"/\*.*?\*/").unwrap();
        assert_eq!(closest_match("ab } c, d", &patterns, None), Some(3));
        assert_eq!(
            closest_match("a /* , } */ }", &patterns, Some(&comment)),
            Some(12)
        );
        assert_eq!(closest_match("no match", &patterns, Some(&comment)), None);
        assert_eq!(closest_match("anything", &[], None), None);
    }
}
