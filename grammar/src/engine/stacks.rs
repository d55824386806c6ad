//! The named capture stacks used by context-sensitive parsers, along with a log of every change
//! so that the stacks can be restored when the engine backtracks.

use std::collections::HashMap;

use itertools::Itertools;

/// A single change to the capture stacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum StackOp {
    Push { stack: String, value: String },
    Pop { stack: String, value: String },
}

#[derive(Debug, Default)]
pub(super) struct Stacks {
    stacks: HashMap<String, Vec<String>>,
    /// Every change made to `stacks`, in order.  Undoing these in reverse order restores the
    /// stacks to any earlier state.
    log: Vec<StackOp>,
    /// How many times the stacks have been read or written.  Results which depend on the stacks
    /// can't be memoized, and this is how the engine detects them.
    accesses: usize,
}

impl Stacks {
    /// A position in the log, to which the stacks can later be [`rollback`](Self::rollback)ed
    pub fn mark(&self) -> usize {
        self.log.len()
    }

    pub fn accesses(&self) -> usize {
        self.accesses
    }

    /// The value on top of a stack, or `None` if the stack is empty
    pub fn top(&mut self, stack: &str) -> Option<&str> {
        self.accesses += 1;
        self.stacks
            .get(stack)
            .and_then(|values| values.last())
            .map(String::as_str)
    }

    pub fn push(&mut self, stack: &str, value: String) {
        self.accesses += 1;
        self.stacks
            .entry(stack.to_owned())
            .or_default()
            .push(value.clone());
        self.log.push(StackOp::Push {
            stack: stack.to_owned(),
            value,
        });
    }

    pub fn pop(&mut self, stack: &str) -> Option<String> {
        self.accesses += 1;
        let value = self.stacks.get_mut(stack)?.pop()?;
        self.log.push(StackOp::Pop {
            stack: stack.to_owned(),
            value: value.clone(),
        });
        Some(value)
    }

    /// Undoes every change made since `mark`
    pub fn rollback(&mut self, mark: usize) {
        while self.log.len() > mark {
            match self.log.pop() {
                Some(StackOp::Push { stack, .. }) => {
                    if let Some(values) = self.stacks.get_mut(&stack) {
                        values.pop();
                    }
                }
                Some(StackOp::Pop { stack, value }) => {
                    self.stacks.entry(stack).or_default().push(value);
                }
                None => break,
            }
        }
    }

    /// The changes made since `mark`, which can be re-applied with [`redo`](Self::redo) after a
    /// rollback
    pub fn ops_since(&self, mark: usize) -> Vec<StackOp> {
        self.log[mark..].to_vec()
    }

    pub fn redo(&mut self, ops: &[StackOp]) {
        for op in ops {
            match op {
                StackOp::Push { stack, value } => self.push(stack, value.clone()),
                StackOp::Pop { stack, .. } => {
                    self.pop(stack);
                }
            }
        }
    }

    /// The names of all stacks which still hold values, in alphabetical order
    pub fn non_empty(&self) -> Vec<&str> {
        self.stacks
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(name, _)| name.as_str())
            .sorted()
            .collect_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_and_redo() {
        let mut stacks = Stacks::default();
        stacks.push("tag", "a".to_owned());
        let mark = stacks.mark();
        stacks.push("tag", "b".to_owned());
        assert_eq!(stacks.pop("tag").as_deref(), Some("b"));
        assert_eq!(stacks.pop("tag").as_deref(), Some("a"));
        assert_eq!(stacks.top("tag"), None);

        let ops = stacks.ops_since(mark);
        stacks.rollback(mark);
        assert_eq!(stacks.top("tag"), Some("a"));
        stacks.redo(&ops);
        assert_eq!(stacks.top("tag"), None);
        assert!(stacks.non_empty().is_empty());

        stacks.rollback(0);
        assert_eq!(stacks.non_empty(), vec![] as Vec<&str>);
    }

    #[test]
    fn accesses_are_counted() {
        let mut stacks = Stacks::default();
        assert_eq!(stacks.pop("x"), None);
        stacks.top("x");
        assert_eq!(stacks.accesses(), 2);
        // Failed pops aren't logged
        assert_eq!(stacks.mark(), 0);
    }
}
