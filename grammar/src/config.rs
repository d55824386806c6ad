//! Run-time configuration of the parsing engine and of the tree serializers.  A [`Config`] is
//! always passed explicitly into whatever needs it; there are no hidden global settings.

use serde::Deserialize;

use crate::serialize::Serialization;

/// Every user-configurable parameter of the engine.  This can be [`Deserialize`]d (e.g. from the
/// `[config]` table of a language file), in which case missing fields take their default values.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// How often a left-recursive rule may re-enter itself at the same offset (i.e. how many
    /// times a left-recursive match is allowed to grow).  Re-entries beyond this bound fail.
    pub left_recursion_depth: usize,
    /// How many times the engine retries the start rule after it stopped before the end of the
    /// document (only relevant if a complete match is requested).
    pub max_parser_dropouts: usize,
    /// How many bytes after a mandatory-point failure are searched for a place to resume
    /// parsing.  `None` searches the whole remaining document.
    pub reentry_search_window: Option<usize>,
    /// The maximum number of nested parser calls before the run is aborted with a fatal error
    pub max_call_depth: usize,
    /// How many bytes of the native stack one parse may use before it is aborted with the same
    /// fatal error as for `max_call_depth`.  This must stay below the stack size of the thread
    /// which runs the parser (2 MiB for threads spawned by `std`).
    pub max_stack_size: usize,
    /// S-expressions which are at most this long are written on a single line
    pub flatten_sxpr_threshold: usize,
    /// The serialization used when none is requested explicitly
    pub default_serialization: Serialization,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            left_recursion_depth: 5,
            max_parser_dropouts: 3,
            reentry_search_window: Some(10_000),
            max_call_depth: 1_000,
            max_stack_size: 1024 * 1024,
            flatten_sxpr_threshold: 120,
            default_serialization: Serialization::Sxpr,
        }
    }
}
