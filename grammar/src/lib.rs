//! Crate for language-independent grammars, and the engine which parses text with them.
//!
//! This includes:
//! - The combinator graph of a [`Grammar`], and the [`GrammarBuilder`] which creates it (in the
//!   [`grammar`] module)
//! - A packrat parsing engine, with support for left recursion, context-sensitive parsers and
//!   error recovery (used through [`Grammar::parse`])
//! - The syntax [`Node`]s produced by parsing, and their serializations (the [`node`] and
//!   [`serialize`] modules)
//! - A deserializeable schema for grammars written in TOML (the [`spec`] module)
//!
//! Parsing never fails outright.  Instead, [`Grammar::parse`] always returns a tree along with a
//! list of [`Error`]s describing everything that went wrong; text which couldn't be parsed ends up
//! in nodes tagged [`ZOMBIE_TAG`].

pub mod config;
mod engine;
pub mod error;
pub mod grammar;
pub mod node;
pub mod serialize;
pub mod spec;

pub use config::Config;
pub use error::{Error, ErrorCode, Severity};
pub use grammar::{BuildError, Grammar, GrammarBuilder, MatchFn, ParserId};
pub use node::{Node, ZOMBIE_TAG};
pub use serialize::Serialization;
pub use spec::SpecGrammar;
