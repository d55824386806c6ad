//! Everything that happens to a document after the grammar: transformation of its syntax tree,
//! compilation into a value and the [`Pipeline`] which chains them onto the parser.
//!
//! Languages come in two flavours:
//! - [`Lang`]s, which are loaded from TOML files and compile documents to trees
//! - Built-in front-ends with hand-written compilers, like [`json::JsonFrontend`]
//!
//! Both implement [`Frontend`], which is all that batch processing needs to know about.

pub mod compile;
pub mod json;
pub mod lang;
pub mod pipeline;
pub mod transform;

pub use compile::Compiler;
pub use lang::{Lang, LoadError};
pub use pipeline::{Compilation, Frontend, Options, Pipeline, Report, Worker};
pub use transform::{RuleTable, Transformer};
