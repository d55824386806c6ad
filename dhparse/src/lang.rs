use std::{
    fmt::{Display, Formatter},
    path::{Path, PathBuf},
    sync::Arc,
};

use dhparse_grammar::{
    spec::ConvertError, BuildError, Config, Grammar, Node, Serialization, SpecGrammar,
};
use serde::Deserialize;

use crate::{
    compile::Compiler,
    pipeline::{Frontend, Pipeline, Worker},
    transform::{table_from_spec, TableError, TableSpec, Transformer},
};

/// A language described entirely by a TOML file: a grammar, the tables which transform its
/// syntax trees, and (optionally) settings for the engine.  Documents in a `Lang` compile to
/// their abstract syntax trees.
#[derive(Debug, Clone)]
pub struct Lang {
    header: Header,
    // This is stored in an `Arc` so that it can be shared by the pipelines of all workers
    grammar: Arc<Grammar>,
    transformer: Transformer,
}

impl Lang {
    pub fn load_toml_file(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let toml_string =
            std::fs::read_to_string(path).map_err(|e| LoadError::Io(path.to_owned(), e))?;
        Self::from_toml(&toml_string)
    }

    pub fn from_toml(s: &str) -> Result<Self, LoadError> {
        let lang_file: LangFile = toml::from_str(s).map_err(LoadError::Parse)?;
        let grammar = lang_file
            .grammar
            .into_grammar(lang_file.config)
            .map_err(LoadError::Convert)?;
        let tables = lang_file
            .transform
            .iter()
            .map(table_from_spec)
            .collect::<Result<Vec<_>, _>>()
            .map_err(LoadError::Table)?;
        log::info!(
            "Loaded language {:?} ({} rules, {} transformation passes)",
            lang_file.header.name,
            grammar.rule_names().len(),
            tables.len()
        );
        Ok(Self {
            header: lang_file.header,
            grammar: Arc::new(grammar),
            transformer: Transformer::new(tables),
        })
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    pub fn transformer(&self) -> &Transformer {
        &self.transformer
    }

    /// A fresh pipeline for this language, which compiles documents to their syntax trees
    pub fn pipeline(&self) -> Pipeline<(), Node> {
        Pipeline::new(self.grammar.clone(), self.transformer.clone(), Compiler::new())
    }
}

impl Frontend for Lang {
    fn name(&self) -> &str {
        &self.header.name
    }

    fn extensions(&self) -> &[String] {
        &self.header.extensions
    }

    fn default_serialization(&self) -> Serialization {
        self.grammar.config().default_serialization
    }

    fn worker(&self) -> Box<dyn Worker> {
        Box::new(self.pipeline())
    }
}

/// Data relating to this language that is parsed from the file but not dependent on the
/// [`Grammar`]
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct Header {
    name: String,
    #[serde(default)]
    extensions: Vec<String>,
}

//////////////////////////
// FILE PARSING/LOADING //
//////////////////////////

/// Data structure into which TOML files get [`Deserialize`]d.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct LangFile {
    #[serde(rename = "lang")]
    header: Header,
    grammar: SpecGrammar,
    #[serde(default)]
    transform: Vec<TableSpec>,
    #[serde(default)]
    config: Config,
}

#[derive(Debug)]
pub enum LoadError {
    Io(PathBuf, std::io::Error),
    Parse(toml::de::Error),
    Convert(ConvertError),
    Table(TableError),
}

impl From<BuildError> for LoadError {
    fn from(e: BuildError) -> Self {
        LoadError::Convert(ConvertError::Build(e))
    }
}

impl From<TableError> for LoadError {
    fn from(e: TableError) -> Self {
        LoadError::Table(e)
    }
}

impl Display for LoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io(path, e) => write!(f, "can't read {}: {}", path.display(), e),
            LoadError::Parse(e) => write!(f, "invalid language file: {}", e),
            LoadError::Convert(e) => write!(f, "invalid grammar: {}", e),
            LoadError::Table(e) => write!(f, "invalid transformation: {}", e),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Io(_, e) => Some(e),
            LoadError::Parse(e) => Some(e),
            LoadError::Convert(e) => Some(e),
            LoadError::Table(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use dhparse_grammar::ErrorCode;

    use super::*;
    use crate::pipeline::Options;

    const LIST_LANG: &str = r#"
        [lang]
        name = "list"
        extensions = ["list"]

        [grammar]
        root = "list"
        comment = '#.*'

        [grammar.rules]
        list = { seq = [{ text = "[", ws = true }, { opt = "_items" }, { text = "]", ws = true }], mandatory = 2 }
        _items = { seq = ["item", { many = { seq = [{ text = ",", ws = true }, "item"] } }] }
        item = { regex = "[a-z]+", ws = true }

        [[transform]]
        list = ["remove_tokens"]

        [[transform]]
        item = [{ rename = "word" }]

        [config]
        max_parser_dropouts = 1
    "#;

    #[test]
    fn load_and_compile() {
        let lang = Lang::from_toml(LIST_LANG).unwrap();
        assert_eq!(lang.name(), "list");
        assert_eq!(lang.extensions(), ["list".to_owned()]);
        assert_eq!(lang.grammar().config().max_parser_dropouts, 1);
        assert_eq!(lang.default_serialization(), Serialization::Sxpr);
        assert_eq!(lang.transformer().tables().len(), 2);

        let mut pipeline = lang.pipeline();
        let result = pipeline.compile_source("[a, b # comment\n, c]");
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(
            result.value.map(|tree| tree.as_flat_sxpr()).as_deref(),
            Some(r#"(list (word "a") (word "b") (word "c"))"#)
        );
    }

    #[test]
    fn workers() {
        let lang = Lang::from_toml(LIST_LANG).unwrap();
        let mut worker = lang.worker();
        let options = Options {
            serialization: Serialization::Sxpr,
            keep_trees: false,
        };
        let report = worker.process("[a, b", &options);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].code, ErrorCode::MANDATORY_CONTINUATION);
        assert_eq!(
            report.output.as_deref(),
            Some(r#"(list (word "a") (word "b"))"#)
        );
    }

    #[test]
    fn load_errors() {
        let missing = Lang::load_toml_file("does/not/exist.toml");
        assert!(matches!(missing, Err(LoadError::Io(..))));

        let bad_rewrite = LIST_LANG.replace("remove_tokens", "remove_everything");
        assert!(matches!(
            Lang::from_toml(&bad_rewrite),
            Err(LoadError::Table(TableError::UnknownRewrite(_)))
        ));
        let bad_rule = LIST_LANG.replace(r#""item"]"#, r#""itme"]"#);
        assert!(matches!(
            Lang::from_toml(&bad_rule),
            Err(LoadError::Convert(ConvertError::UnknownRule { .. }))
        ));
        let bad_key = LIST_LANG.replace("[config]", "[config]\nspeed = 11");
        assert!(matches!(Lang::from_toml(&bad_key), Err(LoadError::Parse(_))));
    }
}
