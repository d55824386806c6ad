//! Command line arguments, and the configuration of a batch run which is derived from them

use std::{num::NonZeroUsize, path::PathBuf};

use clap::{ArgGroup, Parser};
use dhparse_grammar::Serialization;
use log::LevelFilter;

/* COMMAND LINE */

/// Parses, transforms and compiles documents in batches
#[derive(Debug, Parser)]
#[command(name = "dhparse", version)]
#[command(group(ArgGroup::new("format").args(["xml", "sxpr", "tree", "json"])))]
pub struct Args {
    /// The files to process.  Directories are searched recursively for files with the
    /// language's extensions.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// `json`, or the path of a language file (`*.toml`)
    #[arg(short, long, default_value = "json")]
    pub lang: String,
    /// Also write the concrete and abstract syntax trees, and log debugging output
    #[arg(short, long)]
    pub debug: bool,
    /// The directory into which all output is written
    #[arg(short, long, default_value = "out")]
    pub out: PathBuf,
    #[arg(short, long)]
    pub verbose: bool,
    /// Process one document at a time
    #[arg(long)]
    pub singlethread: bool,

    /// Write trees as XML
    #[arg(short = 'x', long)]
    pub xml: bool,
    /// Write trees as S-expressions
    #[arg(short, long)]
    pub sxpr: bool,
    /// Write trees as indented text
    #[arg(short, long)]
    pub tree: bool,
    /// Write trees as JSON
    #[arg(short, long)]
    pub json: bool,
}

impl Args {
    /// The log level requested by `--verbose` and `--debug`.  `RUST_LOG` can still override it.
    pub fn log_level(&self) -> LevelFilter {
        if self.debug {
            LevelFilter::Debug
        } else if self.verbose {
            LevelFilter::Info
        } else {
            LevelFilter::Warn
        }
    }

    pub fn serialization(&self) -> Option<Serialization> {
        [
            (self.xml, Serialization::Xml),
            (self.sxpr, Serialization::Sxpr),
            (self.tree, Serialization::Tree),
            (self.json, Serialization::Json),
        ]
        .into_iter()
        .find_map(|(chosen, how)| chosen.then(|| how))
    }

    pub fn batch_config(&self) -> BatchConfig {
        let threads = if self.singlethread {
            1
        } else {
            std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
        };
        BatchConfig {
            out_dir: self.out.clone(),
            serialization: self.serialization(),
            debug: self.debug,
            threads,
        }
    }
}

/* BATCH CONFIG */

/// Everything that [`batch_process`](crate::batch::batch_process) needs to know
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    pub out_dir: PathBuf,
    /// `None` uses the language's default
    pub serialization: Option<Serialization>,
    /// Also write the syntax trees of every document
    pub debug: bool,
    /// The number of worker threads
    pub threads: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            out_dir: PathBuf::from("out"),
            serialization: None,
            debug: false,
            threads: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("dhparse").chain(args.iter().copied()))
    }

    #[test]
    fn defaults() {
        let args = parse(&["doc.json"]).unwrap();
        assert_eq!(args.lang, "json");
        assert_eq!(args.log_level(), LevelFilter::Warn);
        let config = args.batch_config();
        assert_eq!(config.out_dir, PathBuf::from("out"));
        assert_eq!(config.serialization, None);
        assert!(config.threads >= 1);
    }

    #[test]
    fn flags() {
        let args = parse(&["-d", "-x", "--singlethread", "-o", "build", "-l", "a.toml", "src"])
            .unwrap();
        assert_eq!(args.log_level(), LevelFilter::Debug);
        assert_eq!(args.lang, "a.toml");
        let config = args.batch_config();
        assert_eq!(config.serialization, Some(Serialization::Xml));
        assert_eq!(config.threads, 1);
        assert!(config.debug);
        assert_eq!(config.out_dir, PathBuf::from("build"));

        assert_eq!(parse(&["-v", "x"]).unwrap().log_level(), LevelFilter::Info);
    }

    #[test]
    fn bad_arguments() {
        // Only one serialization can be chosen
        assert!(parse(&["-x", "-j", "doc.json"]).is_err());
        // At least one path is needed
        assert!(parse(&["-s"]).is_err());
    }
}
