//! # dhparse
//!
//! Parses, transforms and compiles batches of documents, either as JSON or in a language
//! described by a TOML file.

pub mod batch;
pub mod config;

use std::process::ExitCode;

use clap::Parser;
use dhparse::{json::JsonFrontend, Frontend, Lang, LoadError};
use dhparse_grammar::Config;

use crate::config::Args;

/// The entry point of the batch driver.  Exits with `1` if any document contained errors, and
/// `2` if the language or the files couldn't be loaded.
fn main() -> ExitCode {
    let args = Args::parse();

    // Initialise the logging.  `RUST_LOG` overrides the level set by the flags
    let mut logger = pretty_env_logger::formatted_builder();
    logger.filter_level(args.log_level());
    if let Ok(filters) = std::env::var("RUST_LOG") {
        logger.parse_filters(&filters);
    }
    logger.init();
    log::info!("Starting up...");

    let frontend = match load_frontend(&args.lang) {
        Ok(frontend) => frontend,
        Err(e) => {
            log::error!("Can't load language {:?}: {}", args.lang, e);
            return ExitCode::from(2);
        }
    };
    let files = match batch::collect_files(&args.paths, frontend.extensions()) {
        Ok(files) => files,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::from(2);
        }
    };
    log::info!("Found {} {} documents", files.len(), frontend.name());

    match batch::batch_process(frontend.as_ref(), &files, &args.batch_config()) {
        Ok(summary) => {
            log::info!("{}", summary);
            if summary.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::from(2)
        }
    }
}

/// `json` selects the built-in JSON front-end, anything else is the path of a language file
fn load_frontend(lang: &str) -> Result<Box<dyn Frontend>, LoadError> {
    if lang == "json" {
        Ok(Box::new(JsonFrontend::new(Config::default())?))
    } else {
        Ok(Box::new(Lang::load_toml_file(lang)?))
    }
}
