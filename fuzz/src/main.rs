//! Automated random testing and benchmarking of the whole pipeline (parsing, transformation and
//! compilation), using the built-in JSON front-end.

mod document;
mod runner;
mod utils;

use std::borrow::Cow;

use dhparse::json::JsonFrontend;
use dhparse_grammar::Config;
use rand::Rng;

fn main() {
    pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Warn)
        .init();
    let frontend = match JsonFrontend::new(Config::default()) {
        Ok(frontend) => frontend,
        Err(e) => {
            eprintln!("Can't build the JSON grammar: {}", e);
            std::process::exit(2);
        }
    };
    document::fuzz(&frontend, Some(10_000));
}

pub trait Arbitrary<'lang>: Sized + Shrink {
    /// Configuration parameters passed into the [`runner::fuzz`] function
    type Config: Default;
    /// Static data generated once before entering the fuzzing loop
    type StaticData;
    /// Sample tables generated every couple of thousand fuzzing iterations.  This allows the
    /// program to cache commonly computed values (e.g. whitespace) to speed up sample generation.
    type SampleTable;
    /// What a sample should turn into once its text has been run through the pipeline
    type Output: PartialEq + std::fmt::Debug;

    /* STATIC TABLE GENERATION */
    fn gen_static_data(frontend: &'lang JsonFrontend, config: &Self::Config) -> Self::StaticData;
    fn gen_table(
        data: &Self::StaticData,
        rng: &mut impl Rng,
        config: &Self::Config,
    ) -> Self::SampleTable;

    /* TESTING */
    /// Create a new sample to test
    fn gen(
        data: &Self::StaticData,
        table: &Self::SampleTable,
        config: &Self::Config,
        rng: &mut impl Rng,
    ) -> Self;
    /// Write this sample to a string
    fn unparse(&self, s: &mut String);
    /// The output which the pipeline should produce for this sample
    fn expected(&self) -> Self::Output;
    /// Run a string through the pipeline, returning its output or a description of what went
    /// wrong
    fn run(data: &Self::StaticData, s: &str) -> Result<Self::Output, String>;
}

pub trait Shrink: Clone {
    fn smaller_cases<'s>(&'s self) -> Box<dyn Iterator<Item = Cow<'s, Self>> + 's>;
}
