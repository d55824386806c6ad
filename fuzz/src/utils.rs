use itertools::Itertools;
use number_prefix::NumberPrefix;
use rand::{prelude::SliceRandom, Rng};

/// Generates `n` strings matching `generator`, for use as whitespace between tokens
pub fn gen_ws_samples(n: usize, generator: &rand_regex::Regex, rng: &mut impl Rng) -> Vec<String> {
    rng.sample_iter(generator).take(n).collect_vec()
}

pub fn sample_ws(samples: &[String], rng: &mut impl Rng) -> String {
    samples.choose(rng).cloned().unwrap_or_default()
}

pub fn format_big_bytes(num: f32) -> String {
    match NumberPrefix::decimal(num) {
        NumberPrefix::Standalone(n) => format!("{} bytes", n),
        NumberPrefix::Prefixed(prefix, n) => format!("{:.1} {}B", n, prefix),
    }
}
