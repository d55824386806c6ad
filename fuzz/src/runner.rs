use std::{
    borrow::Cow,
    fmt::Debug,
    time::{Duration, Instant},
};

use dhparse::json::JsonFrontend;
use rand::prelude::ThreadRng;

use crate::{utils, Arbitrary};

use self::immut::Immut;

/// Run the fuzzer on the pipeline of `frontend`
pub fn fuzz<'lang, A: Arbitrary<'lang> + Debug>(
    frontend: &'lang JsonFrontend,
    iteration_limit: Option<usize>,
    config: A::Config,
) {
    Runner::<A>::new(frontend, config).run(iteration_limit);
}

/// A thread-local `Runner` for fuzz tests
struct Runner<'lang, A: Arbitrary<'lang>> {
    rng: ThreadRng,
    static_data: Immut<A::StaticData>,
    table: A::SampleTable,
    config: A::Config,

    // Stat printing state
    fuzz_start_time: Immut<Instant>,
    elapsed_secs_for_last_print: u64,

    // Fuzzing loop state
    unparsed_string: String,
    iteration_count: usize,
    total_bytes_parsed: usize,
    total_time_parsing: Duration,
}

impl<'lang, A: Arbitrary<'lang> + Debug> Runner<'lang, A> {
    /// Create a `Runner` which hasn't run any fuzzing iterations.
    fn new(frontend: &'lang JsonFrontend, config: A::Config) -> Self {
        let static_data = Immut::new(A::gen_static_data(frontend, &config));
        let mut rng = rand::thread_rng();
        Self {
            table: A::gen_table(&static_data, &mut rng, &config),
            rng,
            static_data,
            config,

            fuzz_start_time: Instant::now().into(),
            elapsed_secs_for_last_print: 0,

            unparsed_string: String::new(),
            iteration_count: 0,
            total_bytes_parsed: 0,
            total_time_parsing: Duration::ZERO,
        }
    }

    /// Run the mainloop of the fuzzer
    fn run(mut self, iteration_limit: Option<usize>) {
        loop {
            // Re-generate the sample tables every thousand iterations, so that samples don't
            // always come from the same finite set
            self.table = A::gen_table(&self.static_data, &mut self.rng, &self.config);

            for _ in 0..1_000 {
                let sample = A::gen(&self.static_data, &self.table, &self.config, &mut self.rng);

                if let Err(problem) = self.check(&sample) {
                    println!("Found a witness: {}", problem);
                    let shrunk_sample = self.shrink(sample);
                    // Re-run the minimal witness so that its problem can be printed
                    let problem = self.check(&shrunk_sample).err().unwrap_or(problem);
                    dbg!(&shrunk_sample, &self.unparsed_string, &problem);
                    panic!("Pipeline failed!");
                }

                self.iteration_count += 1;
                let reached_iteration_limit = Some(self.iteration_count) >= iteration_limit;

                // Print stats roughly every second, or when the test ends
                let elapsed_secs = self.fuzz_start_time.elapsed().as_secs();
                if elapsed_secs > self.elapsed_secs_for_last_print || reached_iteration_limit {
                    self.elapsed_secs_for_last_print = elapsed_secs;
                    println!(
                        "{} iters.  {} in {:?} = {}/s",
                        self.iteration_count,
                        utils::format_big_bytes(self.total_bytes_parsed as f32),
                        self.total_time_parsing,
                        utils::format_big_bytes(
                            self.total_bytes_parsed as f32 / self.total_time_parsing.as_secs_f32()
                        )
                    );
                }
                if reached_iteration_limit {
                    return;
                }
            }
        }
    }

    /// Shrink a witness sample until a minimal witness is found:
    /// 1. The sample generates an [`Iterator`] of slightly smaller samples
    /// 2. Each of these smaller samples are tested individually.  If any of these fail, then it
    ///    becomes a new witness, and we continue at step `1` with this as the new sample.
    /// 3. If none of the slightly smaller samples are witnesses (or there aren't any), then the
    ///    current sample is deemed minimal and returned.
    fn shrink(&mut self, sample: A) -> A {
        println!("Shrinking...");
        let mut witness = sample;
        loop {
            let smaller_witness = witness
                .smaller_cases()
                .find(|case| self.check(case).is_err())
                .map(Cow::into_owned);
            match smaller_witness {
                Some(smaller) => witness = smaller,
                None => return witness,
            }
        }
    }

    fn check(&mut self, sample: &A) -> Result<(), String> {
        self.unparsed_string.clear();
        sample.unparse(&mut self.unparsed_string);
        log::trace!("Testing {:?}", self.unparsed_string);

        let start = Instant::now();
        let output = A::run(&self.static_data, &self.unparsed_string)?;
        self.total_bytes_parsed += self.unparsed_string.len();
        self.total_time_parsing += start.elapsed();

        let expected = sample.expected();
        if output == expected {
            Ok(())
        } else {
            Err(format!("expected {:?}, got {:?}", expected, output))
        }
    }
}

mod immut {
    /// Wrapper type which only permits immutable references to its contents.  This is equivalent
    /// to `let x: A` but can be used in a type definition.
    #[derive(Debug, Clone)]
    #[repr(transparent)]
    pub(super) struct Immut<T> {
        inner: T,
    }

    impl<T> Immut<T> {
        pub(super) fn new(inner: T) -> Self {
            Self { inner }
        }
    }

    impl<T> std::ops::Deref for Immut<T> {
        type Target = T;

        fn deref(&self) -> &Self::Target {
            &self.inner
        }
    }

    impl<T> From<T> for Immut<T> {
        fn from(v: T) -> Self {
            Self::new(v)
        }
    }
}
