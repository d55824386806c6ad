//! Fuzzer for the whole JSON pipeline.  Random JSON values are written out with random whitespace
//! and comments, then checked against what the pipeline makes of them.

use std::borrow::Cow;

use dhparse::json::JsonFrontend;
use rand::Rng;
use rand_distr::{Distribution, Geometric};
use serde_json::{Map, Value};

use crate::{runner, utils, Arbitrary, Shrink};

pub fn fuzz(frontend: &JsonFrontend, iteration_limit: Option<usize>) {
    runner::fuzz::<Document>(frontend, iteration_limit, Config::default());
}

/// A JSON document, along with the whitespace after every token
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    leading_ws: String,
    root: Elem,
}

#[derive(Debug, Clone, PartialEq)]
enum Elem {
    /// A number, string or literal, written exactly as `text`
    Scalar { text: String, value: Value, ws: String },
    Array {
        open_ws: String,
        /// Each item, with the whitespace after the comma which follows it
        items: Vec<(Elem, String)>,
        close_ws: String,
    },
    Object {
        open_ws: String,
        /// Each member's key (with its whitespace), the whitespace after the colon, the value and
        /// the whitespace after the comma
        members: Vec<(String, String, String, Elem, String)>,
        close_ws: String,
    },
}

impl<'lang> Arbitrary<'lang> for Document {
    type Config = Config;
    type StaticData = StaticData<'lang>;
    type SampleTable = SampleTable;
    type Output = Value;

    fn gen_static_data(frontend: &'lang JsonFrontend, config: &Config) -> Self::StaticData {
        let compile = |pattern: &str| {
            rand_regex::Regex::compile(pattern, config.max_regex_repeats)
                .unwrap_or_else(|e| panic!("invalid sample regex {:?}: {}", pattern, e))
        };
        StaticData {
            frontend,
            number_gen: compile(r"-?(0|[1-9][0-9]{0,8})(\.[0-9]{1,6})?([eE][+-]?[0-9]{1,2})?"),
            string_gen: compile(r#"([a-zA-Z0-9 _"\\/\t\n]|é|€|😀){0,12}"#),
            ws_gen: compile(r"[ \t\r\n]{0,4}(//[a-z ]{0,8}\n|/\*[a-z *]{0,8}\*/)?[ \n]{0,2}"),
            container_size_distr: Geometric::new(1.0 / config.average_container_size)
                .unwrap_or_else(|e| panic!("invalid container size: {}", e)),
            depth_limit: config.depth_limit,
            node_limit: config.node_limit,
        }
    }

    fn gen_table(
        data: &Self::StaticData,
        rng: &mut impl Rng,
        _config: &Self::Config,
    ) -> Self::SampleTable {
        SampleTable {
            ws_samples: utils::gen_ws_samples(3000, &data.ws_gen, rng),
        }
    }

    /// Create a random JSON document
    fn gen(
        data: &Self::StaticData,
        table: &Self::SampleTable,
        _config: &Self::Config,
        rng: &mut impl Rng,
    ) -> Self {
        let leading_ws = utils::sample_ws(&table.ws_samples, rng);
        let mut state = GenState {
            data,
            table,
            rng,
            nodes_generated: 0,
        };
        let root = gen_elem(&mut state, 0);
        Document { leading_ws, root }
    }

    fn unparse(&self, s: &mut String) {
        s.push_str(&self.leading_ws);
        self.root.unparse(s);
    }

    fn expected(&self) -> Value {
        self.root.value()
    }

    /// Checks that no errors are reported, that the leaves of the concrete syntax tree match the
    /// source and that transforming the tree twice changes nothing
    fn run(data: &Self::StaticData, s: &str) -> Result<Value, String> {
        let mut pipeline = data.frontend.pipeline();
        pipeline.keep_trees(true);
        let compilation = pipeline.compile_source(s);
        if !compilation.errors.is_empty() {
            return Err(compilation.error_messages());
        }

        let (cst, ast) = match (compilation.cst, compilation.ast) {
            (Some(cst), Some(ast)) => (cst, ast),
            _ => return Err("syntax trees are missing".to_owned()),
        };
        // Dropped tokens leave gaps, but every leaf must still be in order and match its source
        let mut end = 0;
        for leaf in cst.leaves() {
            if leaf.pos() < end || s.get(leaf.span()) != Some(leaf.text()) {
                return Err(format!("leaf {:?} doesn't match the source", leaf));
            }
            end = leaf.end();
        }
        let mut transformed_again = ast.clone();
        data.frontend.transformer().apply(&mut transformed_again);
        if transformed_again != ast {
            return Err(format!(
                "transformation isn't idempotent: {} became {}",
                ast.as_flat_sxpr(),
                transformed_again.as_flat_sxpr()
            ));
        }
        compilation
            .value
            .ok_or_else(|| "no value was produced".to_owned())
    }
}

impl Elem {
    fn unparse(&self, s: &mut String) {
        match self {
            Elem::Scalar { text, ws, .. } => {
                s.push_str(text);
                s.push_str(ws);
            }
            Elem::Array {
                open_ws,
                items,
                close_ws,
            } => {
                s.push('[');
                s.push_str(open_ws);
                for (idx, (item, comma_ws)) in items.iter().enumerate() {
                    item.unparse(s);
                    if idx + 1 < items.len() {
                        s.push(',');
                        s.push_str(comma_ws);
                    }
                }
                s.push(']');
                s.push_str(close_ws);
            }
            Elem::Object {
                open_ws,
                members,
                close_ws,
            } => {
                s.push('{');
                s.push_str(open_ws);
                for (idx, (key, key_ws, colon_ws, value, comma_ws)) in members.iter().enumerate() {
                    s.push_str(&Value::String(key.clone()).to_string());
                    s.push_str(key_ws);
                    s.push(':');
                    s.push_str(colon_ws);
                    value.unparse(s);
                    if idx + 1 < members.len() {
                        s.push(',');
                        s.push_str(comma_ws);
                    }
                }
                s.push('}');
                s.push_str(close_ws);
            }
        }
    }

    fn value(&self) -> Value {
        match self {
            Elem::Scalar { value, .. } => value.clone(),
            Elem::Array { items, .. } => Value::Array(items.iter().map(|(i, _)| i.value()).collect()),
            Elem::Object { members, .. } => Value::Object(
                members
                    .iter()
                    .map(|(key, _, _, value, _)| (key.clone(), value.value()))
                    .collect::<Map<_, _>>(),
            ),
        }
    }

    /// Every element which is one step simpler than `self`
    fn smaller_cases(&self) -> Vec<Elem> {
        let mut cases = Vec::new();
        match self {
            Elem::Scalar { .. } => {}
            Elem::Array {
                open_ws,
                items,
                close_ws,
            } => {
                for idx in 0..items.len() {
                    // Replace the array with one of its items
                    cases.push(items[idx].0.clone());
                    // Remove an item
                    let mut fewer = items.clone();
                    fewer.remove(idx);
                    cases.push(Elem::Array {
                        open_ws: open_ws.clone(),
                        items: fewer,
                        close_ws: close_ws.clone(),
                    });
                    // Shrink an item
                    for smaller in items[idx].0.smaller_cases() {
                        let mut shrunk = items.clone();
                        shrunk[idx].0 = smaller;
                        cases.push(Elem::Array {
                            open_ws: open_ws.clone(),
                            items: shrunk,
                            close_ws: close_ws.clone(),
                        });
                    }
                }
            }
            Elem::Object {
                open_ws,
                members,
                close_ws,
            } => {
                for idx in 0..members.len() {
                    cases.push(members[idx].3.clone());
                    let mut fewer = members.clone();
                    fewer.remove(idx);
                    cases.push(Elem::Object {
                        open_ws: open_ws.clone(),
                        members: fewer,
                        close_ws: close_ws.clone(),
                    });
                    for smaller in members[idx].3.smaller_cases() {
                        let mut shrunk = members.clone();
                        shrunk[idx].3 = smaller;
                        cases.push(Elem::Object {
                            open_ws: open_ws.clone(),
                            members: shrunk,
                            close_ws: close_ws.clone(),
                        });
                    }
                }
            }
        }
        cases
    }
}

impl Shrink for Document {
    fn smaller_cases<'s>(&'s self) -> Box<dyn Iterator<Item = Cow<'s, Self>> + 's> {
        // Removing the leading whitespace is the first thing to try
        let without_ws = (!self.leading_ws.is_empty()).then(|| Document {
            leading_ws: String::new(),
            root: self.root.clone(),
        });
        let smaller_roots = self.root.smaller_cases().into_iter().map(move |root| Document {
            leading_ws: self.leading_ws.clone(),
            root,
        });
        Box::new(without_ws.into_iter().chain(smaller_roots).map(Cow::Owned))
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    average_container_size: f64,
    /// The upper bound placed on open-bounded repeats in the sample regexes
    max_regex_repeats: u32,
    depth_limit: usize,
    node_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            average_container_size: 3.0,
            max_regex_repeats: 10,
            depth_limit: 8,
            node_limit: 500,
        }
    }
}

pub struct StaticData<'lang> {
    frontend: &'lang JsonFrontend,

    number_gen: rand_regex::Regex,
    string_gen: rand_regex::Regex,
    ws_gen: rand_regex::Regex,
    container_size_distr: Geometric,
    depth_limit: usize,
    node_limit: usize,
}

/// Table in which random samples can be cached to speed up generation of documents
#[derive(Debug, Clone)]
pub struct SampleTable {
    ws_samples: Vec<String>,
}

////////////////
// GENERATION //
////////////////

struct GenState<'a, 'lang, R: Rng> {
    data: &'a StaticData<'lang>,
    table: &'a SampleTable,
    rng: &'a mut R,
    nodes_generated: usize,
}

impl<R: Rng> GenState<'_, '_, R> {
    fn ws(&mut self) -> String {
        utils::sample_ws(&self.table.ws_samples, self.rng)
    }

    /// The number of items in a new container, or `None` if the document is big enough
    fn container_size(&mut self, depth: usize) -> Option<usize> {
        if depth >= self.data.depth_limit || self.nodes_generated >= self.data.node_limit {
            return None;
        }
        Some(self.data.container_size_distr.sample(self.rng) as usize)
    }
}

fn gen_elem(state: &mut GenState<impl Rng>, depth: usize) -> Elem {
    state.nodes_generated += 1;
    match state.rng.gen_range(0..6) {
        0 => {
            if let Some(size) = state.container_size(depth) {
                let open_ws = state.ws();
                let items = (0..size)
                    .map(|_| (gen_elem(state, depth + 1), state.ws()))
                    .collect();
                return Elem::Array {
                    open_ws,
                    items,
                    close_ws: state.ws(),
                };
            }
        }
        1 => {
            if let Some(size) = state.container_size(depth) {
                let open_ws = state.ws();
                // Duplicate keys are reported as warnings, so every key gets a unique suffix
                let members = (0..size)
                    .map(|idx| {
                        let key = format!("{}#{}", state.string(), idx);
                        let key_ws = state.ws();
                        let colon_ws = state.ws();
                        let value = gen_elem(state, depth + 1);
                        (key, key_ws, colon_ws, value, state.ws())
                    })
                    .collect();
                return Elem::Object {
                    open_ws,
                    members,
                    close_ws: state.ws(),
                };
            }
        }
        _ => {}
    }
    gen_scalar(state)
}

fn gen_scalar(state: &mut GenState<impl Rng>) -> Elem {
    let text = match state.rng.gen_range(0..5) {
        0 => state.rng.sample(&state.data.number_gen),
        1 => Value::String(state.string()).to_string(),
        2 => "true".to_owned(),
        3 => "false".to_owned(),
        _ => "null".to_owned(),
    };
    // Reading a token back with `serde_json` gives the value which the pipeline should produce
    let value = serde_json::from_str(&text)
        .unwrap_or_else(|e| panic!("generated invalid JSON {:?}: {}", text, e));
    Elem::Scalar {
        text,
        value,
        ws: state.ws(),
    }
}

impl<R: Rng> GenState<'_, '_, R> {
    fn string(&mut self) -> String {
        self.rng.sample(&self.data.string_gen)
    }
}
