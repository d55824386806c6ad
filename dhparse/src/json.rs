//! The built-in JSON front-end, which compiles JSON documents (with `//` and `/* */` comments)
//! into [`serde_json::Value`]s, recovering from most syntax errors.

use std::sync::Arc;

use dhparse_grammar::{
    grammar::BuildResult, Config, Grammar, GrammarBuilder, Node, Serialization, ZOMBIE_TAG,
};
use serde_json::{Map, Number, Value};

use crate::{
    compile::Compiler,
    lang::LoadError,
    pipeline::{Frontend, Pipeline, Worker},
    transform::{primitives::*, RuleTable, TableResult, Transformer},
};

/// The grammar of JSON:
///
/// ```text
/// json        = ~ _element §EOF
/// _element    = object | array | string | number | bool | null
/// object      = "{" ~ [member ("," ~ §member)*] §"}" ~
/// member      = string §":" ~ _element
/// array       = "[" ~ [_element ("," ~ §_element)*] §"]" ~
/// string      = '"' _CHARACTERS §'"' ~
/// _CHARACTERS = (PLAIN | ESCAPE)*
/// ESCAPE      = /\\["\\\/bfnrt]/ | UNICODE
/// UNICODE     = "\u" §/[0-9a-fA-F]{4}/
/// number      = INT [FRAC] [EXP] ~
/// INT         = ["-"] /0|[1-9][0-9]*/
/// FRAC        = "." /[0-9]+/
/// EXP         = /[eE]/ [/[+-]/] /[0-9]+/
/// bool        = ("true" | "false") ~
/// null        = "null" ~
/// EOF         = !/./
/// ```
///
/// All punctuation is dropped from the tree.
pub fn grammar(config: Config) -> BuildResult<Grammar> {
    let mut g = GrammarBuilder::new(config);
    g.comment(r"//.*|/\*(?s:.)*?\*/");
    let element = g.declare("_element")?;
    let ws = g.whitespace();
    let dws = g.drop(ws);

    let any = g.regex("(?s).")?;
    let eof = g.negative_lookahead(any);
    let eof = g.define("EOF", eof)?;

    // Numbers
    let minus = g.text("-");
    let minus = g.optional(minus);
    let int_digits = g.regex("0|[1-9][0-9]*")?;
    let int = g.series([minus, int_digits]);
    let int = g.define("INT", int)?;
    let dot = g.text(".");
    let frac_digits = g.regex("[0-9]+")?;
    let frac = g.series([dot, frac_digits]);
    let frac = g.define("FRAC", frac)?;
    let e = g.regex("[eE]")?;
    let sign = g.regex("[+-]")?;
    let sign = g.optional(sign);
    let exp_digits = g.regex("[0-9]+")?;
    let exp = g.series([e, sign, exp_digits]);
    let exp = g.define("EXP", exp)?;
    let frac = g.optional(frac);
    let exp = g.optional(exp);
    let number = g.series([int, frac, exp, dws]);
    let number = g.define("number", number)?;

    // Strings
    let plain = g.regex(r#"[^"\\]+"#)?;
    let plain = g.define("PLAIN", plain)?;
    let backslash_u = g.text(r"\u");
    let hex = g.regex("[0-9a-fA-F]{4}")?;
    let unicode = g.series_mandatory([backslash_u, hex], 1);
    let unicode = g.define("UNICODE", unicode)?;
    let simple_escape = g.regex(r#"\\["\\/bfnrt]"#)?;
    let escape = g.alternative([simple_escape, unicode]);
    let escape = g.define("ESCAPE", escape)?;
    let character = g.alternative([plain, escape]);
    let characters = g.zero_or_more(character);
    let characters = g.define("_CHARACTERS", characters)?;
    let quote = g.text("\"");
    let quote = g.drop(quote);
    let string = g.series_mandatory([quote, characters, quote, dws], 2);
    let string = g.define("string", string)?;

    // Literals
    let t = g.text("true");
    let f = g.text("false");
    let truth = g.alternative([t, f]);
    let boolean = g.series([truth, dws]);
    let boolean = g.define("bool", boolean)?;
    let null = g.text("null");
    let null = g.series([null, dws]);
    let null = g.define("null", null)?;

    // Arrays
    let open = g.dropped_token("[");
    let comma = g.dropped_token(",");
    let close = g.dropped_token("]");
    let another = g.series_mandatory([comma, element], 1);
    let others = g.zero_or_more(another);
    let items = g.series([element, others]);
    let items = g.optional(items);
    let array = g.series_mandatory([open, items, close], 2);
    let array = g.define("array", array)?;

    // Objects
    let open = g.dropped_token("{");
    let colon = g.dropped_token(":");
    let close = g.dropped_token("}");
    let member = g.series_mandatory([string, colon, element], 1);
    let member = g.define("member", member)?;
    let another = g.series_mandatory([comma, member], 1);
    let others = g.zero_or_more(another);
    let members = g.series([member, others]);
    let members = g.optional(members);
    let object = g.series_mandatory([open, members, close], 2);
    let object = g.define("object", object)?;

    let value = g.alternative([object, array, string, number, boolean, null]);
    g.define("_element", value)?;
    let json = g.series_mandatory([dws, element, eof], 2);
    g.define("json", json)?;

    g.resume("object", &[",", r"\}"])
        .resume("member", &[",", r"\}"])
        .resume("array", &[",", r"\]"])
        .resume("string", &["\""]);
    g.build("json")
}

/// Reduces the syntax tree so that every node maps directly to a JSON value
pub fn rule_table() -> TableResult<RuleTable> {
    RuleTable::from_entries([
        ("json", vec![remove_nodes(&["EOF"]), replace_by_single_child()]),
        ("number", vec![collapse()]),
        // Text skipped over by error recovery isn't part of the string
        ("string", vec![remove_nodes(&[ZOMBIE_TAG]), collapse()]),
    ])
}

/// Compiles JSON syntax trees into [`Value`]s.  Anything the parser had to skip becomes `null`.
pub fn compiler() -> Compiler<(), Value> {
    Compiler::new()
        .with_handler("json", on_json)
        .with_handler("object", on_object)
        .with_handler("member", on_member)
        .with_handler("array", on_array)
        .with_handler("string", on_string)
        .with_handler("number", on_number)
        .with_handler("bool", on_bool)
        .with_handler("null", on_null)
        .with_handler(ZOMBIE_TAG, on_null)
}

/// Only reached if the document contains more than the value (i.e. there were errors)
fn on_json(c: &mut Compiler<(), Value>, node: &Node) -> Value {
    match node.children().iter().find(|n| n.tag() != ZOMBIE_TAG) {
        Some(value) => c.compile_node(value),
        None => Value::Null,
    }
}

fn on_object(c: &mut Compiler<(), Value>, node: &Node) -> Value {
    let mut map = Map::new();
    for member in node.children().iter().filter(|n| n.tag() == "member") {
        let (key, value) = match c.compile_node(member) {
            Value::Array(mut pair) if pair.len() == 2 => {
                let value = pair.pop().unwrap_or(Value::Null);
                match pair.pop() {
                    Some(Value::String(key)) => (key, value),
                    _ => continue,
                }
            }
            _ => continue,
        };
        if map.contains_key(&key) {
            c.warning(member, format!("duplicate key {:?}", key));
        }
        map.insert(key, value);
    }
    Value::Object(map)
}

/// `[key, value]`
fn on_member(c: &mut Compiler<(), Value>, node: &Node) -> Value {
    let children = node.children();
    let key = match children.first() {
        Some(key) if key.tag() == "string" => c.compile_node(key),
        _ => {
            c.error(node, "object member without a key");
            return Value::Null;
        }
    };
    let value = match children.get(1) {
        Some(value) if value.tag() != ZOMBIE_TAG => c.compile_node(value),
        _ => Value::Null,
    };
    Value::Array(vec![key, value])
}

fn on_array(c: &mut Compiler<(), Value>, node: &Node) -> Value {
    let items = node
        .children()
        .iter()
        .filter(|n| n.tag() != ZOMBIE_TAG)
        .map(|item| c.compile_node(item))
        .collect();
    Value::Array(items)
}

/// Strings keep their escape sequences in the tree, so they can be decoded exactly like JSON
fn on_string(c: &mut Compiler<(), Value>, node: &Node) -> Value {
    let raw = node.content();
    match serde_json::from_str::<String>(&format!("\"{}\"", raw)) {
        Ok(s) => Value::String(s),
        Err(e) => {
            c.error(node, format!("invalid string: {}", e));
            Value::String(raw)
        }
    }
}

fn on_number(c: &mut Compiler<(), Value>, node: &Node) -> Value {
    match node.content().parse::<Number>() {
        Ok(n) => Value::Number(n),
        Err(e) => {
            c.error(node, format!("invalid number {:?}: {}", node.content(), e));
            Value::Null
        }
    }
}

fn on_bool(_c: &mut Compiler<(), Value>, node: &Node) -> Value {
    Value::Bool(node.content() == "true")
}

fn on_null(_c: &mut Compiler<(), Value>, _node: &Node) -> Value {
    Value::Null
}

//////////////
// FRONTEND //
//////////////

/// The JSON language, ready to be shared between workers
#[derive(Debug, Clone)]
pub struct JsonFrontend {
    grammar: Arc<Grammar>,
    transformer: Transformer,
    extensions: Vec<String>,
}

impl JsonFrontend {
    pub fn new(config: Config) -> Result<Self, LoadError> {
        Ok(Self {
            grammar: Arc::new(grammar(config)?),
            transformer: Transformer::single(rule_table()?),
            extensions: vec!["json".to_owned()],
        })
    }

    pub fn grammar(&self) -> &Arc<Grammar> {
        &self.grammar
    }

    pub fn transformer(&self) -> &Transformer {
        &self.transformer
    }

    pub fn pipeline(&self) -> Pipeline<(), Value> {
        Pipeline::new(self.grammar.clone(), self.transformer.clone(), compiler())
    }
}

impl Frontend for JsonFrontend {
    fn name(&self) -> &str {
        "json"
    }

    fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn default_serialization(&self) -> Serialization {
        self.grammar.config().default_serialization
    }

    /// The output is always JSON
    fn output_extension(&self, _how: Serialization) -> &'static str {
        "json"
    }

    fn worker(&self) -> Box<dyn Worker> {
        Box::new(self.pipeline())
    }
}
