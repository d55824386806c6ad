//! Properties which hold for every grammar, checked on a handful of grammars and inputs

use dhparse::{transform::primitives::replace_by_single_child, Lang, RuleTable};
use dhparse_grammar::{
    serialize::parse_sxpr, BuildError, Config, ErrorCode, Grammar, GrammarBuilder, MatchFn, Node,
    SpecGrammar, ZOMBIE_TAG,
};

fn grammar(toml_source: &str) -> Grammar {
    let spec: SpecGrammar = toml::from_str(toml_source).unwrap();
    spec.into_grammar(Config::default()).unwrap()
}

fn load(name: &str) -> Lang {
    let path = format!("{}/../langs/{}.toml", env!("CARGO_MANIFEST_DIR"), name);
    Lang::load_toml_file(path).unwrap()
}

/// A grammar which keeps every character of its input in the tree
const KEEP_EVERYTHING: &str = r#"
    root = "doc"
    comment = '//.*'

    [rules]
    doc = { seq = ["~", { many = "_item" }] }
    _item = { alt = ["number", "word", "list"] }
    number = { seq = ["INT", { opt = "FRAC" }, { opt = "EXP" }, "~"] }
    INT = { regex = '[0-9]+' }
    FRAC = { regex = '\.[0-9]+' }
    EXP = { regex = '[eE][+-]?[0-9]+' }
    word = { regex = '[a-z]+', ws = true }
    list = { seq = [{ text = "[", ws = true }, { many = "_item" }, { text = "]", ws = true }], mandatory = 2 }
"#;

/// Checks that the leaves of `tree` cover `source` without gaps or overlaps
fn assert_covers(tree: &Node, source: &str) {
    assert_eq!(tree.span(), 0..source.len());
    let mut end = 0;
    for leaf in tree.leaves() {
        assert_eq!(leaf.pos(), end, "gap before {:?}", leaf);
        assert_eq!(&source[leaf.span()], leaf.text());
        end = leaf.end();
    }
    assert_eq!(end, source.len());
    assert_eq!(tree.content(), source);
}

#[test]
fn spans_cover_the_input() {
    let grammar = grammar(KEEP_EVERYTHING);
    let inputs = [
        "12.5e10",
        "  abc 12 [x [y 3.25] ] // comment\n 7E-3",
        "[[[]]]",
        "",
    ];
    for source in inputs {
        let (tree, errors) = grammar.parse_root(source);
        assert!(errors.is_empty(), "{:?}: {:?}", source, errors);
        assert_covers(&tree, source);
    }
}

#[test]
fn number_has_all_parts() {
    let grammar = grammar(KEEP_EVERYTHING);
    let (tree, errors) = grammar.parse("12.5e10", "number", true);
    assert!(errors.is_empty(), "{:?}", errors);
    assert_eq!(tree.tag(), "number");
    assert_eq!(tree.span(), 0..7);
    let tags: Vec<&str> = tree.children().iter().map(Node::tag).collect();
    assert_eq!(tags, ["INT", "FRAC", "EXP"]);
}

#[test]
fn ordered_choice_is_deterministic() {
    let grammar = grammar(
        r#"
        root = "doc"
        [rules]
        doc = { alt = ["short", "long"] }
        short = { regex = '[a-z]' }
        long = { regex = '[a-z]+' }
        "#,
    );
    // Both alternatives match, but the first one always wins
    let expected = r#"(doc (short "a"))"#;
    for _ in 0..10 {
        let (tree, errors) = grammar.parse("abc", "doc", false);
        assert!(errors.is_empty());
        assert_eq!(tree.as_flat_sxpr(), expected);
    }
    // ... even if that means that a complete match fails
    let (_, errors) = grammar.parse("abc", "doc", true);
    assert_eq!(errors[0].code, ErrorCode::PARSER_STOPPED_BEFORE_END);
}

#[test]
fn transformation_is_idempotent() {
    let samples = [
        ("arithmetic", "1 + 2 * (3 - 4) / 5"),
        ("tags", "<a> x <b>y</b> <c></c></a>"),
    ];
    for (name, source) in samples {
        let lang = load(name);
        let (mut tree, errors) = lang.grammar().parse_root(source);
        assert!(errors.is_empty(), "{:?}", errors);
        lang.transformer().apply(&mut tree);
        let once = tree.clone();
        lang.transformer().apply(&mut tree);
        assert_eq!(tree, once, "{}", name);
    }

    let json = dhparse::json::JsonFrontend::new(Config::default()).unwrap();
    let (mut tree, _) = json.grammar().parse_root(r#"{"a": [1.5e3, "b\n", true, null, {}]}"#);
    json.transformer().apply(&mut tree);
    let once = tree.clone();
    json.transformer().apply(&mut tree);
    assert_eq!(tree, once);
}

#[test]
fn nested_groups_reach_a_fixed_point_in_one_pass() {
    let table = RuleTable::from_entries([("group", vec![replace_by_single_child()])]).unwrap();
    for depth in 1..=20 {
        let source = format!("{}(expr 1){}", "(group ".repeat(depth), ")".repeat(depth));
        let mut tree = parse_sxpr(&source).unwrap();
        table.apply(&mut tree);
        let once = tree.clone();
        assert_eq!(once.as_flat_sxpr(), r#"(expr "1")"#, "depth {}", depth);
        table.apply(&mut tree);
        assert_eq!(tree, once, "depth {}", depth);

        let mut nested = parse_sxpr(&format!("(doc {} (word x))", source)).unwrap();
        table.apply(&mut nested);
        assert_eq!(nested.as_flat_sxpr(), r#"(doc (expr "1") (word "x"))"#);
    }

    let lang = load("arithmetic");
    let (mut tree, errors) = lang.grammar().parse_root("((((1 + 2))))");
    assert!(errors.is_empty(), "{:?}", errors);
    lang.transformer().apply(&mut tree);
    let once = tree.clone();
    lang.transformer().apply(&mut tree);
    assert_eq!(tree, once);
}

#[test]
fn deep_documents_stop_before_the_stack_runs_out() {
    let handle = std::thread::Builder::new()
        .stack_size(2 * 1024 * 1024)
        .spawn(|| {
            let json = dhparse::json::JsonFrontend::new(Config::default()).unwrap();
            let mut pipeline = json.pipeline();
            for depth in [1_200, 1_500, 20_000] {
                let source = format!("{}{}", "[".repeat(depth), "]".repeat(depth));
                let compilation = pipeline.compile_source(&source);
                assert!(compilation.has_fatal(), "depth {}", depth);
                assert!(compilation
                    .errors
                    .iter()
                    .any(|e| e.code == ErrorCode::RECURSION_LIMIT));
                assert!(compilation.value.is_none());
            }
        })
        .unwrap();
    handle.join().unwrap();
}

#[test]
fn xml_output_has_valid_names() {
    let g = grammar(KEEP_EVERYTHING);
    let (tree, errors) = g.parse_root("[ abc] // done");
    assert!(errors.is_empty(), "{:?}", errors);
    assert!(tree.descendants().any(|n| n.tag().starts_with(':')));
    let xml = tree.as_xml();
    assert!(!xml.contains("<:") && !xml.contains("</:"), "{}", xml);
    assert!(xml.contains("ANONYMOUS_"), "{}", xml);
}

#[test]
fn pops_need_captures() {
    let mut g = GrammarBuilder::default();
    let word = g.regex("[a-z]+").unwrap();
    let captured = g.capture("word", word);
    let echo = g.retrieve("word", MatchFn::LastValue);
    let stray = g.pop("name", MatchFn::LastValue);
    let doc = g.series([captured, echo, stray]);
    g.define("doc", doc).unwrap();
    // `name` is popped but never captured
    assert!(matches!(
        g.build("doc"),
        Err(BuildError::UncapturedSymbol(stack)) if stack == "name"
    ));
}

#[test]
fn retrieve_matches_the_captured_value() {
    let grammar = grammar(
        r#"
        root = "triple"
        [rules]
        triple = { seq = ["word", "-", { retrieve = "word" }, "-", { pop = "word" }] }
        word = { capture = { regex = '[a-z]+' } }
        "-" = { text = "-" }
        "#,
    );
    // `retrieve` leaves the value on the stack, so `pop` has something to match
    let (tree, errors) = grammar.parse_root("ab-ab-ab");
    assert!(errors.is_empty(), "{:?}", errors);
    assert_eq!(tree.select("word").count(), 3);

    let (tree, errors) = grammar.parse_root("ab-ab-ac");
    assert_eq!(errors[0].code, ErrorCode::PARSER_DID_NOT_MATCH);
    assert_eq!(errors[0].pos, 6);
    assert_eq!(tree.tag(), ZOMBIE_TAG);
}

#[test]
fn mandatory_recovery_is_deterministic() {
    let mut g = GrammarBuilder::default();
    let a = g.text("a");
    let b = g.text("b");
    let c = g.text("c");
    let seq = g.series_mandatory([a, b, c], 1);
    g.define("seq", seq).unwrap();
    g.resume("seq", &["[bc]"]);
    let grammar = g.build("seq").unwrap();

    for _ in 0..3 {
        let (tree, errors) = grammar.parse_root("a--!c");
        // One error, where `b` was expected
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, ErrorCode::MANDATORY_CONTINUATION);
        assert_eq!(errors[0].pos, 1);
        // Parsing resumed at the first match of the resume pattern
        assert_eq!(tree.pick(ZOMBIE_TAG).map(Node::span), Some(1..4));
        assert_eq!(tree.content(), "a--!c");
    }
}
