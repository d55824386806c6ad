use std::fmt::{Display, Formatter};

use super::{Expr, SpecGrammar};
use crate::{
    config::Config,
    grammar::{BuildError, GrammarBuilder, ParserId},
    Grammar,
};

pub type ConvertResult<T> = Result<T, ConvertError>;

/// Convert a [`SpecGrammar`] (likely parsed from a TOML file) into a full [`Grammar`], or fail
/// with a [`ConvertError`].
pub(crate) fn convert(grammar: SpecGrammar, config: Config) -> ConvertResult<Grammar> {
    let SpecGrammar {
        root,
        whitespace,
        comment,
        disposable,
        rules,
        resume,
        errors,
    } = grammar;

    let mut builder = GrammarBuilder::new(config);
    if let Some(whitespace) = &whitespace {
        builder.whitespace_pattern(whitespace);
    }
    if let Some(comment) = &comment {
        builder.comment(comment);
    }
    if let Some(disposable) = &disposable {
        builder.disposable(disposable)?;
    }

    // Before compiling any rules, declare all of them (because rules may refer to rules which
    // appear after themselves).  If we see a name which hasn't been declared, then we know it
    // must be invalid and we can generate an error.
    for name in rules.keys() {
        builder.declare(name)?;
    }
    for (name, expr) in rules {
        let body = compile_expr(&mut builder, expr, &name)?;
        builder.define(&name, body)?;
    }
    for (rule, patterns) in &resume {
        builder.resume(rule, patterns);
    }
    for (rule, messages) in &errors {
        for message in messages {
            builder.error_message(rule, &message.when, &message.message);
        }
    }
    Ok(builder.build(&root)?)
}

/// Compiles the expression of one rule (called `rule_name`) into parsers
fn compile_expr(b: &mut GrammarBuilder, expr: Expr, rule_name: &str) -> ConvertResult<ParserId> {
    let compile = |b: &mut GrammarBuilder, expr: Box<Expr>| compile_expr(b, *expr, rule_name);
    Ok(match expr {
        Expr::Rule(name) if name == "~" => b.whitespace(),
        Expr::Rule(name) => b.rule(&name).map_err(|_| ConvertError::UnknownRule {
            name,
            rule: rule_name.to_owned(),
        })?,
        Expr::Text { text, ws: true } => b.token(&text),
        Expr::Text { text, ws: false } => b.text(&text),
        Expr::Regex { regex, ws } => {
            let regex = b.regex(&regex)?;
            if ws {
                let ws = b.whitespace();
                b.series([regex, ws])
            } else {
                regex
            }
        }

        Expr::Seq { seq, mandatory } => {
            let children = compile_all(b, seq, rule_name)?;
            match mandatory {
                Some(idx) => b.series_mandatory(children, idx),
                None => b.series(children),
            }
        }
        Expr::Alt { alt } => {
            let children = compile_all(b, alt, rule_name)?;
            b.alternative(children)
        }
        Expr::Opt { opt } => {
            let child = compile(b, opt)?;
            b.optional(child)
        }
        Expr::Many { many } => {
            let child = compile(b, many)?;
            b.zero_or_more(child)
        }
        Expr::OneOrMore { some } => {
            let child = compile(b, some)?;
            b.one_or_more(child)
        }
        Expr::Repeat { repeat, min, max } => {
            let child = compile(b, repeat)?;
            b.repeat(child, min, max)
        }

        Expr::Ahead { ahead } => {
            let child = compile(b, ahead)?;
            b.lookahead(child)
        }
        Expr::NotAhead { not_ahead } => {
            let child = compile(b, not_ahead)?;
            b.negative_lookahead(child)
        }
        Expr::Behind { behind } => {
            let child = compile(b, behind)?;
            b.lookbehind(child)?
        }
        Expr::NotBehind { not_behind } => {
            let child = compile(b, not_behind)?;
            b.negative_lookbehind(child)?
        }

        Expr::Capture { capture, name } => {
            let child = compile(b, capture)?;
            b.capture(name.as_deref().unwrap_or(rule_name), child)
        }
        Expr::Retrieve { retrieve, match_fn } => b.retrieve(&retrieve, match_fn),
        Expr::Pop { pop, match_fn } => b.pop(&pop, match_fn),
        Expr::Drop { drop } => {
            let child = compile(b, drop)?;
            b.drop(child)
        }
    })
}

fn compile_all(
    b: &mut GrammarBuilder,
    exprs: Vec<Expr>,
    rule_name: &str,
) -> ConvertResult<Vec<ParserId>> {
    exprs
        .into_iter()
        .map(|e| compile_expr(b, e, rule_name))
        .collect()
}

/// The possible ways that converting a [`SpecGrammar`] can fail.
#[derive(Debug)]
pub enum ConvertError {
    /// A rule refers to a rule which doesn't exist
    UnknownRule { name: String, rule: String },
    Build(BuildError),
}

impl From<BuildError> for ConvertError {
    fn from(e: BuildError) -> Self {
        ConvertError::Build(e)
    }
}

impl Display for ConvertError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvertError::UnknownRule { name, rule } => {
                write!(f, "rule {:?} refers to unknown rule {:?}", rule, name)
            }
            ConvertError::Build(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ConvertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConvertError::Build(e) => Some(e),
            ConvertError::UnknownRule { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn load(source: &str) -> ConvertResult<Grammar> {
        let spec: SpecGrammar = toml::from_str(source).unwrap();
        spec.into_grammar(Config::default())
    }

    const ARITHMETIC: &str = r#"
        root = "expr"

        [rules]
        expr = { alt = [{ seq = ["expr", { regex = "[+-]", ws = true }, "term"] }, "term"] }
        term = { alt = [{ seq = ["term", { regex = "[*/]", ws = true }, "factor"] }, "factor"] }
        factor = { alt = ["number", "_group"] }
        _group = { seq = [{ drop = { text = "(", ws = true } }, "expr", { drop = { text = ")", ws = true } }], mandatory = 2 }
        number = { regex = "[0-9]+", ws = true }
    "#;

    #[test]
    fn left_recursive_arithmetic() {
        let grammar = load(ARITHMETIC).unwrap();
        let (tree, errors) = grammar.parse_root("1 + 2*(3 - 4)");
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(tree.tag(), "expr");
        assert_eq!(tree.select("number").count(), 4);
        assert_eq!(tree.content(), "1 + 2*3 - 4");
    }

    #[test]
    fn mandatory_group() {
        let grammar = load(ARITHMETIC).unwrap();
        let (_, errors) = grammar.parse_root("(1 + 2");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, ErrorCode::MANDATORY_CONTINUATION);
        assert!(errors[0].message.contains("expected ')'"), "{}", errors[0]);
    }

    #[test]
    fn custom_error_messages() {
        let source = format!(
            "{}{}",
            ARITHMETIC,
            r#"
            [resume]
            _group = ['\)']

            [errors]
            _group = [
                { when = '$', message = "unclosed group" },
                { when = '[0-9]', message = "operator or {expected} expected before {found}" },
            ]
            "#
        );
        let grammar = load(&source).unwrap();

        let (_, errors) = grammar.parse_root("(1 + 2");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, ErrorCode::MANDATORY_CONTINUATION);
        assert_eq!(errors[0].message, "unclosed group");

        let (_, errors) = grammar.parse_root("(1 + 2 3)");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "operator or ')' expected before »3)«");

        // Without a matching condition, the generic message is used
        let (_, errors) = grammar.parse_root("(1 + 2 x)");
        assert!(errors[0].message.starts_with("expected ')' by \"_group\""), "{}", errors[0]);
    }

    #[test]
    fn bad_error_messages() {
        let with_errors = |errors: &str| {
            load(&format!("{}\n[errors]\n{}", ARITHMETIC, errors))
        };
        assert!(matches!(
            with_errors(r#"nothing = [{ message = "x" }]"#),
            Err(ConvertError::Build(BuildError::UnknownErrorMessageRule(name))) if name == "nothing"
        ));
        assert!(matches!(
            with_errors(r#"_group = [{ message = "{what}" }]"#),
            Err(ConvertError::Build(BuildError::MalformedErrorMessage { .. }))
        ));
        assert!(matches!(
            with_errors(r#"_group = [{ message = "{expected" }]"#),
            Err(ConvertError::Build(BuildError::MalformedErrorMessage { .. }))
        ));
        assert!(matches!(
            with_errors(r#"_group = [{ when = "(", message = "x" }]"#),
            Err(ConvertError::Build(BuildError::Regex { .. }))
        ));
        assert!(with_errors(r#"_group = [{ message = "{{literal}} {found}" }]"#).is_ok());
    }

    #[test]
    fn captures_default_to_the_rule_name() {
        let grammar = load(
            r#"
            root = "quoted"
            [rules]
            quoted = { seq = ["delim", { regex = "[a-z ]*" }, { pop = "delim" }] }
            delim = { capture = { regex = "[\"']" } }
            "#,
        )
        .unwrap();
        let (tree, errors) = grammar.parse_root("'a b'");
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(tree.as_flat_sxpr(), r#"(quoted (delim "'") (:RegExp "a b") (delim "'"))"#);
        let (_, errors) = grammar.parse_root("'a b\"");
        assert_eq!(errors[0].code, ErrorCode::PARSER_DID_NOT_MATCH);
    }

    #[test]
    fn unknown_rules() {
        let result = load(
            r#"
            root = "a"
            [rules]
            a = { seq = ["b"] }
            "#,
        );
        assert!(matches!(
            result,
            Err(ConvertError::UnknownRule { name, rule }) if name == "b" && rule == "a"
        ));
        let result = load(
            r#"
            root = "c"
            [rules]
            a = { text = "a" }
            "#,
        );
        assert!(matches!(
            result,
            Err(ConvertError::Build(BuildError::UnknownRoot(_)))
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = toml::from_str::<SpecGrammar>(
            r#"
            root = "a"
            [rules]
            a = { text = "a", regex = "b" }
            "#,
        );
        assert!(result.is_err());
    }
}
