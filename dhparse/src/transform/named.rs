//! Rule tables written as data (e.g. in the `[[transform]]` tables of a language file), where
//! rewrites are referred to by name.
//!
//! ```toml
//! [[transform]]
//! json = ["replace_by_single_child"]
//! "number, string" = ["collapse"]
//! group = ["remove_brackets", { rename = "expr" }]
//! list = [{ remove_tokens = [",", ";"] }]
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;

use super::{condition, primitives::*, Condition, Rewrite, RuleTable, TableError, TableResult};

/// One [`RuleTable`], as read from a file
pub type TableSpec = BTreeMap<String, Vec<RewriteSpec>>;

/// A rewrite referred to by name, either on its own or with an argument
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RewriteSpec {
    Name(String),
    /// A table with exactly one entry, mapping the name to the argument
    WithArg(BTreeMap<String, RewriteArg>),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RewriteArg {
    One(String),
    Many(Vec<String>),
}

impl RewriteArg {
    fn as_list(&self) -> Vec<String> {
        match self {
            RewriteArg::One(s) => vec![s.clone()],
            RewriteArg::Many(v) => v.clone(),
        }
    }
}

/// Builds a [`RuleTable`] from its description
pub fn table_from_spec(spec: &TableSpec) -> TableResult<RuleTable> {
    let mut table = RuleTable::new();
    for (key, rewrites) in spec {
        let rewrites = rewrites
            .iter()
            .map(resolve)
            .collect::<TableResult<Vec<_>>>()?;
        table.add(key, rewrites)?;
    }
    Ok(table)
}

fn resolve(spec: &RewriteSpec) -> TableResult<Rewrite> {
    match spec {
        RewriteSpec::Name(name) => named_rewrite(name, None),
        RewriteSpec::WithArg(map) => {
            let mut entries = map.iter();
            match (entries.next(), entries.next()) {
                (Some((name, arg)), None) => named_rewrite(name, Some(arg)),
                _ => Err(TableError::BadArgument {
                    rewrite: map.keys().cloned().collect::<Vec<_>>().join(", "),
                    reason: "expected a table with exactly one rewrite".to_owned(),
                }),
            }
        }
    }
}

/// Looks up a rewrite by name.  Some rewrites need an argument (e.g. `rename`), some take an
/// optional one (e.g. `remove_tokens`), and the rest take none.
pub fn named_rewrite(name: &str, arg: Option<&RewriteArg>) -> TableResult<Rewrite> {
    let bad = |reason: &str| TableError::BadArgument {
        rewrite: name.to_owned(),
        reason: reason.to_owned(),
    };
    let single = || match arg {
        Some(RewriteArg::One(s)) => Ok(s.clone()),
        Some(RewriteArg::Many(_)) => Err(bad("expected a single string")),
        None => Err(bad("missing argument")),
    };
    let list = || arg.map(RewriteArg::as_list).ok_or_else(|| bad("missing argument"));
    let no_arg = |rewrite: Rewrite| match arg {
        None => Ok(rewrite),
        Some(_) => Err(bad("takes no argument")),
    };
    // The condition given as argument, or `default` if there isn't one
    let cond_or = |default: Condition| match arg {
        None => Ok(default),
        Some(RewriteArg::One(name)) => named_condition(name),
        Some(RewriteArg::Many(tags)) => Ok(is_one_of(tags)),
    };

    match name {
        "replace_by_single_child" => no_arg(replace_by_single_child()),
        "reduce_single_child" => no_arg(reduce_single_child()),
        "replace_or_reduce" => Ok(replace_or_reduce(cond_or(condition(is_named))?)),
        "replace_by_child" => Ok(replace_by_child(single()?)),
        "flatten" => Ok(flatten(cond_or(condition(is_disposable))?, true)),
        "collapse" => no_arg(collapse()),
        "merge_adjacent" => Ok(merge_adjacent(condition(is_disposable), single()?)),
        "rename" => Ok(rename(single()?)),
        "replace_content_with" => Ok(replace_content_with(single()?)),
        "normalize_whitespace" => no_arg(normalize_whitespace()),

        "remove_children_if" => Ok(remove_children_if(named_condition(&single()?)?)),
        "remove_nodes" => Ok(remove_nodes(&list()?)),
        "keep_nodes" => Ok(keep_nodes(&list()?)),
        "remove_tokens" => Ok(remove_tokens(&arg.map_or_else(Vec::new, RewriteArg::as_list))),
        "remove_whitespace" => no_arg(remove_whitespace()),
        "remove_empty" => no_arg(remove_empty()),
        "remove_expendables" => no_arg(remove_expendables()),
        "remove_brackets" => no_arg(remove_brackets()),
        "remove_infix_operator" => no_arg(remove_infix_operator()),
        "strip" => Ok(strip(cond_or(condition(is_whitespace))?)),
        "lstrip" => Ok(lstrip(cond_or(condition(is_whitespace))?)),
        "rstrip" => Ok(rstrip(cond_or(condition(is_whitespace))?)),

        "assert_content" => assert_content(&single()?),
        "require" => Ok(require(&list()?)),
        "forbid" => Ok(forbid(&list()?)),

        _ => Err(TableError::UnknownRewrite(name.to_owned())),
    }
}

/// Looks up one of the argument-free conditions by name
pub fn named_condition(name: &str) -> TableResult<Condition> {
    Ok(match name {
        "is_disposable" => condition(is_disposable),
        "is_named" => condition(is_named),
        "is_whitespace" => condition(is_whitespace),
        "is_empty" => condition(is_empty),
        "is_token" => is_token::<&str>(&[]),
        _ => return Err(TableError::UnknownRewrite(name.to_owned())),
    })
}

#[cfg(test)]
mod tests {
    use dhparse_grammar::serialize::parse_sxpr;

    use super::*;

    fn table(toml_source: &str) -> TableResult<RuleTable> {
        let spec: TableSpec = toml::from_str(toml_source).unwrap();
        table_from_spec(&spec)
    }

    #[test]
    fn table_from_toml() {
        let table = table(
            r#"
            group = ["remove_brackets", "replace_by_single_child"]
            "sum, product" = [{ remove_tokens = ["+", "*"] }]
            num = [{ rename = "number" }]
            "#,
        )
        .unwrap();
        let mut tree = parse_sxpr(
            r#"(sum (num 1) (:Text "+") (group (:Text "(") (product (num 2) (:Text "*") (num 3)) (:Text ")")))"#,
        )
        .unwrap();
        table.apply(&mut tree);
        // `product` takes the place of `group`, and then gets its own rules applied
        let once = r#"(sum (number "1") (product (number "2") (number "3")))"#;
        assert_eq!(tree.as_flat_sxpr(), once);
        table.apply(&mut tree);
        assert_eq!(tree.as_flat_sxpr(), once);
    }

    #[test]
    fn bad_tables() {
        assert_eq!(
            table(r#"a = ["no_such_rewrite"]"#).err(),
            Some(TableError::UnknownRewrite("no_such_rewrite".to_owned()))
        );
        assert!(matches!(
            table(r#"a = ["rename"]"#),
            Err(TableError::BadArgument { rewrite, .. }) if rewrite == "rename"
        ));
        assert!(matches!(
            table(r#"a = [{ collapse = "x" }]"#),
            Err(TableError::BadArgument { .. })
        ));
        assert!(matches!(
            table(r#"a = [{ rename = "x", collapse = "y" }]"#),
            Err(TableError::BadArgument { .. })
        ));
        assert!(matches!(
            table(r#"a = [{ flatten = "is_purple" }]"#),
            Err(TableError::UnknownRewrite(_))
        ));
    }

    #[test]
    fn conditions_as_arguments() {
        let table = table(r#"doc = [{ remove_children_if = "is_empty" }, { flatten = ["para"] }]"#)
            .unwrap();
        let mut tree = parse_sxpr(r#"(doc (para (word a) (word b)) (word "") (para (word c)))"#)
            .unwrap();
        table.apply(&mut tree);
        assert_eq!(
            tree.as_flat_sxpr(),
            r#"(doc (word "a") (word "b") (word "c"))"#
        );
    }
}
