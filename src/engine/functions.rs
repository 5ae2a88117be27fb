//! Built-in expression functions
//!
//! Version comparisons, capability predicates over manifest data, and the
//! small logic/array helper set. Every function validates its arity and
//! degrades gracefully on malformed data: a predicate over something that
//! is not a capability map is simply false.

use super::evaluator::UserFn;
use super::value::Value;
use super::{EvalError, EvalResult};
use crate::resolver::version::Version;
use std::collections::HashMap;
use std::sync::Arc;

/// Ordered team-size tiers used by `team_size_gte`.
const TEAM_SIZE_TIERS: [&str; 5] = ["solo", "small", "medium", "large", "enterprise"];

/// Ordered complexity tiers used by `complexity_gte`.
const COMPLEXITY_TIERS: [&str; 4] = ["simple", "medium", "complex", "enterprise"];

fn expect_arity(name: &str, args: &[Value], expected: usize) -> EvalResult<()> {
    if args.len() != expected {
        return Err(EvalError::ArityMismatch {
            name: name.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn expect_at_least(name: &str, args: &[Value], expected: usize) -> EvalResult<()> {
    if args.len() < expected {
        return Err(EvalError::ArityMismatch {
            name: name.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

/// Parse the dotted-integer form used in expressions; unparseable input
/// makes the comparison false rather than failing the render.
fn parse_version(v: &Value) -> Option<Version> {
    Version::parse_lenient(&v.to_text())
}

/// Pull a named field out of a capability map, or fall back to the value
/// itself when the data is plain text.
fn capability_text(data: &Value, field: &str) -> Option<String> {
    match data {
        Value::Map(m) => m.get(field).map(|v| v.to_text()),
        Value::Text(s) => Some(s.clone()),
        _ => None,
    }
}

fn capability_list(data: &Value, field: &str) -> Option<Vec<Value>> {
    match data {
        Value::Map(m) => match m.get(field) {
            Some(Value::List(xs)) => Some(xs.clone()),
            _ => None,
        },
        Value::List(xs) => Some(xs.clone()),
        Value::Text(s) => Some(vec![Value::Text(s.clone())]),
        _ => None,
    }
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn tier_rank(tiers: &[&str], value: &str) -> Option<usize> {
    tiers.iter().position(|t| eq_ignore_case(t, value))
}

/// The generic condition-matching rule used by `any`/`all`: an item
/// matches when it equals the condition, or, for a text condition, when
/// the item's text form contains it.
fn matches_condition(item: &Value, cond: &Value) -> bool {
    if item == cond {
        return true;
    }
    match cond {
        Value::Text(needle) => item.to_text().contains(needle.as_str()),
        _ => false,
    }
}

fn field_predicate(field: &'static str, name: &'static str) -> impl Fn(&[Value]) -> EvalResult<Value> {
    move |args: &[Value]| {
        expect_arity(name, args, 2)?;
        let expected = args[1].to_text();
        let actual = capability_text(&args[0], field);
        Ok(Value::Bool(
            actual.map(|a| eq_ignore_case(&a, &expected)).unwrap_or(false),
        ))
    }
}

fn list_predicate(field: &'static str, name: &'static str) -> impl Fn(&[Value]) -> EvalResult<Value> {
    move |args: &[Value]| {
        expect_arity(name, args, 2)?;
        let needle = &args[1];
        let hit = capability_list(&args[0], field)
            .map(|xs| {
                xs.iter().any(|el| {
                    *el == *needle || eq_ignore_case(&el.to_text(), &needle.to_text())
                })
            })
            .unwrap_or(false);
        Ok(Value::Bool(hit))
    }
}

fn tier_predicate(
    field: &'static str,
    name: &'static str,
    tiers: &'static [&'static str],
) -> impl Fn(&[Value]) -> EvalResult<Value> {
    move |args: &[Value]| {
        expect_arity(name, args, 2)?;
        let actual = capability_text(&args[0], field).and_then(|t| tier_rank(tiers, &t));
        let min = tier_rank(tiers, &args[1].to_text());
        Ok(Value::Bool(match (actual, min) {
            (Some(a), Some(m)) => a >= m,
            _ => false,
        }))
    }
}

/// Install the built-in function set into a registry.
pub fn register_builtins(fns: &mut HashMap<String, Arc<UserFn>>) {
    let mut add = |name: &str, f: Arc<UserFn>| {
        fns.insert(name.to_string(), f);
    };

    add(
        "version_gte",
        Arc::new(|args: &[Value]| {
            expect_arity("version_gte", args, 2)?;
            Ok(Value::Bool(
                match (parse_version(&args[0]), parse_version(&args[1])) {
                    (Some(a), Some(b)) => a >= b,
                    _ => false,
                },
            ))
        }),
    );

    add(
        "version_lt",
        Arc::new(|args: &[Value]| {
            expect_arity("version_lt", args, 2)?;
            Ok(Value::Bool(
                match (parse_version(&args[0]), parse_version(&args[1])) {
                    (Some(a), Some(b)) => a < b,
                    _ => false,
                },
            ))
        }),
    );

    add(
        "length",
        Arc::new(|args: &[Value]| {
            expect_arity("length", args, 1)?;
            Ok(Value::Number(args[0].length() as f64))
        }),
    );

    add(
        "empty",
        Arc::new(|args: &[Value]| {
            expect_arity("empty", args, 1)?;
            Ok(Value::Bool(match &args[0] {
                Value::Null => true,
                Value::Text(_) | Value::List(_) | Value::Map(_) => args[0].length() == 0,
                _ => false,
            }))
        }),
    );

    add(
        "max",
        Arc::new(|args: &[Value]| {
            expect_at_least("max", args, 1)?;
            let best = args
                .iter()
                .map(|v| v.as_number())
                .fold(f64::NEG_INFINITY, f64::max);
            Ok(Value::Number(best))
        }),
    );

    add(
        "min",
        Arc::new(|args: &[Value]| {
            expect_at_least("min", args, 1)?;
            let best = args
                .iter()
                .map(|v| v.as_number())
                .fold(f64::INFINITY, f64::min);
            Ok(Value::Number(best))
        }),
    );

    add(
        "platform_is",
        Arc::new(field_predicate("platform", "platform_is")),
    );
    add(
        "framework_is",
        Arc::new(field_predicate("framework", "framework_is")),
    );
    add(
        "environment_is",
        Arc::new(field_predicate("environment", "environment_is")),
    );
    add(
        "has_feature",
        Arc::new(list_predicate("features", "has_feature")),
    );
    add(
        "has_integration",
        Arc::new(list_predicate("integrations", "has_integration")),
    );
    add(
        "team_size_gte",
        Arc::new(tier_predicate("team_size", "team_size_gte", &TEAM_SIZE_TIERS)),
    );
    add(
        "complexity_gte",
        Arc::new(tier_predicate("complexity", "complexity_gte", &COMPLEXITY_TIERS)),
    );

    add(
        "and",
        Arc::new(|args: &[Value]| Ok(Value::Bool(args.iter().all(|v| v.is_truthy())))),
    );
    add(
        "or",
        Arc::new(|args: &[Value]| Ok(Value::Bool(args.iter().any(|v| v.is_truthy())))),
    );
    add(
        "not",
        Arc::new(|args: &[Value]| {
            expect_arity("not", args, 1)?;
            Ok(Value::Bool(!args[0].is_truthy()))
        }),
    );

    add(
        "includes",
        Arc::new(|args: &[Value]| {
            expect_arity("includes", args, 2)?;
            Ok(Value::Bool(match &args[0] {
                Value::List(xs) => xs.iter().any(|el| *el == args[1]),
                Value::Text(s) => s.contains(&args[1].to_text()),
                _ => false,
            }))
        }),
    );

    add(
        "any",
        Arc::new(|args: &[Value]| {
            expect_arity("any", args, 2)?;
            Ok(Value::Bool(match &args[0] {
                Value::List(xs) => xs.iter().any(|el| matches_condition(el, &args[1])),
                _ => false,
            }))
        }),
    );

    add(
        "all",
        Arc::new(|args: &[Value]| {
            expect_arity("all", args, 2)?;
            Ok(Value::Bool(match &args[0] {
                Value::List(xs) => {
                    !xs.is_empty() && xs.iter().all(|el| matches_condition(el, &args[1]))
                }
                _ => false,
            }))
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::evaluator::{Evaluator, Scope};
    use std::collections::BTreeMap;

    fn eval(expr: &str, vars: &Scope) -> Value {
        Evaluator::new().evaluate(expr, vars).unwrap()
    }

    fn capability_map() -> Scope {
        let mut data = BTreeMap::new();
        data.insert("platform".to_string(), Value::Text("web".into()));
        data.insert("framework".to_string(), Value::Text("flutter".into()));
        data.insert("environment".to_string(), Value::Text("production".into()));
        data.insert("team_size".to_string(), Value::Text("medium".into()));
        data.insert("complexity".to_string(), Value::Text("complex".into()));
        data.insert(
            "features".to_string(),
            Value::List(vec![Value::Text("auth".into()), Value::Text("sync".into())]),
        );
        data.insert(
            "integrations".to_string(),
            Value::List(vec![Value::Text("stripe".into())]),
        );
        let mut scope = Scope::new();
        scope.insert("data".to_string(), Value::Map(data));
        scope
    }

    #[test]
    fn test_version_comparisons() {
        let vars = Scope::new();
        assert_eq!(
            eval("version_gte(\"3.2.0\", \"3.0.0\")", &vars),
            Value::Bool(true)
        );
        assert_eq!(
            eval("version_lt(\"3.2.0-beta\", \"3.2.0\")", &vars),
            Value::Bool(true)
        );
        assert_eq!(
            eval("version_gte(\"1.0.0\", \"2.0.0\")", &vars),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_capability_predicates() {
        let vars = capability_map();
        assert_eq!(eval("platform_is(data, \"web\")", &vars), Value::Bool(true));
        assert_eq!(
            eval("platform_is(data, \"mobile\")", &vars),
            Value::Bool(false)
        );
        assert_eq!(
            eval("framework_is(data, \"Flutter\")", &vars),
            Value::Bool(true)
        );
        assert_eq!(
            eval("environment_is(data, \"production\")", &vars),
            Value::Bool(true)
        );
        assert_eq!(
            eval("has_feature(data, \"auth\")", &vars),
            Value::Bool(true)
        );
        assert_eq!(
            eval("has_feature(data, \"billing\")", &vars),
            Value::Bool(false)
        );
        assert_eq!(
            eval("has_integration(data, \"stripe\")", &vars),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_plain_text_capability_data() {
        let mut vars = Scope::new();
        vars.insert("platform".to_string(), Value::Text("linux".into()));
        assert_eq!(
            eval("platform_is(platform, \"linux\")", &vars),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_tier_predicates() {
        let vars = capability_map();
        assert_eq!(
            eval("team_size_gte(data, \"small\")", &vars),
            Value::Bool(true)
        );
        assert_eq!(
            eval("team_size_gte(data, \"large\")", &vars),
            Value::Bool(false)
        );
        assert_eq!(
            eval("complexity_gte(data, \"medium\")", &vars),
            Value::Bool(true)
        );
        assert_eq!(
            eval("complexity_gte(data, \"enterprise\")", &vars),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_logic_and_array_helpers() {
        let mut vars = Scope::new();
        vars.insert(
            "xs".to_string(),
            Value::List(vec![
                Value::Text("alpha".into()),
                Value::Text("beta".into()),
            ]),
        );
        assert_eq!(eval("and(true, 1, \"x\")", &vars), Value::Bool(true));
        assert_eq!(eval("or(false, 0, \"\")", &vars), Value::Bool(false));
        assert_eq!(eval("not(false)", &vars), Value::Bool(true));
        assert_eq!(eval("includes(xs, \"alpha\")", &vars), Value::Bool(true));
        assert_eq!(eval("any(xs, \"bet\")", &vars), Value::Bool(true));
        assert_eq!(eval("all(xs, \"a\")", &vars), Value::Bool(true));
        assert_eq!(eval("all(xs, \"alpha\")", &vars), Value::Bool(false));
    }

    #[test]
    fn test_length_and_empty() {
        let mut vars = Scope::new();
        vars.insert("xs".to_string(), Value::List(vec![Value::Null; 3]));
        assert_eq!(eval("length(xs)", &vars), Value::Number(3.0));
        assert_eq!(eval("length(\"abcd\")", &vars), Value::Number(4.0));
        assert_eq!(eval("length(5)", &vars), Value::Number(0.0));
        assert_eq!(eval("empty(\"\")", &vars), Value::Bool(true));
        assert_eq!(eval("empty(xs)", &vars), Value::Bool(false));
    }

    #[test]
    fn test_min_max() {
        let vars = Scope::new();
        assert_eq!(eval("max(1, 9, 4)", &vars), Value::Number(9.0));
        assert_eq!(eval("min(1, 9, 4)", &vars), Value::Number(1.0));
    }

    #[test]
    fn test_arity_mismatch() {
        let result = Evaluator::new().evaluate("version_gte(\"1.0.0\")", &Scope::new());
        assert!(matches!(result, Err(EvalError::ArityMismatch { .. })));
    }
}
