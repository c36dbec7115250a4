//! Condition expression language: parser and evaluator.
//!
//! Grammar:
//! ```text
//! ConditionExpr  ::= Clause ( '&&' Clause )*
//! Clause         ::= Key | Key '=' Literal | Key '!=' Literal
//! Literal        ::= QuotedString | BareWord
//! ```
//!
//! A bare `Key` is a truthiness test. `&&` inside a double-quoted literal does
//! not split clauses.

use serde_json::Value;

use dotflow_types::{Context, DotflowError, Result};

/// A parsed condition expression consisting of zero or more clauses joined by `&&`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionExpr {
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub key: String,
    pub operator: Operator,
    /// Comparison literal with surrounding quotes removed. Empty for `Truthy`.
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Truthy,
}

/// Status and label of the handler run whose outgoing edges are being tested.
#[derive(Debug, Clone, Copy)]
pub struct ConditionRuntime<'a> {
    pub status: &'a str,
    pub preferred_label: Option<&'a str>,
}

/// Parse a condition string into a [`ConditionExpr`].
///
/// An empty or whitespace-only input produces an expression with zero clauses,
/// which [`evaluate_condition`] treats as always true.
pub fn parse_condition(input: &str) -> Result<ConditionExpr> {
    let clauses = split_by_and(input.trim())
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_clause)
        .collect::<Result<Vec<_>>>()?;
    Ok(ConditionExpr { clauses })
}

fn parse_clause(input: &str) -> Result<Clause> {
    let Some((key_end, operator, op_len)) = find_operator(input) else {
        return Ok(Clause {
            key: input.to_string(),
            operator: Operator::Truthy,
            value: String::new(),
        });
    };

    let key = input[..key_end].trim();
    let value = strip_quotes(input[key_end + op_len..].trim());
    if key.is_empty() || value.is_empty() {
        return Err(DotflowError::InvalidCondition {
            clause: input.to_string(),
        });
    }

    Ok(Clause {
        key: key.to_string(),
        operator,
        value,
    })
}

/// Split on `&&` outside double-quoted literals.
fn split_by_and(input: &str) -> Vec<&str> {
    let bytes = input.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
        } else if b == b'"' {
            in_string = true;
        } else if b == b'&' && bytes.get(i + 1) == Some(&b'&') {
            parts.push(&input[start..i]);
            i += 2;
            start = i;
            continue;
        }
        i += 1;
    }
    parts.push(&input[start..]);
    parts
}

/// Locate `!=` or `=` outside quoted regions.
fn find_operator(input: &str) -> Option<(usize, Operator, usize)> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    i += if bytes[i] == b'\\' { 2 } else { 1 };
                }
                i += 1;
            }
            b'!' if bytes.get(i + 1) == Some(&b'=') => return Some((i, Operator::NotEq, 2)),
            b'=' => return Some((i, Operator::Eq, 1)),
            _ => i += 1,
        }
    }
    None
}

fn strip_quotes(s: &str) -> String {
    s.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(s)
        .to_string()
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate a parsed expression. All clauses must hold.
pub fn evaluate_condition(
    expr: &ConditionExpr,
    runtime: &ConditionRuntime<'_>,
    context: &Context,
) -> bool {
    expr.clauses.iter().all(|clause| {
        let actual = resolve_key(&clause.key, runtime, context);
        match clause.operator {
            Operator::Eq => actual == clause.value,
            Operator::NotEq => actual != clause.value,
            Operator::Truthy => is_truthy(&actual),
        }
    })
}

/// Parse and evaluate in one step.
pub fn check_condition(
    input: &str,
    runtime: &ConditionRuntime<'_>,
    context: &Context,
) -> Result<bool> {
    Ok(evaluate_condition(&parse_condition(input)?, runtime, context))
}

/// Resolve a key to its string form. Missing keys resolve to `""`.
///
/// `outcome` and `preferred_label` come from the runtime. `context.x` is
/// looked up as written and then as `x`; any other key is a direct lookup.
pub fn resolve_key(key: &str, runtime: &ConditionRuntime<'_>, context: &Context) -> String {
    match key {
        "outcome" => return runtime.status.to_string(),
        "preferred_label" => return runtime.preferred_label.unwrap_or_default().to_string(),
        _ => {}
    }

    let found = match key.strip_prefix("context.") {
        Some(stripped) => context.lookup(key).or_else(|| context.lookup(stripped)),
        None => context.lookup(key),
    };
    found.map(value_to_string).unwrap_or_default()
}

/// Render a context value for comparison: strings as-is, scalars in literal
/// form, structures as compact JSON, null as empty. Floats with no fractional
/// part render without one, so `3.0` compares equal to `3`.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f == 0.0 => "0".to_string(),
            Some(f) if n.is_f64() && f.is_finite() && f.fract() == 0.0 => format!("{f:.0}"),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// `""`, `"0"`, `"false"`, and `"null"` are false; everything else is true.
pub fn is_truthy(value: &str) -> bool {
    !matches!(value, "" | "0" | "false" | "null")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(pairs: &[(&str, Value)]) -> Context {
        let mut c = Context::new();
        for (k, v) in pairs {
            c.set(k, v.clone());
        }
        c
    }

    fn rt(status: &str) -> ConditionRuntime<'_> {
        ConditionRuntime {
            status,
            preferred_label: None,
        }
    }

    // --- parsing ---

    #[test]
    fn parse_empty_is_vacuous() {
        let expr = parse_condition("   ").unwrap();
        assert!(expr.clauses.is_empty());
        assert!(evaluate_condition(&expr, &rt("fail"), &Context::new()));
    }

    #[test]
    fn parse_operators() {
        let expr = parse_condition("outcome=success && context.flag!=off && ready").unwrap();
        assert_eq!(expr.clauses.len(), 3);
        assert_eq!(expr.clauses[0].operator, Operator::Eq);
        assert_eq!(expr.clauses[1].operator, Operator::NotEq);
        assert_eq!(expr.clauses[1].key, "context.flag");
        assert_eq!(expr.clauses[1].value, "off");
        assert_eq!(expr.clauses[2].operator, Operator::Truthy);
        assert_eq!(expr.clauses[2].key, "ready");
    }

    #[test]
    fn parse_strips_quotes() {
        let expr = parse_condition(r#"preferred_label = "Ship it""#).unwrap();
        assert_eq!(expr.clauses[0].value, "Ship it");
    }

    #[test]
    fn ampersands_inside_quotes_do_not_split() {
        let expr = parse_condition(r#"context.note="a && b" && outcome=success"#).unwrap();
        assert_eq!(expr.clauses.len(), 2);
        assert_eq!(expr.clauses[0].value, "a && b");
    }

    #[test]
    fn parse_rejects_missing_key_or_value() {
        assert!(matches!(
            parse_condition("=success"),
            Err(DotflowError::InvalidCondition { .. })
        ));
        assert!(matches!(
            parse_condition("outcome!="),
            Err(DotflowError::InvalidCondition { .. })
        ));
    }

    // --- evaluation ---

    #[test]
    fn outcome_and_context_flag() {
        let on = ctx(&[("flag", json!("on"))]);
        let off = ctx(&[("flag", json!("off"))]);
        let cond = "outcome=success && context.flag!=off";
        assert!(check_condition(cond, &rt("success"), &on).unwrap());
        assert!(!check_condition(cond, &rt("success"), &off).unwrap());
        assert!(!check_condition(cond, &rt("fail"), &on).unwrap());
    }

    #[test]
    fn preferred_label_comes_from_runtime() {
        let runtime = ConditionRuntime {
            status: "success",
            preferred_label: Some("approve"),
        };
        let c = ctx(&[("preferred_label", json!("stale"))]);
        assert!(check_condition("preferred_label=approve", &runtime, &c).unwrap());
        assert!(!check_condition("preferred_label", &rt("success"), &c).unwrap());
    }

    #[test]
    fn context_prefix_tries_literal_then_stripped() {
        let literal = ctx(&[("context.mode", json!("fast"))]);
        assert_eq!(resolve_key("context.mode", &rt("success"), &literal), "fast");

        let stripped = ctx(&[("mode", json!("slow"))]);
        assert_eq!(resolve_key("context.mode", &rt("success"), &stripped), "slow");

        assert_eq!(resolve_key("context.missing", &rt("success"), &stripped), "");
    }

    #[test]
    fn dotted_keys_traverse_nested_values() {
        let mut c = Context::new();
        c.insert_raw("node_outcomes", json!({"build": "fail"}));
        assert!(check_condition("node_outcomes.build=fail", &rt("success"), &c).unwrap());
        assert!(check_condition("graph.goal!=x", &rt("success"), &c).unwrap());
    }

    #[test]
    fn non_string_values_are_stringified() {
        let c = ctx(&[
            ("count", json!(3)),
            ("done", json!(true)),
            ("meta", json!({"a": 1})),
        ]);
        assert!(check_condition("count=3 && done=true", &rt("success"), &c).unwrap());
        assert_eq!(resolve_key("meta", &rt("success"), &c), r#"{"a":1}"#);
    }

    #[test]
    fn integral_floats_compare_as_integers() {
        let c = ctx(&[("count", json!(3.0)), ("zero", json!(-0.0))]);
        assert!(check_condition("count=3", &rt("success"), &c).unwrap());
        assert!(check_condition("context.count!=3.0", &rt("success"), &c).unwrap());
        assert_eq!(value_to_string(&json!(2.5)), "2.5");
        assert_eq!(value_to_string(&json!(-4.0)), "-4");
        assert_eq!(value_to_string(&json!(0.0)), "0");
        assert!(!check_condition("zero", &rt("success"), &c).unwrap());
    }

    #[test]
    fn truthiness() {
        for falsy in ["", "0", "false", "null"] {
            assert!(!is_truthy(falsy), "{falsy:?}");
        }
        for truthy in ["1", "yes", "False", "x"] {
            assert!(is_truthy(truthy), "{truthy:?}");
        }
        let c = ctx(&[("zero", json!(0)), ("flag", json!("on")), ("nothing", Value::Null)]);
        assert!(!check_condition("zero", &rt("success"), &c).unwrap());
        assert!(!check_condition("nothing", &rt("success"), &c).unwrap());
        assert!(check_condition("flag", &rt("success"), &c).unwrap());
        assert!(!check_condition("absent", &rt("success"), &c).unwrap());
    }
}
