//! JSONata expression engine.
//!
//! Implements the subset of JSONata the argument-mapping language relies on:
//! path navigation (including `*` and `**`), predicate filters, conditionals,
//! boolean/arithmetic/string operators, object and array construction,
//! variable bindings, lambdas, and the string/aggregation/array builtins.
//! Missing fields evaluate to "nothing" rather than raising errors.
//!
//! ```
//! use gateway_core::jsonata::Expression;
//! use serde_json::json;
//!
//! let expr = Expression::compile("{ \"total\": $sum(numbers) }").unwrap();
//! let out = expr.evaluate(&json!({"numbers": [10, 20, 30]})).unwrap();
//! assert_eq!(out, Some(json!({"total": 60})));
//! ```

mod eval;
mod functions;
mod lexer;
mod parser;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JsonataError {
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("type error: {0}")]
    Type(String),
}

/// A compiled JSONata expression, reusable across evaluations.
#[derive(Debug, Clone)]
pub struct Expression {
    ast: parser::Expr,
}

impl Expression {
    pub fn compile(source: &str) -> Result<Self, JsonataError> {
        Ok(Self {
            ast: parser::parse(source)?,
        })
    }

    /// Evaluate against an input document. `Ok(None)` means the expression
    /// evaluated to nothing (JSONata "undefined").
    pub fn evaluate(&self, input: &Value) -> Result<Option<Value>, JsonataError> {
        let mut evaluator = eval::Evaluator::new();
        Ok(evaluator.evaluate(&self.ast, Some(input))?.into_value())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn eval(source: &str, input: Value) -> Option<Value> {
        Expression::compile(source).unwrap().evaluate(&input).unwrap()
    }

    #[test]
    fn test_aggregation_scenario() {
        let out = eval(
            r#"{ "stats": { "total": $sum(numbers), "count": $count(numbers) } }"#,
            json!({"numbers": [10, 20, 30]}),
        );
        assert_eq!(out, Some(json!({"stats": {"total": 60, "count": 3}})));
    }

    #[test]
    fn test_string_builtins() {
        let input = json!({"name": "  fred  smith  "});
        assert_eq!(eval("$uppercase(name)", input.clone()), Some(json!("  FRED  SMITH  ")));
        assert_eq!(eval("$trim(name)", input.clone()), Some(json!("fred smith")));
        assert_eq!(eval("$length(\"héllo\")", input.clone()), Some(json!(5)));
        assert_eq!(
            eval("$substring(\"hello world\", -5)", input.clone()),
            Some(json!("world"))
        );
        assert_eq!(
            eval("$substring(\"hello\", 1, 3)", input.clone()),
            Some(json!("ell"))
        );
        assert_eq!(
            eval("$join($split(\"a,b,c\", \",\"), \"-\")", input.clone()),
            Some(json!("a-b-c"))
        );
        assert_eq!(
            eval("$replace(\"banana\", \"an\", \"AN\", 1)", input),
            Some(json!("bANana"))
        );
    }

    #[test]
    fn test_match_builtin() {
        let out = eval(
            "$match(\"ababbabbcc\", /a(b+)/)",
            json!({}),
        )
        .unwrap();
        let matches = out.as_array().unwrap();
        assert_eq!(matches.len(), 3);
        assert_eq!(matches[0]["match"], json!("ab"));
        assert_eq!(matches[0]["index"], json!(0));
        assert_eq!(matches[0]["groups"], json!(["b"]));
        assert_eq!(matches[1]["match"], json!("abb"));
    }

    #[test]
    fn test_aggregators() {
        let input = json!({"n": [3, 1, 2]});
        assert_eq!(eval("$min(n)", input.clone()), Some(json!(1)));
        assert_eq!(eval("$max(n)", input.clone()), Some(json!(3)));
        assert_eq!(eval("$average(n)", input.clone()), Some(json!(2)));
        assert_eq!(eval("$count(missing)", input.clone()), Some(json!(0)));
        assert_eq!(eval("$sum(missing)", input), None);
    }

    #[test]
    fn test_higher_order_functions() {
        let input = json!({"n": [1, 2, 3, 4]});
        assert_eq!(
            eval("$map(n, function($v) { $v * 10 })", input.clone()),
            Some(json!([10, 20, 30, 40]))
        );
        assert_eq!(
            eval("$filter(n, function($v) { $v % 2 = 0 })", input.clone()),
            Some(json!([2, 4]))
        );
        assert_eq!(
            eval("$reduce(n, function($acc, $v) { $acc + $v })", input.clone()),
            Some(json!(10))
        );
        assert_eq!(
            eval("$reduce(n, function($acc, $v) { $acc + $v }, 100)", input.clone()),
            Some(json!(110))
        );
        assert_eq!(
            eval("$sort([3, 1, 2])", input.clone()),
            Some(json!([1, 2, 3]))
        );
        assert_eq!(
            eval(
                "$sort([1, 3, 2], function($l, $r) { $l < $r })",
                input.clone()
            ),
            Some(json!([3, 2, 1]))
        );
        assert_eq!(
            eval("$append([1, 2], [3])", input.clone()),
            Some(json!([1, 2, 3]))
        );
        assert_eq!(
            eval("$distinct([1, 2, 1, 3, 2])", input),
            Some(json!([1, 2, 3]))
        );
    }

    #[test]
    fn test_exists() {
        let input = json!({"a": null, "b": 1});
        assert_eq!(eval("$exists(a)", input.clone()), Some(json!(true)));
        assert_eq!(eval("$exists(b)", input.clone()), Some(json!(true)));
        assert_eq!(eval("$exists(zzz)", input), Some(json!(false)));
    }

    #[test]
    fn test_variable_bound_lambda() {
        let out = eval(
            "($double := function($x) { $x * 2 }; $map(n, $double))",
            json!({"n": [1, 2]}),
        );
        assert_eq!(out, Some(json!([2, 4])));
    }

    #[test]
    fn test_restructuring() {
        let input = json!({
            "user": {"first": "Ada", "last": "Lovelace"},
            "items": [
                {"sku": "a", "price": 10, "qty": 2},
                {"sku": "b", "price": 5, "qty": 1}
            ]
        });
        let out = eval(
            r#"{
                "name": user.first & " " & user.last,
                "total": $sum($map(items, function($i) { $i.price * $i.qty })),
                "skus": items.sku
            }"#,
            input,
        );
        assert_eq!(
            out,
            Some(json!({
                "name": "Ada Lovelace",
                "total": 25,
                "skus": ["a", "b"]
            }))
        );
    }

    #[test]
    fn test_compile_error_reported() {
        assert!(matches!(
            Expression::compile("{ \"a\": }"),
            Err(JsonataError::Syntax { .. })
        ));
    }

    #[test]
    fn test_missing_fields_yield_none_not_error() {
        assert_eq!(eval("does.not.exist", json!({"a": 1})), None);
    }

    #[test]
    fn test_scalar_result_allowed_at_engine_level() {
        // The transformer layer enforces object results; the engine itself
        // returns whatever the expression produces.
        assert_eq!(eval("1 + 1", json!({})), Some(json!(2)));
    }
}
