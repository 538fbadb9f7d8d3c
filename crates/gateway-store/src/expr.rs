//! The aggregation-expression evaluator (§6 "Store dependency", §10.1).
//!
//! Interprets the small operator vocabulary the approved `get_bp` / `get_height`
//! / `is_bp_above_mean` pipelines actually use: `$match`, `$lookup`,
//! `$addFields`, `$project`, `$filter`, `$let`, `$cond`, `$eq`, `$gt`, `$in`,
//! `$size`, `$and`, `$or`, and the `$$NOW` variable. This is not a general
//! aggregation engine — it supports exactly the shapes the release policy
//! needs and nothing more (§10.1: "not a general store").
//!
//! By the time a pipeline reaches this evaluator every schema placeholder has
//! already been substituted by [`gateway_types::template::bind`]; any
//! remaining `$`/`$$`-prefixed string here is a genuine field reference or
//! aggregation variable, never caller input.

use serde_json::{Map, Value};
use std::collections::HashMap;

/// Failures raised while interpreting a bound pipeline against the store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown collection: {0}")]
    UnknownCollection(String),
    #[error("unsupported operator: {0}")]
    UnknownOperator(String),
    #[error("malformed expression: {0}")]
    Malformed(String),
    #[error("type mismatch evaluating {0}")]
    TypeMismatch(String),
}

/// A local variable scope introduced by `$let` or `$filter`'s `as` binding.
pub type Scope = HashMap<String, Value>;

/// Everything an expression evaluation needs beyond the document at hand.
/// `$lookup` is handled at the pipeline-stage level ([`crate::store`]), not
/// inside expressions, so this carries only the clock.
pub struct EvalContext {
    pub now: u64,
}

fn get_path<'a>(root: &'a Value, path: &str) -> Value {
    let mut cur = root;
    for segment in path.split('.') {
        match cur.get(segment) {
            Some(v) => cur = v,
            None => return Value::Null,
        }
    }
    cur.clone()
}

/// Evaluates one expression node against `doc`, with `vars` as the current
/// `$$name` scope.
pub fn eval_expr(
    expr: &Value,
    doc: &Value,
    vars: &Scope,
    ctx: &EvalContext,
) -> Result<Value, StoreError> {
    match expr {
        Value::String(s) => eval_string_ref(s, doc, vars, ctx),
        Value::Object(map) if map.len() == 1 => {
            let (op, arg) = map.iter().next().unwrap();
            if let Some(op) = op.strip_prefix('$') {
                eval_operator(op, arg, doc, vars, ctx)
            } else {
                Ok(expr.clone())
            }
        }
        other => Ok(other.clone()),
    }
}

fn eval_string_ref(
    s: &str,
    doc: &Value,
    vars: &Scope,
    ctx: &EvalContext,
) -> Result<Value, StoreError> {
    if let Some(rest) = s.strip_prefix("$$") {
        if rest == "NOW" {
            return Ok(Value::Number(ctx.now.into()));
        }
        let mut parts = rest.splitn(2, '.');
        let var_name = parts.next().unwrap_or_default();
        let Some(base) = vars.get(var_name) else {
            return Err(StoreError::Malformed(format!("unbound variable ${}", rest)));
        };
        return Ok(match parts.next() {
            Some(path) => get_path(base, path),
            None => base.clone(),
        });
    }
    if let Some(path) = s.strip_prefix('$') {
        return Ok(get_path(doc, path));
    }
    Ok(Value::String(s.to_string()))
}

fn as_f64(v: &Value, who: &str) -> Result<f64, StoreError> {
    v.as_f64().ok_or_else(|| StoreError::TypeMismatch(who.to_string()))
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

fn eval_operator(
    op: &str,
    arg: &Value,
    doc: &Value,
    vars: &Scope,
    ctx: &EvalContext,
) -> Result<Value, StoreError> {
    match op {
        "eq" => {
            let pair = eval_pair(arg, doc, vars, ctx)?;
            Ok(Value::Bool(pair.0 == pair.1))
        }
        "gt" => {
            let (a, b) = eval_pair(arg, doc, vars, ctx)?;
            Ok(Value::Bool(as_f64(&a, "$gt")? > as_f64(&b, "$gt")?))
        }
        "in" => {
            let arr = arg.as_array().ok_or_else(|| StoreError::Malformed("$in expects [needle, haystack]".into()))?;
            let [needle, haystack] = arr.as_slice() else {
                return Err(StoreError::Malformed("$in expects exactly two operands".into()));
            };
            let needle = eval_expr(needle, doc, vars, ctx)?;
            let haystack = eval_expr(haystack, doc, vars, ctx)?;
            let items = haystack
                .as_array()
                .ok_or_else(|| StoreError::TypeMismatch("$in haystack".into()))?;
            Ok(Value::Bool(items.contains(&needle)))
        }
        "size" => {
            let v = eval_expr(arg, doc, vars, ctx)?;
            let len = match v {
                Value::Array(a) => a.len(),
                Value::Null => 0,
                other => return Err(StoreError::TypeMismatch(format!("$size of {other}"))),
            };
            Ok(Value::Number(len.into()))
        }
        "and" => {
            let items = arg.as_array().ok_or_else(|| StoreError::Malformed("$and expects an array".into()))?;
            for item in items {
                if !truthy(&eval_expr(item, doc, vars, ctx)?) {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        "or" => {
            let items = arg.as_array().ok_or_else(|| StoreError::Malformed("$or expects an array".into()))?;
            for item in items {
                if truthy(&eval_expr(item, doc, vars, ctx)?) {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "cond" => eval_cond(arg, doc, vars, ctx),
        "filter" => eval_filter(arg, doc, vars, ctx),
        "let" => eval_let(arg, doc, vars, ctx),
        other => Err(StoreError::UnknownOperator(format!("${other}"))),
    }
}

fn eval_pair(arg: &Value, doc: &Value, vars: &Scope, ctx: &EvalContext) -> Result<(Value, Value), StoreError> {
    let arr = arg.as_array().ok_or_else(|| StoreError::Malformed("expected a 2-element array".into()))?;
    let [a, b] = arr.as_slice() else {
        return Err(StoreError::Malformed("expected exactly two operands".into()));
    };
    Ok((eval_expr(a, doc, vars, ctx)?, eval_expr(b, doc, vars, ctx)?))
}

fn eval_cond(arg: &Value, doc: &Value, vars: &Scope, ctx: &EvalContext) -> Result<Value, StoreError> {
    let (if_expr, then_expr, else_expr) = match arg {
        Value::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
        Value::Object(map) => {
            return eval_cond_fields(map, doc, vars, ctx);
        }
        _ => return Err(StoreError::Malformed("$cond expects [if, then, else]".into())),
    };
    if truthy(&eval_expr(if_expr, doc, vars, ctx)?) {
        eval_expr(then_expr, doc, vars, ctx)
    } else {
        eval_expr(else_expr, doc, vars, ctx)
    }
}

fn eval_cond_fields(map: &Map<String, Value>, doc: &Value, vars: &Scope, ctx: &EvalContext) -> Result<Value, StoreError> {
    let if_expr = map.get("if").ok_or_else(|| StoreError::Malformed("$cond missing `if`".into()))?;
    let then_expr = map.get("then").ok_or_else(|| StoreError::Malformed("$cond missing `then`".into()))?;
    let else_expr = map.get("else").ok_or_else(|| StoreError::Malformed("$cond missing `else`".into()))?;
    if truthy(&eval_expr(if_expr, doc, vars, ctx)?) {
        eval_expr(then_expr, doc, vars, ctx)
    } else {
        eval_expr(else_expr, doc, vars, ctx)
    }
}

fn eval_filter(arg: &Value, doc: &Value, vars: &Scope, ctx: &EvalContext) -> Result<Value, StoreError> {
    let map = arg.as_object().ok_or_else(|| StoreError::Malformed("$filter expects an object".into()))?;
    let input = map.get("input").ok_or_else(|| StoreError::Malformed("$filter missing `input`".into()))?;
    let as_name = map
        .get("as")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::Malformed("$filter missing `as`".into()))?;
    let cond = map.get("cond").ok_or_else(|| StoreError::Malformed("$filter missing `cond`".into()))?;

    let input = eval_expr(input, doc, vars, ctx)?;
    let items = match input {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => return Err(StoreError::TypeMismatch(format!("$filter input: {other}"))),
    };
    let mut out = Vec::new();
    for item in items {
        let mut scoped = vars.clone();
        scoped.insert(as_name.to_string(), item.clone());
        if truthy(&eval_expr(cond, doc, &scoped, ctx)?) {
            out.push(item);
        }
    }
    Ok(Value::Array(out))
}

fn eval_let(arg: &Value, doc: &Value, vars: &Scope, ctx: &EvalContext) -> Result<Value, StoreError> {
    let map = arg.as_object().ok_or_else(|| StoreError::Malformed("$let expects an object".into()))?;
    let var_defs = map
        .get("vars")
        .and_then(Value::as_object)
        .ok_or_else(|| StoreError::Malformed("$let missing `vars`".into()))?;
    let in_expr = map.get("in").ok_or_else(|| StoreError::Malformed("$let missing `in`".into()))?;

    let mut scoped = vars.clone();
    for (name, expr) in var_defs {
        let value = eval_expr(expr, doc, &scoped, ctx)?;
        scoped.insert(name.clone(), value);
    }
    eval_expr(in_expr, doc, &scoped, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> EvalContext {
        EvalContext { now: 1_700_000_000 }
    }

    #[test]
    fn resolves_field_and_now_variable() {
        let doc = json!({"_id": "abc"});
        let vars = Scope::new();
        assert_eq!(eval_expr(&json!("$_id"), &doc, &vars, &ctx()).unwrap(), json!("abc"));
        assert_eq!(eval_expr(&json!("$$NOW"), &doc, &vars, &ctx()).unwrap(), json!(1_700_000_000u64));
    }

    #[test]
    fn eq_gt_and_or_compose() {
        let doc = json!({"a": 5, "b": 3});
        let vars = Scope::new();
        let c = ctx();
        assert_eq!(eval_expr(&json!({"$gt": ["$a", "$b"]}), &doc, &vars, &c).unwrap(), json!(true));
        assert_eq!(
            eval_expr(&json!({"$and": [{"$gt": ["$a", "$b"]}, {"$eq": ["$a", 5]}]}), &doc, &vars, &c).unwrap(),
            json!(true)
        );
        assert_eq!(
            eval_expr(&json!({"$or": [{"$eq": ["$a", 1]}, {"$eq": ["$b", 3]}]}), &doc, &vars, &c).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn filter_and_size_detect_membership() {
        let doc = json!({
            "users": [
                {"userId": "D", "permissions": ["read"], "expiration": 2_000_000_000u64},
                {"userId": "E", "permissions": ["enclave"], "expiration": 2_000_000_000u64},
            ]
        });
        let vars = Scope::new();
        let c = ctx();
        let has_read = json!({"$gt": [
            {"$size": {"$filter": {
                "input": "$users",
                "as": "u",
                "cond": {"$and": [
                    {"$eq": ["$$u.userId", "D"]},
                    {"$in": ["read", "$$u.permissions"]},
                    {"$gt": ["$$u.expiration", "$$NOW"]}
                ]}
            }}},
            0
        ]});
        assert_eq!(eval_expr(&has_read, &doc, &vars, &c).unwrap(), json!(true));
    }

    #[test]
    fn let_binds_and_cond_selects() {
        let doc = json!({"flag": true});
        let vars = Scope::new();
        let expr = json!({
            "$let": {
                "vars": {"x": "$flag"},
                "in": {"$cond": ["$$x", "yes", "no"]}
            }
        });
        assert_eq!(eval_expr(&expr, &doc, &vars, &ctx()).unwrap(), json!("yes"));
    }
}
