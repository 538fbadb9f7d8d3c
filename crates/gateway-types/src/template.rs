//! The `$name` placeholder binding engine (§4.4 "Template-Binding Engine").
//!
//! Turns an approved, placeholder-bearing [`Query`] into an executable one by
//! walking every stage's value tree and replacing recognized placeholder
//! leaves with validated parameters. Two kinds of `$`-prefixed strings
//! appear in a pipeline document and must be told apart:
//!
//! - **Parameter placeholders** — `$patient_id`, `$attestation`, ... — whose
//!   name is one of the nine entries in the closed schema (§3). These are
//!   resolved against the caller's validated [`Params`] and MUST be present;
//!   a schema name with no matching parameter is a binding failure.
//! - **Aggregation field references** — `$patientId`, `$data.metrics.bp`,
//!   `$$userAccess.permissions`, ... — the query language's own syntax for
//!   "the value of this document field" or "this `$let`-bound variable".
//!   These are not parameters at all and are left untouched; the store's
//!   expression evaluator ([`gateway_store`]) interprets them at execution
//!   time, never the binder.
//!
//! A leaf is only ever a parameter placeholder if, after stripping a single
//! leading `$`, its name is one of the nine schema names below — `$$`-prefixed
//! variables are never placeholders. This is the resolution of the open
//! question the distilled spec leaves implicit; see `DESIGN.md`.

use crate::params::{ParameterError, Params};
use crate::query::Query;
use serde_json::Value;

/// The closed set of parameter names the binder will ever try to resolve.
/// Any other `$`-prefixed leaf is aggregation-language syntax, not a
/// placeholder, and is passed through unchanged.
const SCHEMA_NAMES: &[&str] = &[
    "patient_id",
    "user_id",
    "access_control_id",
    "target_user_id",
    "access_control_path",
    "access_type",
    "height_input",
    "input_bp",
    "attestation",
    "expiration",
];

fn is_schema_placeholder(name: &str) -> bool {
    SCHEMA_NAMES.contains(&name)
}

/// Binds every approved-schema placeholder in `pipeline` against `params`.
///
/// Structural shape (nesting, arrays, object keys) is preserved exactly;
/// only placeholder leaf strings are replaced (§4.4 contract).
pub fn bind(pipeline: &Query, params: &Params) -> Result<Query, ParameterError> {
    pipeline.iter().map(|stage| bind_value(stage, params)).collect()
}

fn bind_value(value: &Value, params: &Params) -> Result<Value, ParameterError> {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                out.insert(key.clone(), bind_value(val, params)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| bind_value(item, params))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::String(s) => bind_string(s, params),
        other => Ok(other.clone()),
    }
}

fn bind_string(s: &str, params: &Params) -> Result<Value, ParameterError> {
    // `$$var` is an aggregation-language variable reference, never a placeholder.
    if s.starts_with("$$") {
        return Ok(Value::String(s.to_string()));
    }
    let Some(name) = s.strip_prefix('$') else {
        return Ok(Value::String(s.to_string()));
    };
    if !is_schema_placeholder(name) {
        // Not one of our parameter names: an aggregation field reference, left as-is.
        return Ok(Value::String(s.to_string()));
    }
    match params.get(name) {
        Some(value) => Ok(value.to_json()),
        None => Err(ParameterError::UnresolvedPlaceholder(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{validate_param, ParamValue};
    use crate::util::timestamp::UnixTimestamp;
    use serde_json::json;

    fn params_with(entries: &[(&str, Value)]) -> Params {
        let now = UnixTimestamp(1_700_000_000);
        entries
            .iter()
            .map(|(name, raw)| (name.to_string(), validate_param(name, raw, now).unwrap()))
            .collect()
    }

    #[test]
    fn substitutes_known_placeholder_and_preserves_field_refs() {
        let pipeline: Query = vec![json!({
            "$match": {"patientId": "$patient_id"},
        })];
        let params = params_with(&[("patient_id", json!("111111111111111111111111"))]);
        let bound = bind(&pipeline, &params).unwrap();
        assert_eq!(
            bound[0]["$match"]["patientId"],
            json!("111111111111111111111111")
        );
    }

    #[test]
    fn leaves_mongo_field_references_and_let_variables_untouched() {
        let pipeline: Query = vec![json!({
            "$project": {
                "bp": {
                    "$let": {
                        "vars": {"x": {"$filter": {"input": "$metricsAccessControl", "as": "control", "cond": {"$eq": ["$$control.userId", "$user_id"]}}}},
                        "in": "$data.metrics.sensitiveMetrics.bloodPressure"
                    }
                }
            }
        })];
        let params = params_with(&[("user_id", json!("000000000000000000000000"))]);
        let bound = bind(&pipeline, &params).unwrap();
        assert_eq!(bound[0]["$project"]["bp"]["$let"]["in"], json!("$data.metrics.sensitiveMetrics.bloodPressure"));
        assert_eq!(
            bound[0]["$project"]["bp"]["$let"]["vars"]["x"]["$filter"]["cond"]["$eq"][0],
            json!("$$control.userId")
        );
        assert_eq!(
            bound[0]["$project"]["bp"]["$let"]["vars"]["x"]["$filter"]["cond"]["$eq"][1],
            json!("000000000000000000000000")
        );
    }

    #[test]
    fn fails_on_unresolved_schema_placeholder() {
        let pipeline: Query = vec![json!({"$match": {"patientId": "$patient_id"}})];
        let params = Params::new();
        assert_eq!(
            bind(&pipeline, &params),
            Err(ParameterError::UnresolvedPlaceholder("patient_id".into()))
        );
    }

    #[test]
    fn binding_is_idempotent_once_resolved() {
        let pipeline: Query = vec![json!({"$match": {"patientId": "$patient_id"}})];
        let params = params_with(&[("patient_id", json!("111111111111111111111111"))]);
        let once = bind(&pipeline, &params).unwrap();
        // Re-binding the already-bound (placeholder-free) document changes nothing.
        let twice = bind(&once, &params).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn attestation_param_is_substituted_only_when_supplied_by_caller() {
        let pipeline: Query = vec![json!({"$project": {"gate": "$attestation"}})];
        let params: Params = [("attestation".to_string(), ParamValue::Bool(false))].into();
        let bound = bind(&pipeline, &params).unwrap();
        assert_eq!(bound[0]["$project"]["gate"], json!(false));
    }
}
