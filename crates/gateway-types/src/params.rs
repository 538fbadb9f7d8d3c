//! The closed parameter schema and validator set (§3 "Parameter schema", §4.4).
//!
//! Every parameter a template placeholder can resolve to is named, typed,
//! and validated by exactly one of the functions in this module. The set is
//! closed: a name outside it is a hard validation failure, never a
//! pass-through. This is what makes the binding engine in [`crate::template`]
//! safe — it never has to trust a caller-supplied shape, only a validated
//! [`ParamValue`].

use crate::util::oid::ObjectId;
use crate::util::timestamp::UnixTimestamp;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// One of the three permission sets `access_type` may validate to (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Write,
    ReadWrite,
    Read,
}

impl AccessType {
    fn from_set(mut values: Vec<String>) -> Result<Self, ParameterError> {
        values.sort();
        values.dedup();
        match values.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
            ["write"] => Ok(AccessType::Write),
            ["read", "write"] => Ok(AccessType::ReadWrite),
            ["read"] => Ok(AccessType::Read),
            _ => Err(ParameterError::CoercionFailed {
                name: "access_type".into(),
                reason: "must be exactly one of {write}, {read,write}, {read}".into(),
            }),
        }
    }

    pub fn as_strs(&self) -> &'static [&'static str] {
        match self {
            AccessType::Write => &["write"],
            AccessType::ReadWrite => &["read", "write"],
            AccessType::Read => &["read"],
        }
    }
}

/// A validated parameter value, ready to be spliced into a template leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Oid(ObjectId),
    Str(String),
    AccessType(AccessType),
    Number(f64),
    Bool(bool),
    Timestamp(UnixTimestamp),
}

impl ParamValue {
    /// The JSON representation spliced into a bound query in place of the
    /// `$name` placeholder.
    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Oid(oid) => Value::String(oid.to_string()),
            ParamValue::Str(s) => Value::String(s.clone()),
            ParamValue::AccessType(at) => {
                Value::Array(at.as_strs().iter().map(|s| Value::String(s.to_string())).collect())
            }
            ParamValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ParamValue::Bool(b) => Value::Bool(*b),
            ParamValue::Timestamp(ts) => Value::Number(ts.seconds_since_epoch().into()),
        }
    }
}

/// Parameter-validation failures (§7 `ParameterError`).
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ParameterError {
    #[error("unknown parameter name: {0}")]
    UnknownName(String),
    #[error("parameter {name} has the wrong type: {reason}")]
    CoercionFailed { name: String, reason: String },
    #[error("parameter {0} must be strictly in the future")]
    NotFuture(String),
    #[error("callers may not supply the `attestation` parameter")]
    AttestationNotAllowed,
    #[error("placeholder ${0} has no corresponding validated parameter")]
    UnresolvedPlaceholder(String),
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_strs())
    }
}

fn as_object_id(name: &str, raw: &Value) -> Result<ObjectId, ParameterError> {
    let as_str = raw.as_str().ok_or_else(|| ParameterError::CoercionFailed {
        name: name.to_string(),
        reason: "expected a 24-character hex string".into(),
    })?;
    as_str.try_into().map_err(|e| ParameterError::CoercionFailed {
        name: name.to_string(),
        reason: format!("{e}"),
    })
}

/// Validates a single named parameter against the closed schema (§3, §4.4).
///
/// This is the only coercion path the template-binding engine is allowed to
/// use: a validator may accept a looser wire shape (e.g. a hex string for an
/// object id) but must reject anything it cannot unambiguously coerce.
pub fn validate_param(
    name: &str,
    raw: &Value,
    now: UnixTimestamp,
) -> Result<ParamValue, ParameterError> {
    match name {
        "patient_id" | "user_id" | "access_control_id" | "target_user_id" => {
            Ok(ParamValue::Oid(as_object_id(name, raw)?))
        }
        "access_control_path" => {
            let s = raw.as_str().ok_or_else(|| ParameterError::CoercionFailed {
                name: name.to_string(),
                reason: "expected a non-empty string".into(),
            })?;
            if s.is_empty() {
                return Err(ParameterError::CoercionFailed {
                    name: name.to_string(),
                    reason: "must be non-empty".into(),
                });
            }
            Ok(ParamValue::Str(s.to_string()))
        }
        "access_type" => {
            let values: Vec<String> = raw
                .as_array()
                .ok_or_else(|| ParameterError::CoercionFailed {
                    name: name.to_string(),
                    reason: "expected an array of permission strings".into(),
                })?
                .iter()
                .map(|v| {
                    v.as_str().map(str::to_string).ok_or_else(|| ParameterError::CoercionFailed {
                        name: name.to_string(),
                        reason: "permission entries must be strings".into(),
                    })
                })
                .collect::<Result<_, _>>()?;
            Ok(ParamValue::AccessType(AccessType::from_set(values)?))
        }
        "height_input" | "input_bp" => {
            let n = raw.as_f64().ok_or_else(|| ParameterError::CoercionFailed {
                name: name.to_string(),
                reason: "expected a finite real number".into(),
            })?;
            if !n.is_finite() {
                return Err(ParameterError::CoercionFailed {
                    name: name.to_string(),
                    reason: "must be finite".into(),
                });
            }
            Ok(ParamValue::Number(n))
        }
        "attestation" => {
            let b = raw.as_bool().ok_or_else(|| ParameterError::CoercionFailed {
                name: name.to_string(),
                reason: "expected a boolean".into(),
            })?;
            Ok(ParamValue::Bool(b))
        }
        "expiration" => {
            let secs = raw.as_u64().ok_or_else(|| ParameterError::CoercionFailed {
                name: name.to_string(),
                reason: "expected a Unix timestamp".into(),
            })?;
            let ts = UnixTimestamp(secs);
            if !ts.is_future(now) {
                return Err(ParameterError::NotFuture(name.to_string()));
            }
            Ok(ParamValue::Timestamp(ts))
        }
        other => Err(ParameterError::UnknownName(other.to_string())),
    }
}

/// A fully-validated parameter set, ready for template binding.
pub type Params = BTreeMap<String, ParamValue>;

/// Validates every entry of an inbound wire `params` object.
///
/// Rejects the object outright if it contains an `attestation` key: that
/// parameter is set by the DAP after authentication and mutual attestation,
/// never accepted from a caller (§3 invariant, §9 open question (c)).
pub fn parse_inbound_params(raw: &Value, now: UnixTimestamp) -> Result<Params, ParameterError> {
    let object = raw.as_object().ok_or_else(|| ParameterError::CoercionFailed {
        name: "params".into(),
        reason: "expected a JSON object".into(),
    })?;
    if object.contains_key("attestation") {
        return Err(ParameterError::AttestationNotAllowed);
    }
    object
        .iter()
        .map(|(name, value)| Ok((name.clone(), validate_param(name, value, now)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> UnixTimestamp {
        UnixTimestamp(1_700_000_000)
    }

    #[test]
    fn validates_object_id_from_hex_string() {
        let v = validate_param("patient_id", &json!("111111111111111111111111"), now()).unwrap();
        assert!(matches!(v, ParamValue::Oid(_)));
    }

    #[test]
    fn rejects_malformed_object_id() {
        assert!(validate_param("patient_id", &json!("not-hex"), now()).is_err());
    }

    #[test]
    fn rejects_unknown_parameter_name() {
        assert_eq!(
            validate_param("ssn", &json!("123"), now()),
            Err(ParameterError::UnknownName("ssn".into()))
        );
    }

    #[test]
    fn access_type_accepts_only_the_three_allowed_sets() {
        assert!(validate_param("access_type", &json!(["read"]), now()).is_ok());
        assert!(validate_param("access_type", &json!(["write"]), now()).is_ok());
        assert!(validate_param("access_type", &json!(["read", "write"]), now()).is_ok());
        assert!(validate_param("access_type", &json!(["read", "enclave"]), now()).is_err());
    }

    #[test]
    fn expiration_must_be_strictly_future() {
        assert!(validate_param("expiration", &json!(now().0 + 10), now()).is_ok());
        assert!(validate_param("expiration", &json!(now().0), now()).is_err());
        assert!(validate_param("expiration", &json!(now().0 - 10), now()).is_err());
    }

    #[test]
    fn inbound_params_reject_attestation_key() {
        let raw = json!({"patient_id": "111111111111111111111111", "attestation": true});
        assert_eq!(
            parse_inbound_params(&raw, now()),
            Err(ParameterError::AttestationNotAllowed)
        );
    }

    #[test]
    fn inbound_params_validate_every_entry() {
        let raw = json!({"patient_id": "111111111111111111111111"});
        let params = parse_inbound_params(&raw, now()).unwrap();
        assert!(matches!(params.get("patient_id"), Some(ParamValue::Oid(_))));
    }
}
