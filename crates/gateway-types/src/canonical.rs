//! The byte-deterministic pipeline encoder attestation binds to (§4.1, §9).
//!
//! Both the Verifier and the attested peer MUST agree on the exact bytes a
//! pipeline hashes to. This module is the single place that encoding is
//! defined: the minified (no insignificant whitespace) JSON representation,
//! with object keys in the order they were inserted into the document as
//! stored in the approved-pipeline registry. `gateway-types` depends on
//! `serde_json`'s `preserve_order` feature so that `serde_json::Value`
//! objects remember insertion order end to end — without it, `serde_json`
//! would silently re-sort keys alphabetically through its `BTreeMap`
//! backing and every attestation would break the moment a pipeline document
//! had more than one key in a non-alphabetical order.

use crate::query::Query;
use serde::Serialize;

/// Encodes a value as compact, order-preserving JSON.
///
/// This is used both for pipeline documents (§4.1) and for the attestation
/// payload itself (§6 "serialized as compact JSON with stable key ordering").
pub fn canonical_json<T: Serialize>(value: &T) -> String {
    // serde_json::to_string never inserts the whitespace `to_string_pretty` does,
    // and with `preserve_order` enabled it walks maps in insertion order.
    serde_json::to_string(value).expect("canonical encoding of a well-formed document never fails")
}

/// Encodes an approved pipeline's stage list — the exact bytes the Verifier
/// hashes when computing the expected `loaded_pipeline_claim` (§4.1 step 4).
pub fn canonical_pipeline(pipeline: &Query) -> String {
    canonical_json(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn is_compact_and_order_preserving() {
        let pipeline: Query = vec![json!({"b_first": 1, "a_second": 2})];
        let encoded = canonical_pipeline(&pipeline);
        assert_eq!(encoded, r#"[{"b_first":1,"a_second":2}]"#);
    }

    #[test]
    fn is_deterministic_for_the_same_document() {
        let pipeline: Query = vec![json!({"$match": {"patientId": "$patient_id"}})];
        assert_eq!(canonical_pipeline(&pipeline), canonical_pipeline(&pipeline));
    }

    #[test]
    fn a_single_mutated_byte_changes_the_encoding() {
        let original: Query = vec![json!({"$match": {"patientId": "$patient_id"}})];
        let mut mutated = original.clone();
        mutated[0]["$match"]["patientId"] = json!("$other_param");
        assert_ne!(canonical_pipeline(&original), canonical_pipeline(&mutated));
    }
}
