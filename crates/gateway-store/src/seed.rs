//! Concrete seed data and approved pipelines for the §8 end-to-end scenarios,
//! grounded on `populate.py`'s `get_bp`/`get_height` shape and the §10.6
//! population-mean follow-up (§10.6 "Supplemented features").
//!
//! The release policy lives entirely inside these pipeline documents, never
//! in Rust `if`/`else` — that is the point of §4.2's closing paragraph.

use crate::model::{
    AuthorizationRecord, AuthorizedUser, MetricValue, Permission, PatientRecord, UserRecord,
    COLLECTION_ACCESS_CONTROLS, COLLECTION_PATIENTS, COLLECTION_POPULATION_STATS,
    COLLECTION_USERS,
};
use crate::registry::PipelineRegistry;
use crate::store::{InMemoryStore, Store};
use gateway_types::query::ApprovedPipeline;
use gateway_types::ObjectId;
use serde_json::{json, Value};

pub const ROUTE_GET_BP: &str = "get_bp";
pub const ROUTE_GET_HEIGHT: &str = "get_height";
pub const ROUTE_IS_BP_ABOVE_MEAN: &str = "is_bp_above_mean";

/// Builds the `$project` field expression implementing the four-way release
/// policy of §4.2 for one metric: owner / unexpired-read / unexpired-enclave
/// with attestation / sentinel / null.
fn release_policy_expr(value_path: &str, access_control_field: &str) -> Value {
    let has_permission = |permission: &str| {
        json!({"$gt": [
            {"$size": {"$filter": {
                "input": format!("${access_control_field}.users"),
                "as": "u",
                "cond": {"$and": [
                    {"$eq": ["$$u.userId", "$user_id"]},
                    {"$in": [permission, "$$u.permissions"]},
                    {"$gt": ["$$u.expiration", "$$NOW"]},
                ]}
            }}},
            0,
        ]})
    };

    json!({
        "$let": {
            "vars": {
                "hasRead": has_permission("read"),
                "hasEnclave": has_permission("enclave"),
            },
            "in": {
                "$cond": [
                    {"$eq": ["$_id", "$user_id"]},
                    value_path,
                    {"$cond": [
                        "$$hasRead",
                        value_path,
                        {"$cond": [
                            {"$and": ["$$hasEnclave", {"$eq": ["$attestation", true]}]},
                            value_path,
                            {"$cond": [
                                {"$and": ["$$hasEnclave", {"$eq": ["$attestation", false]}]},
                                "attestation required",
                                Value::Null,
                            ]}
                        ]}
                    ]}
                ]
            }
        }
    })
}

fn metric_pipeline(metric_field: &str, output_field: &str) -> Vec<Value> {
    let access_field = format!("{metric_field}AccessControl");
    vec![
        json!({"$source": COLLECTION_PATIENTS}),
        json!({"$match": {"_id": "$patient_id"}}),
        json!({"$lookup": {
            "from": COLLECTION_ACCESS_CONTROLS,
            "localField": format!("data.metrics.sensitiveMetrics.{metric_field}.accessControl"),
            "foreignField": "_id",
            "as": access_field,
        }}),
        json!({"$project": {
            output_field: release_policy_expr(
                &format!("$data.metrics.sensitiveMetrics.{metric_field}.value"),
                &access_field,
            )
        }}),
    ]
}

fn is_bp_above_mean_pipeline() -> Vec<Value> {
    vec![
        json!({"$source": COLLECTION_POPULATION_STATS}),
        json!({"$match": {"_id": "bp_mean"}}),
        json!({"$project": {
            "result": {"$cond": [
                {"$gt": ["$input_bp", "$mean"]},
                1,
                {"$cond": [{"$eq": ["$input_bp", "$mean"]}, 0, -1]}
            ]}
        }}),
    ]
}

/// The users named in §8's worked scenarios: `P` (patient/owner), `D`
/// (doctor, unexpired `read`), `E` (external party, unexpired `enclave`
/// only).
pub struct ScenarioUsers {
    pub patient_id: ObjectId,
    pub doctor_id: ObjectId,
    pub external_id: ObjectId,
}

/// Builds the in-memory store and pipeline registry seeded with the §8
/// scenario: patient `P` has `bloodPressure=100.0`; `D` holds unexpired
/// `read`; `E` holds unexpired `enclave` only; the population mean is below
/// `P`'s reading, so scenario 5's follow-up yields `1`.
pub fn build_seed() -> (InMemoryStore, PipelineRegistry, ScenarioUsers) {
    let patient_id = ObjectId::repeated(0x11);
    let doctor_id = ObjectId::repeated(0x00);
    let external_id = ObjectId::repeated(0xee);
    let access_control_id = ObjectId::repeated(0xaa);

    let store = InMemoryStore::new();

    let access = AuthorizationRecord {
        id: access_control_id,
        users: vec![
            AuthorizedUser::new(doctor_id, &[Permission::Read], 2_000_000_000),
            AuthorizedUser::new(external_id, &[Permission::Enclave], 2_000_000_000),
        ],
    };
    let patient = PatientRecord {
        id: patient_id,
        blood_pressure: MetricValue { value: 100.0, access_control: access_control_id },
        height: MetricValue { value: 170.0, access_control: access_control_id },
    };
    let users = vec![
        UserRecord { id: patient_id, username: "P".to_string(), password: "patient-pass".to_string() },
        UserRecord { id: doctor_id, username: "D".to_string(), password: "doctor-pass".to_string() },
        UserRecord { id: external_id, username: "E".to_string(), password: "external-pass".to_string() },
    ];

    store.insert_collection(COLLECTION_ACCESS_CONTROLS, vec![access.to_json()]);
    store.insert_collection(COLLECTION_PATIENTS, vec![patient.to_json()]);
    store.insert_collection(COLLECTION_USERS, users.iter().map(UserRecord::to_json).collect());
    store.insert_collection(
        COLLECTION_POPULATION_STATS,
        vec![json!({"_id": "bp_mean", "mean": 98.6})],
    );

    let mut registry = PipelineRegistry::new();
    registry.register(ApprovedPipeline::new(ROUTE_GET_BP, metric_pipeline("bloodPressure", "bp")));
    registry.register(ApprovedPipeline::new(ROUTE_GET_HEIGHT, metric_pipeline("height", "height")));
    registry.register(ApprovedPipeline::new(ROUTE_IS_BP_ABOVE_MEAN, is_bp_above_mean_pipeline()));

    (store, registry, ScenarioUsers { patient_id, doctor_id, external_id })
}

/// Builds the PI's own restricted store and registry (§4.3 "Follow-up
/// computation", §10.6 resolved open question): a population-statistics
/// view with no patient-identifying fields, plus the one approved follow-up
/// pipeline the PI itself loads and is attested on. The PI never holds the
/// `patients`, `accessControls`, or `users` collections the DAP does.
pub fn build_pi_store() -> (InMemoryStore, PipelineRegistry) {
    let store = InMemoryStore::new();
    store.insert_collection(
        COLLECTION_POPULATION_STATS,
        vec![json!({"_id": "bp_mean", "mean": 98.6})],
    );

    let mut registry = PipelineRegistry::new();
    registry.register(ApprovedPipeline::new(ROUTE_IS_BP_ABOVE_MEAN, is_bp_above_mean_pipeline()));

    (store, registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::params::{validate_param, Params};
    use gateway_types::template::bind;
    use gateway_types::UnixTimestamp;
    use serde_json::json;

    fn params(entries: &[(&str, Value)], now: UnixTimestamp) -> Params {
        entries
            .iter()
            .map(|(name, raw)| (name.to_string(), validate_param(name, raw, now).unwrap()))
            .collect()
    }

    #[test]
    fn owner_reads_their_own_blood_pressure() {
        let (store, registry, users) = build_seed();
        let now = UnixTimestamp(1_700_000_000);
        let template = registry.get(ROUTE_GET_BP).unwrap();
        let bound = bind(
            &template.pipeline,
            &params(
                &[
                    ("patient_id", json!(users.patient_id.to_string())),
                    ("user_id", json!(users.patient_id.to_string())),
                    ("attestation", json!(false)),
                ],
                now,
            ),
        )
        .unwrap();
        let result = store.run_pipeline(&bound, now.0).unwrap();
        assert_eq!(result[0]["bp"], json!(100.0));
    }

    #[test]
    fn doctor_with_unexpired_read_is_released_without_attestation() {
        let (store, registry, users) = build_seed();
        let now = UnixTimestamp(1_700_000_000);
        let template = registry.get(ROUTE_GET_BP).unwrap();
        let bound = bind(
            &template.pipeline,
            &params(
                &[
                    ("patient_id", json!(users.patient_id.to_string())),
                    ("user_id", json!(users.doctor_id.to_string())),
                    ("attestation", json!(false)),
                ],
                now,
            ),
        )
        .unwrap();
        let result = store.run_pipeline(&bound, now.0).unwrap();
        assert_eq!(result[0]["bp"], json!(100.0));
    }

    #[test]
    fn external_enclave_user_without_attestation_yields_sentinel() {
        let (store, registry, users) = build_seed();
        let now = UnixTimestamp(1_700_000_000);
        let template = registry.get(ROUTE_GET_BP).unwrap();
        let bound = bind(
            &template.pipeline,
            &params(
                &[
                    ("patient_id", json!(users.patient_id.to_string())),
                    ("user_id", json!(users.external_id.to_string())),
                    ("attestation", json!(false)),
                ],
                now,
            ),
        )
        .unwrap();
        let result = store.run_pipeline(&bound, now.0).unwrap();
        assert_eq!(result[0]["bp"], json!("attestation required"));
    }

    #[test]
    fn external_enclave_user_with_attestation_is_released() {
        let (store, registry, users) = build_seed();
        let now = UnixTimestamp(1_700_000_000);
        let template = registry.get(ROUTE_GET_BP).unwrap();
        let bound = bind(
            &template.pipeline,
            &params(
                &[
                    ("patient_id", json!(users.patient_id.to_string())),
                    ("user_id", json!(users.external_id.to_string())),
                    ("attestation", json!(true)),
                ],
                now,
            ),
        )
        .unwrap();
        let result = store.run_pipeline(&bound, now.0).unwrap();
        assert_eq!(result[0]["bp"], json!(100.0));
    }

    #[test]
    fn user_with_no_authorization_gets_null() {
        let (store, registry, users) = build_seed();
        let now = UnixTimestamp(1_700_000_000);
        let stranger = ObjectId::repeated(0x55);
        let template = registry.get(ROUTE_GET_BP).unwrap();
        let bound = bind(
            &template.pipeline,
            &params(
                &[
                    ("patient_id", json!(users.patient_id.to_string())),
                    ("user_id", json!(stranger.to_string())),
                    ("attestation", json!(false)),
                ],
                now,
            ),
        )
        .unwrap();
        let result = store.run_pipeline(&bound, now.0).unwrap();
        assert_eq!(result[0]["bp"], Value::Null);
    }

    #[test]
    fn is_bp_above_mean_compares_released_value_to_population_mean() {
        let (store, registry, _users) = build_seed();
        let now = UnixTimestamp(1_700_000_000);
        let template = registry.get(ROUTE_IS_BP_ABOVE_MEAN).unwrap();
        let bound = bind(
            &template.pipeline,
            &params(&[("input_bp", json!(100.0))], now),
        )
        .unwrap();
        let result = store.run_pipeline(&bound, now.0).unwrap();
        assert_eq!(result[0]["result"], json!(1));
    }

    #[test]
    fn pi_store_carries_no_patient_identifying_collections() {
        let (store, registry) = build_pi_store();
        assert!(store.collection(COLLECTION_POPULATION_STATS).is_ok());
        assert!(store.collection(COLLECTION_PATIENTS).is_err());
        assert!(store.collection(COLLECTION_USERS).is_err());
        assert!(registry.get(ROUTE_IS_BP_ABOVE_MEAN).is_ok());
        assert!(registry.get(ROUTE_GET_BP).is_err());
    }
}
