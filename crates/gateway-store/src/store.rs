//! The `Store` abstraction: a minimal, in-memory stand-in for the "black-box
//! aggregation engine" of §1, concrete enough to drive the release policy
//! end-to-end (§10.1).

use crate::expr::{eval_expr, EvalContext, Scope, StoreError};
use dashmap::DashMap;
use gateway_types::Query;
use serde_json::Value;

/// A named collection of JSON documents plus the pipeline runner.
///
/// Implementations are not expected to support arbitrary Mongo-style
/// aggregation — only the stage vocabulary the approved templates in this
/// gateway actually use (`$source`, `$match`, `$lookup`, `$addFields`,
/// `$project`).
pub trait Store: Send + Sync {
    fn collection(&self, name: &str) -> Result<Vec<Value>, StoreError>;

    fn run_pipeline(&self, pipeline: &Query, now: u64) -> Result<Vec<Value>, StoreError>;
}

/// A `dashmap`-backed in-memory store, seeded at startup and never persisted.
#[derive(Default)]
pub struct InMemoryStore {
    collections: DashMap<String, Vec<Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore { collections: DashMap::new() }
    }

    pub fn insert_collection(&self, name: impl Into<String>, docs: Vec<Value>) {
        self.collections.insert(name.into(), docs);
    }
}

impl Store for InMemoryStore {
    fn collection(&self, name: &str) -> Result<Vec<Value>, StoreError> {
        self.collections
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))
    }

    fn run_pipeline(&self, pipeline: &Query, now: u64) -> Result<Vec<Value>, StoreError> {
        let mut stages = pipeline.iter();
        let mut docs = match stages.next() {
            Some(Value::Object(map)) if map.contains_key("$source") => {
                let name = map["$source"]
                    .as_str()
                    .ok_or_else(|| StoreError::Malformed("$source must name a collection".into()))?;
                self.collection(name)?
            }
            Some(_) => return Err(StoreError::Malformed("pipeline must begin with $source".into())),
            None => return Ok(Vec::new()),
        };

        for stage in stages {
            docs = self.run_stage(stage, docs, now)?;
        }
        Ok(docs)
    }
}

impl InMemoryStore {
    fn run_stage(&self, stage: &Value, docs: Vec<Value>, now: u64) -> Result<Vec<Value>, StoreError> {
        let map = stage.as_object().ok_or_else(|| StoreError::Malformed("stage must be an object".into()))?;
        if let Some(spec) = map.get("$match") {
            return self.run_match(spec, docs);
        }
        if let Some(spec) = map.get("$lookup") {
            return self.run_lookup(spec, docs);
        }
        if let Some(spec) = map.get("$addFields") {
            return self.run_project(spec, docs, now, true);
        }
        if let Some(spec) = map.get("$project") {
            return self.run_project(spec, docs, now, false);
        }
        Err(StoreError::UnknownOperator(
            map.keys().next().cloned().unwrap_or_default(),
        ))
    }

    fn run_match(&self, spec: &Value, docs: Vec<Value>) -> Result<Vec<Value>, StoreError> {
        let filter = spec.as_object().ok_or_else(|| StoreError::Malformed("$match expects an object".into()))?;
        Ok(docs
            .into_iter()
            .filter(|doc| {
                filter.iter().all(|(field, expected)| {
                    doc.get(field).map(|actual| actual == expected).unwrap_or(false)
                })
            })
            .collect())
    }

    fn run_lookup(&self, spec: &Value, docs: Vec<Value>) -> Result<Vec<Value>, StoreError> {
        let map = spec.as_object().ok_or_else(|| StoreError::Malformed("$lookup expects an object".into()))?;
        let from = map.get("from").and_then(Value::as_str).ok_or_else(|| StoreError::Malformed("$lookup missing `from`".into()))?;
        let local_field = map.get("localField").and_then(Value::as_str).ok_or_else(|| StoreError::Malformed("$lookup missing `localField`".into()))?;
        let foreign_field = map.get("foreignField").and_then(Value::as_str).ok_or_else(|| StoreError::Malformed("$lookup missing `foreignField`".into()))?;
        let as_field = map.get("as").and_then(Value::as_str).ok_or_else(|| StoreError::Malformed("$lookup missing `as`".into()))?;

        let foreign_docs = self.collection(from)?;

        let mut out = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let local_value = get_path(&doc, local_field);
            let matched = foreign_docs
                .iter()
                .find(|candidate| get_path(candidate, foreign_field) == local_value)
                .cloned()
                .unwrap_or(Value::Null);
            if let Value::Object(map) = &mut doc {
                map.insert(as_field.to_string(), matched);
            }
            out.push(doc);
        }
        Ok(out)
    }

    fn run_project(
        &self,
        spec: &Value,
        docs: Vec<Value>,
        now: u64,
        additive: bool,
    ) -> Result<Vec<Value>, StoreError> {
        let fields = spec.as_object().ok_or_else(|| StoreError::Malformed("$project/$addFields expects an object".into()))?;
        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            let ctx = EvalContext { now };
            let vars = Scope::new();
            let mut result = if additive {
                doc.clone()
            } else {
                Value::Object(serde_json::Map::new())
            };
            let result_map = result
                .as_object_mut()
                .expect("projection target is always an object");
            for (field, expr) in fields {
                let value = eval_expr(expr, &doc, &vars, &ctx)?;
                result_map.insert(field.clone(), value);
            }
            out.push(result);
        }
        Ok(out)
    }
}

fn get_path(root: &Value, path: &str) -> Value {
    let mut cur = root;
    for segment in path.split('.') {
        match cur.get(segment) {
            Some(v) => cur = v,
            None => return Value::Null,
        }
    }
    cur.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AuthorizationRecord, AuthorizedUser, MetricValue, Permission, PatientRecord,
        COLLECTION_ACCESS_CONTROLS, COLLECTION_PATIENTS,
    };
    use gateway_types::ObjectId;
    use serde_json::json;

    fn oid(byte: u8) -> ObjectId {
        ObjectId::repeated(byte)
    }

    fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        let access = AuthorizationRecord {
            id: oid(0xAA),
            users: vec![AuthorizedUser::new(oid(0x0D), &[Permission::Read], 2_000_000_000)],
        };
        let patient = PatientRecord {
            id: oid(0x11),
            blood_pressure: MetricValue { value: 100.0, access_control: oid(0xAA) },
            height: MetricValue { value: 170.0, access_control: oid(0xAA) },
        };
        store.insert_collection(COLLECTION_ACCESS_CONTROLS, vec![access.to_json()]);
        store.insert_collection(COLLECTION_PATIENTS, vec![patient.to_json()]);
        store
    }

    #[test]
    fn match_and_lookup_join_by_id() {
        let store = seeded_store();
        let pipeline: Query = vec![
            json!({"$source": "patients"}),
            json!({"$match": {"_id": oid(0x11).to_string()}}),
            json!({"$lookup": {
                "from": "accessControls",
                "localField": "data.metrics.sensitiveMetrics.bloodPressure.accessControl",
                "foreignField": "_id",
                "as": "bpAccessControl"
            }}),
        ];
        let result = store.run_pipeline(&pipeline, 1_700_000_000).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0]["bpAccessControl"]["_id"], json!(oid(0xAA).to_string()));
    }

    #[test]
    fn unknown_source_collection_is_an_error() {
        let store = InMemoryStore::new();
        let pipeline: Query = vec![json!({"$source": "nope"})];
        assert!(store.run_pipeline(&pipeline, 0).is_err());
    }
}
