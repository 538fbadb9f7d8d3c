//! Document shapes seeded into the reference store (§3 "Authorization record",
//! §10.6 population-statistics view).
//!
//! These are convenience constructors for seed data only. Once a document is
//! inserted into a [`crate::store::InMemoryStore`] collection it is plain
//! `serde_json::Value`; the pipeline evaluator never downcasts back to these
//! types. That mirrors the real aggregation engine the spec treats as a
//! black box — Rust-side structure ends at the store's front door.

use gateway_types::ObjectId;
use serde::Serialize;
use serde_json::{json, Value};

/// The three authorization grants an authorized user entry can carry (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Enclave,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Enclave => "enclave",
        }
    }
}

/// One entry of an authorization record's `users` array.
#[derive(Debug, Clone)]
pub struct AuthorizedUser {
    pub user_id: ObjectId,
    pub permissions: Vec<Permission>,
    pub expiration: u64,
}

impl AuthorizedUser {
    pub fn new(user_id: ObjectId, permissions: &[Permission], expiration: u64) -> Self {
        AuthorizedUser {
            user_id,
            permissions: permissions.to_vec(),
            expiration,
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "userId": self.user_id.to_string(),
            "permissions": self.permissions.iter().map(Permission::as_str).collect::<Vec<_>>(),
            "expiration": self.expiration,
        })
    }
}

/// `{ _id, users: [...] }` (§3).
#[derive(Debug, Clone)]
pub struct AuthorizationRecord {
    pub id: ObjectId,
    pub users: Vec<AuthorizedUser>,
}

impl AuthorizationRecord {
    pub fn to_json(&self) -> Value {
        json!({
            "_id": self.id.to_string(),
            "users": self.users.iter().map(AuthorizedUser::to_json).collect::<Vec<_>>(),
        })
    }
}

/// A user-record entry the DAP's authentication step looks up by username.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: ObjectId,
    pub username: String,
    pub password: String,
}

impl UserRecord {
    pub fn to_json(&self) -> Value {
        json!({
            "_id": self.id.to_string(),
            "username": self.username,
            "password": self.password,
        })
    }
}

/// A patient document carrying one metric's value alongside the id of the
/// authorization record that governs its release.
#[derive(Debug, Clone)]
pub struct MetricValue {
    pub value: f64,
    pub access_control: ObjectId,
}

impl MetricValue {
    fn to_json(&self) -> Value {
        json!({
            "value": self.value,
            "accessControl": self.access_control.to_string(),
        })
    }
}

/// `patients` collection document (§10.6, grounded on `populate.py`'s document shape).
#[derive(Debug, Clone)]
pub struct PatientRecord {
    /// Also the owning user's id: a patient is the owner of their own record.
    pub id: ObjectId,
    pub blood_pressure: MetricValue,
    pub height: MetricValue,
}

impl PatientRecord {
    pub fn to_json(&self) -> Value {
        json!({
            "_id": self.id.to_string(),
            "data": {
                "metrics": {
                    "sensitiveMetrics": {
                        "bloodPressure": self.blood_pressure.to_json(),
                        "height": self.height.to_json(),
                    }
                }
            }
        })
    }
}

pub const COLLECTION_PATIENTS: &str = "patients";
pub const COLLECTION_ACCESS_CONTROLS: &str = "accessControls";
pub const COLLECTION_USERS: &str = "users";
pub const COLLECTION_POPULATION_STATS: &str = "populationStats";
