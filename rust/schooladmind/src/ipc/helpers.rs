use rusqlite::Connection;
use serde_json::Value;

use crate::access::RoleClass;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

/// Handler outcome: the `result` payload, or a finished error response.
pub type HandlerResult = Result<Value, Value>;

pub fn respond(req: &Request, outcome: HandlerResult) -> Value {
    match outcome {
        Ok(result) => ok(&req.id, result),
        Err(resp) => resp,
    }
}

pub fn require_db<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn bad_params(req: &Request, message: impl Into<String>) -> Value {
    err(&req.id, "bad_params", message, None)
}

pub fn db_failed(req: &Request, code: &str, e: impl std::fmt::Display) -> Value {
    tracing::error!(method = %req.method, code, error = %e, "database call failed");
    err(&req.id, code, e.to_string(), None)
}

/// Failure that is not the caller's fault and not the database's, e.g. a
/// response that could not be serialized.
pub fn internal_failed(req: &Request, e: impl std::fmt::Display) -> Value {
    tracing::error!(method = %req.method, error = %e, "internal failure");
    err(&req.id, "internal", e.to_string(), None)
}

pub fn get_str<'a>(req: &'a Request, key: &str) -> Result<&'a str, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| bad_params(req, format!("missing {}", key)))
}

pub fn get_i64(req: &Request, key: &str) -> Result<i64, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| bad_params(req, format!("missing {}", key)))
}

/// Absent and `null` both read as `None`.
pub fn get_opt_i64(req: &Request, key: &str) -> Result<Option<i64>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| bad_params(req, format!("{} must be integer", key))),
    }
}

pub fn get_opt_bool(req: &Request, key: &str) -> Result<Option<bool>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| bad_params(req, format!("{} must be boolean", key))),
    }
}

pub fn get_opt_role(req: &Request, key: &str) -> Result<Option<RoleClass>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .and_then(RoleClass::parse)
            .map(Some)
            .ok_or_else(|| bad_params(req, format!("{} must be one of: teacher, student", key))),
    }
}

pub fn get_i64_list(req: &Request, key: &str) -> Result<Vec<i64>, Value> {
    let Some(items) = req.params.get(key).and_then(|v| v.as_array()) else {
        return Err(bad_params(req, format!("{} must be an array", key)));
    };
    items
        .iter()
        .map(|v| {
            v.as_i64()
                .ok_or_else(|| bad_params(req, format!("{} must contain integers", key)))
        })
        .collect()
}
