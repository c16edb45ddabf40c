use serde_json::json;

use crate::access::AccessError;
use crate::tree::TreeError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn access_err(id: &str, e: &AccessError) -> serde_json::Value {
    err(id, e.code(), e.to_string(), None)
}

pub fn tree_err(id: &str, e: &TreeError) -> serde_json::Value {
    let details = match e {
        TreeError::CyclicHierarchy { category_id } => json!({ "categoryId": category_id }),
    };
    err(id, e.code(), e.to_string(), Some(details))
}
