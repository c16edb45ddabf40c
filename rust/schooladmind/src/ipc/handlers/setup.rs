use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
pub enum SetupSection {
    Tree,
    Matrix,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "tree" => Some(Self::Tree),
            "matrix" => Some(Self::Matrix),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Tree => "setup.tree",
            Self::Matrix => "setup.matrix",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Tree => json!({
            "leafViewPrune": true,
            "adminViewPrune": false
        }),
        SetupSection::Matrix => json!({
            "includeGlobal": true,
            "includeTenantRoles": true
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Tree => match k.as_str() {
                "leafViewPrune" | "adminViewPrune" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown tree field: {}", k)),
            },
            SetupSection::Matrix => match k.as_str() {
                "includeGlobal" | "includeTenantRoles" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown matrix field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(
    conn: &rusqlite::Connection,
    section: SetupSection,
) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed stored values fall back to the defaults.
            if merge_section_patch(section, &mut current, saved_obj).is_err() {
                tracing::warn!(key = section.key(), "ignoring malformed stored setup section");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

/// Reads one boolean field of a section, defaults applied.
pub fn section_flag(
    conn: &rusqlite::Connection,
    section: SetupSection,
    field: &str,
) -> anyhow::Result<bool> {
    let v = load_section(conn, section)?;
    Ok(v.get(field).and_then(|b| b.as_bool()).unwrap_or(false))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let tree = match load_section(conn, SetupSection::Tree) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let matrix = match load_section(conn, SetupSection::Matrix) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "tree": tree,
            "matrix": matrix
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
