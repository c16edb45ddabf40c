use crate::ipc::error::{err, tree_err};
use crate::ipc::handlers::setup::{self, SetupSection};
use crate::ipc::helpers::{bad_params, db_failed, get_opt_bool, require_db, respond, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::tree::{self, TreeOptions, ROOT_PARENT_ID};
use rusqlite::OptionalExtension;
use serde_json::{json, Value};
use tracing::warn;

#[derive(Debug, Clone, Copy)]
enum TreeRoot {
    All,
    Category(i64),
    Tenant(i64),
}

fn parse_root(req: &Request) -> Result<TreeRoot, Value> {
    let Some(raw) = req.params.get("root") else {
        return Ok(TreeRoot::All);
    };
    match raw {
        Value::Null => Ok(TreeRoot::All),
        Value::String(s) if s == "all" => Ok(TreeRoot::All),
        Value::Object(obj) => {
            if let Some(id) = obj.get("categoryId").and_then(|v| v.as_i64()) {
                Ok(TreeRoot::Category(id))
            } else if let Some(id) = obj.get("tenantId").and_then(|v| v.as_i64()) {
                Ok(TreeRoot::Tenant(id))
            } else {
                Err(bad_params(req, "root must carry categoryId or tenantId"))
            }
        }
        _ => Err(bad_params(
            req,
            "root must be \"all\", {categoryId} or {tenantId}",
        )),
    }
}

fn default_prune(req: &Request, conn: &rusqlite::Connection) -> Result<bool, Value> {
    let field = match req.params.get("view").and_then(|v| v.as_str()) {
        None | Some("leaf") => "leafViewPrune",
        Some("admin") => "adminViewPrune",
        Some(other) => {
            return Err(bad_params(
                req,
                format!("view must be one of: leaf, admin (got {other})"),
            ))
        }
    };
    setup::section_flag(conn, SetupSection::Tree, field)
        .map_err(|e| db_failed(req, "db_query_failed", e))
}

fn handle_tree_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state, req)?;
    let root = parse_root(req)?;
    let prune = match get_opt_bool(req, "prune")? {
        Some(p) => p,
        None => default_prune(req, conn)?,
    };
    let assigned_only = get_opt_bool(req, "assignedOnly")?.unwrap_or(false);

    // Resolve a school root to its top category; a school without one sees
    // the whole forest.
    let (start, linked_to) = match root {
        TreeRoot::All => (None, None),
        TreeRoot::Category(id) => (Some(id), None),
        TreeRoot::Tenant(tenant_id) => {
            let top: Option<Option<i64>> = conn
                .query_row(
                    "SELECT top_category_id FROM tenants WHERE id = ?",
                    [tenant_id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(|e| db_failed(req, "db_query_failed", e))?;
            let Some(top) = top else {
                return Err(err(&req.id, "not_found", "tenant not found", None));
            };
            (top, assigned_only.then_some(tenant_id))
        }
    };
    if assigned_only && linked_to.is_none() {
        return Err(bad_params(req, "assignedOnly requires a tenant root"));
    }

    let categories =
        tree::load_categories(conn).map_err(|e| db_failed(req, "db_query_failed", e))?;
    let leaves =
        tree::load_courses(conn, linked_to).map_err(|e| db_failed(req, "db_query_failed", e))?;

    // A school pointing at a category that no longer exists falls back to
    // the whole forest, same as a school with no top category.
    let start = match (root, start) {
        (TreeRoot::Tenant(tenant_id), Some(id)) if !categories.iter().any(|c| c.id == id) => {
            warn!(
                tenant_id,
                top_category_id = id,
                "school top category is missing; showing the whole forest"
            );
            None
        }
        (_, start) => start,
    };

    let nodes = match start {
        None => tree::build_tree(
            &categories,
            &leaves,
            &TreeOptions {
                prune,
                root_parent_id: ROOT_PARENT_ID,
            },
        ),
        Some(category_id) => {
            if !categories.iter().any(|c| c.id == category_id) {
                return Err(err(
                    &req.id,
                    "not_found",
                    "category not found",
                    Some(json!({ "categoryId": category_id })),
                ));
            }
            tree::build_subtree(&categories, &leaves, category_id, prune)
        }
    }
    .map_err(|e| tree_err(&req.id, &e))?;

    Ok(json!({
        "prune": prune,
        "nodes": nodes,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let outcome = match req.method.as_str() {
        "tree.get" => handle_tree_get(state, req),
        _ => return None,
    };
    Some(respond(req, outcome))
}
