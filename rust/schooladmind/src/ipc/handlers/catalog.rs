use crate::access::{Feature, Group, Tenant};
use crate::ipc::helpers::{
    bad_params, db_failed, get_i64, require_db, respond, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::tree::CategoryNode;
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CourseRow {
    id: i64,
    category_id: i64,
    full_name: String,
    #[serde(default)]
    short_name: Option<String>,
    #[serde(default = "default_visible")]
    visible: bool,
}

fn default_visible() -> bool {
    true
}

/// Rows fetched from the host LMS. Every row must deserialize into its typed
/// record before anything is written.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogImport {
    #[serde(default)]
    features: Vec<Feature>,
    #[serde(default)]
    tenants: Vec<Tenant>,
    #[serde(default)]
    groups: Vec<Group>,
    #[serde(default)]
    categories: Vec<CategoryNode>,
    #[serde(default)]
    courses: Vec<CourseRow>,
}

impl CatalogImport {
    fn validate(&self) -> Result<(), String> {
        for f in &self.features {
            if f.id.trim().is_empty() {
                return Err("feature id must not be empty".into());
            }
            if f.name.trim().is_empty() {
                return Err(format!("feature {} has an empty name", f.id));
            }
        }
        for t in &self.tenants {
            if t.name.trim().is_empty() {
                return Err(format!("tenant {} has an empty name", t.id));
            }
        }
        for g in &self.groups {
            if g.name.trim().is_empty() {
                return Err(format!("group {} has an empty name", g.id));
            }
        }
        for c in &self.categories {
            if c.name.trim().is_empty() {
                return Err(format!("category {} has an empty name", c.id));
            }
        }
        for c in &self.courses {
            if c.full_name.trim().is_empty() {
                return Err(format!("course {} has an empty name", c.id));
            }
        }
        Ok(())
    }
}

fn tenant_exists(conn: &Connection, tenant_id: i64) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM tenants WHERE id = ?", [tenant_id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

fn write_import(conn: &Connection, import: &CatalogImport) -> anyhow::Result<Result<(), String>> {
    let tx = conn.unchecked_transaction()?;

    for f in &import.features {
        tx.execute(
            "INSERT INTO features(id, name, default_enabled, sort_order) VALUES(?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               default_enabled = excluded.default_enabled,
               sort_order = excluded.sort_order",
            (f.id.trim(), f.name.trim(), f.default_enabled as i64, f.sort_order),
        )?;
    }
    for t in &import.tenants {
        tx.execute(
            "INSERT INTO tenants(id, name, short_name, top_category_id) VALUES(?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               short_name = excluded.short_name,
               top_category_id = excluded.top_category_id",
            (t.id, t.name.trim(), &t.short_name, t.top_category_id),
        )?;
    }
    for g in &import.groups {
        if !tenant_exists(&tx, g.tenant_id)? {
            // Dropping the transaction rolls back everything written so far.
            return Ok(Err(format!(
                "group {} references unknown tenant {}",
                g.id, g.tenant_id
            )));
        }
        tx.execute(
            "INSERT INTO cohorts(id, tenant_id, name) VALUES(?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET tenant_id = excluded.tenant_id, name = excluded.name",
            (g.id, g.tenant_id, g.name.trim()),
        )?;
    }
    for c in &import.categories {
        tx.execute(
            "INSERT INTO categories(id, name, parent_id, sort_order) VALUES(?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               parent_id = excluded.parent_id,
               sort_order = excluded.sort_order",
            (c.id, c.name.trim(), c.parent_id, c.sort_order),
        )?;
    }
    for c in &import.courses {
        tx.execute(
            "INSERT INTO courses(id, category_id, full_name, short_name, visible) VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               category_id = excluded.category_id,
               full_name = excluded.full_name,
               short_name = excluded.short_name,
               visible = excluded.visible",
            (
                c.id,
                c.category_id,
                c.full_name.trim(),
                &c.short_name,
                c.visible as i64,
            ),
        )?;
    }

    tx.commit()?;
    Ok(Ok(()))
}

fn handle_catalog_import(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state, req)?;
    let raw = if req.params.is_null() {
        json!({})
    } else {
        req.params.clone()
    };
    let import: CatalogImport = serde_json::from_value(raw)
        .map_err(|e| bad_params(req, format!("invalid catalog rows: {}", e)))?;
    import.validate().map_err(|msg| bad_params(req, msg))?;

    match write_import(conn, &import) {
        Ok(Ok(())) => {}
        Ok(Err(msg)) => return Err(bad_params(req, msg)),
        Err(e) => return Err(db_failed(req, "db_update_failed", e)),
    }

    info!(
        features = import.features.len(),
        tenants = import.tenants.len(),
        groups = import.groups.len(),
        categories = import.categories.len(),
        courses = import.courses.len(),
        "catalog rows imported"
    );
    Ok(json!({
        "features": import.features.len(),
        "tenants": import.tenants.len(),
        "groups": import.groups.len(),
        "categories": import.categories.len(),
        "courses": import.courses.len(),
    }))
}

fn handle_features_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state, req)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, name, default_enabled, sort_order
             FROM features
             ORDER BY sort_order, id",
        )
        .map_err(|e| db_failed(req, "db_query_failed", e))?;
    let features = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "defaultEnabled": row.get::<_, i64>(2)? != 0,
                "sortOrder": row.get::<_, i64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_failed(req, "db_query_failed", e))?;
    Ok(json!({ "features": features }))
}

fn handle_tenants_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state, req)?;
    // Correlated subqueries keep the counts independent of each other.
    let mut stmt = conn
        .prepare(
            "SELECT
               t.id,
               t.name,
               t.short_name,
               t.top_category_id,
               (SELECT COUNT(*) FROM cohorts c WHERE c.tenant_id = t.id) AS group_count,
               (SELECT COUNT(*) FROM tenant_courses tc WHERE tc.tenant_id = t.id) AS course_count
             FROM tenants t
             ORDER BY t.name, t.id",
        )
        .map_err(|e| db_failed(req, "db_query_failed", e))?;
    let tenants = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, i64>(0)?,
                "name": row.get::<_, String>(1)?,
                "shortName": row.get::<_, Option<String>>(2)?,
                "topCategoryId": row.get::<_, Option<i64>>(3)?,
                "groupCount": row.get::<_, i64>(4)?,
                "courseCount": row.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_failed(req, "db_query_failed", e))?;
    Ok(json!({ "tenants": tenants }))
}

fn handle_groups_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state, req)?;
    let tenant_id = get_i64(req, "tenantId")?;
    if !tenant_exists(conn, tenant_id).map_err(|e| db_failed(req, "db_query_failed", e))? {
        return Err(crate::ipc::error::err(
            &req.id,
            "not_found",
            "tenant not found",
            None,
        ));
    }
    let mut stmt = conn
        .prepare("SELECT id, name FROM cohorts WHERE tenant_id = ? ORDER BY name, id")
        .map_err(|e| db_failed(req, "db_query_failed", e))?;
    let groups = stmt
        .query_map([tenant_id], |row| {
            Ok(json!({
                "id": row.get::<_, i64>(0)?,
                "tenantId": tenant_id,
                "name": row.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_failed(req, "db_query_failed", e))?;
    Ok(json!({ "groups": groups }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let outcome = match req.method.as_str() {
        "catalog.import" => handle_catalog_import(state, req),
        "features.list" => handle_features_list(state, req),
        "tenants.list" => handle_tenants_list(state, req),
        "groups.list" => handle_groups_list(state, req),
        _ => return None,
    };
    Some(respond(req, outcome))
}
