use crate::ipc::error::err;
use crate::ipc::helpers::{db_failed, get_i64, get_i64_list, require_db, respond, HandlerResult};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::info;

fn ensure_tenant(conn: &Connection, req: &Request, tenant_id: i64) -> Result<(), Value> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM tenants WHERE id = ?", [tenant_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| db_failed(req, "db_query_failed", e))?;
    if found.is_none() {
        return Err(err(&req.id, "not_found", "tenant not found", None));
    }
    Ok(())
}

/// Request ids with duplicates collapsed, in ascending order.
fn unique_ids(req: &Request) -> Result<Vec<i64>, Value> {
    let ids: BTreeSet<i64> = get_i64_list(req, "courseIds")?.into_iter().collect();
    Ok(ids.into_iter().collect())
}

fn handle_assign(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state, req)?;
    let tenant_id = get_i64(req, "tenantId")?;
    let course_ids = unique_ids(req)?;
    ensure_tenant(conn, req, tenant_id)?;

    let mut missing = Vec::new();
    for &id in &course_ids {
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM courses WHERE id = ?", [id], |r| r.get(0))
            .optional()
            .map_err(|e| db_failed(req, "db_query_failed", e))?;
        if found.is_none() {
            missing.push(id);
        }
    }
    if !missing.is_empty() {
        return Err(err(
            &req.id,
            "not_found",
            "course not found",
            Some(json!({ "courseIds": missing })),
        ));
    }

    // Linking is a set operation: a repeated assignment is reported, not duplicated.
    let link = || -> anyhow::Result<(Vec<i64>, Vec<i64>)> {
        let tx = conn.unchecked_transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut linked = Vec::new();
        let mut already = Vec::new();
        for &id in &course_ids {
            let n = tx.execute(
                "INSERT OR IGNORE INTO tenant_courses(tenant_id, course_id, linked_at) VALUES(?, ?, ?)",
                (tenant_id, id, &now),
            )?;
            if n == 1 {
                linked.push(id);
            } else {
                already.push(id);
            }
        }
        tx.commit()?;
        Ok((linked, already))
    };
    let (linked, already) = link().map_err(|e| db_failed(req, "db_update_failed", e))?;
    info!(
        tenant_id,
        linked = linked.len(),
        already_linked = already.len(),
        "courses assigned to school"
    );
    Ok(json!({ "linked": linked, "alreadyLinked": already }))
}

fn handle_unassign(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state, req)?;
    let tenant_id = get_i64(req, "tenantId")?;
    let course_ids = unique_ids(req)?;
    ensure_tenant(conn, req, tenant_id)?;

    let unlink = || -> anyhow::Result<usize> {
        let tx = conn.unchecked_transaction()?;
        let mut removed = 0;
        for &id in &course_ids {
            removed += tx.execute(
                "DELETE FROM tenant_courses WHERE tenant_id = ? AND course_id = ?",
                (tenant_id, id),
            )?;
        }
        tx.commit()?;
        Ok(removed)
    };
    let removed = unlink().map_err(|e| db_failed(req, "db_update_failed", e))?;
    info!(tenant_id, removed, "courses unassigned from school");
    Ok(json!({ "removed": removed }))
}

fn handle_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state, req)?;
    let tenant_id = get_i64(req, "tenantId")?;
    ensure_tenant(conn, req, tenant_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.full_name, c.short_name, c.category_id, tc.linked_at
             FROM tenant_courses tc
             JOIN courses c ON c.id = tc.course_id
             WHERE tc.tenant_id = ?
             ORDER BY c.full_name, c.id",
        )
        .map_err(|e| db_failed(req, "db_query_failed", e))?;
    let courses = stmt
        .query_map([tenant_id], |row| {
            Ok(json!({
                "id": row.get::<_, i64>(0)?,
                "fullName": row.get::<_, String>(1)?,
                "shortName": row.get::<_, Option<String>>(2)?,
                "categoryId": row.get::<_, i64>(3)?,
                "linkedAt": row.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_failed(req, "db_query_failed", e))?;
    Ok(json!({ "tenantId": tenant_id, "courses": courses }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let outcome = match req.method.as_str() {
        "schoolCourses.assign" => handle_assign(state, req),
        "schoolCourses.unassign" => handle_unassign(state, req),
        "schoolCourses.list" => handle_list(state, req),
        _ => return None,
    };
    Some(respond(req, outcome))
}
