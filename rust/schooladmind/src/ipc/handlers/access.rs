use crate::access::{self, AccessError, AccessSnapshot, RoleClass};
use crate::ipc::error::access_err;
use crate::ipc::handlers::setup::{self, SetupSection};
use crate::ipc::helpers::{
    bad_params, db_failed, get_i64, get_opt_i64, get_opt_role, get_str, internal_failed, require_db,
    respond, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::Value;
use tracing::info;

fn load_snapshot(conn: &Connection, req: &Request) -> Result<AccessSnapshot, Value> {
    AccessSnapshot::load(conn).map_err(|e| db_failed(req, "db_query_failed", e))
}

fn matrix_json(
    conn: &Connection,
    snap: &AccessSnapshot,
    req: &Request,
    tenant_id: Option<i64>,
) -> HandlerResult {
    let matrix = snap
        .build_matrix(tenant_id)
        .map_err(|e| access_err(&req.id, &e))?;
    let mut out = serde_json::to_value(&matrix).map_err(|e| internal_failed(req, e))?;

    let flag = |field: &str| {
        setup::section_flag(conn, SetupSection::Matrix, field)
            .map_err(|e| db_failed(req, "db_query_failed", e))
    };
    let include_global = flag("includeGlobal")?;
    let include_tenant_roles = flag("includeTenantRoles")?;
    if include_global && include_tenant_roles {
        return Ok(out);
    }
    if let Some(rows) = out.get_mut("features").and_then(|v| v.as_array_mut()) {
        for row in rows {
            let Some(row) = row.as_object_mut() else {
                continue;
            };
            if !include_global {
                row.remove("global");
            }
            if include_tenant_roles {
                continue;
            }
            if let Some(columns) = row.get_mut("tenants").and_then(|v| v.as_array_mut()) {
                for column in columns.iter_mut().filter_map(|c| c.as_object_mut()) {
                    column.remove("roles");
                }
            }
        }
    }
    Ok(out)
}

/// Maps `scope` + `scopeId` onto the (tenant, group) pair the resolver
/// understands. A cohort's school is looked up from the snapshot.
fn scope_ids(
    snap: &AccessSnapshot,
    req: &Request,
) -> Result<(Option<i64>, Option<i64>), Value> {
    match get_str(req, "scope")? {
        "global" => Ok((None, None)),
        "tenant" => Ok((Some(get_i64(req, "scopeId")?), None)),
        "group" => {
            let group_id = get_i64(req, "scopeId")?;
            let group = snap.group(group_id).ok_or_else(|| {
                access_err(
                    &req.id,
                    &AccessError::InvalidScope(format!("unknown group {group_id}")),
                )
            })?;
            Ok((Some(group.tenant_id), Some(group_id)))
        }
        other => Err(bad_params(
            req,
            format!("scope must be one of: global, tenant, group (got {other})"),
        )),
    }
}

fn roles_for(role: Option<RoleClass>) -> Vec<RoleClass> {
    match role {
        Some(r) => vec![r],
        None => RoleClass::ALL.to_vec(),
    }
}

fn handle_access_resolve(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state, req)?;
    let feature = get_str(req, "feature")?;
    let tenant_id = get_opt_i64(req, "tenantId")?;
    let group_id = get_opt_i64(req, "groupId")?;
    let Some(role) = get_opt_role(req, "roleClass")? else {
        return Err(bad_params(req, "missing roleClass"));
    };

    let snap = load_snapshot(conn, req)?;
    let resolved = snap
        .resolve(feature, tenant_id, group_id, role)
        .map_err(|e| access_err(&req.id, &e))?;
    serde_json::to_value(resolved).map_err(|e| internal_failed(req, e))
}

fn handle_access_matrix(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state, req)?;
    let tenant_id = get_opt_i64(req, "tenantId")?;
    let snap = load_snapshot(conn, req)?;
    matrix_json(conn, &snap, req, tenant_id)
}

fn handle_access_toggle(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state, req)?;
    let feature = get_str(req, "feature")?;
    let role = get_opt_role(req, "roleClass")?;
    let Some(value) = req.params.get("value").and_then(|v| v.as_bool()) else {
        return Err(bad_params(req, "value must be boolean"));
    };

    let snap = load_snapshot(conn, req)?;
    let (tenant_id, group_id) = scope_ids(&snap, req)?;
    let scope = snap
        .target(feature, tenant_id, group_id)
        .map_err(|e| access_err(&req.id, &e))?;

    let write = || -> anyhow::Result<()> {
        let tx = conn.unchecked_transaction()?;
        for r in roles_for(role) {
            access::set_override(&tx, feature, scope, r, value)?;
        }
        tx.commit()?;
        Ok(())
    };
    write().map_err(|e| db_failed(req, "db_update_failed", e))?;
    info!(
        feature,
        scope = scope.kind(),
        scope_id = scope.scope_id(),
        role_class = role.map(RoleClass::as_str).unwrap_or("all"),
        value,
        "access override set"
    );

    let snap = load_snapshot(conn, req)?;
    matrix_json(conn, &snap, req, tenant_id)
}

fn handle_access_reset(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state, req)?;
    let feature = get_str(req, "feature")?;
    let role = get_opt_role(req, "roleClass")?;

    let snap = load_snapshot(conn, req)?;
    let (tenant_id, group_id) = scope_ids(&snap, req)?;
    let scope = snap
        .target(feature, tenant_id, group_id)
        .map_err(|e| access_err(&req.id, &e))?;

    let write = || -> anyhow::Result<usize> {
        let tx = conn.unchecked_transaction()?;
        let mut removed = 0;
        for r in roles_for(role) {
            removed += access::reset_override(&tx, feature, scope, r)?;
        }
        tx.commit()?;
        Ok(removed)
    };
    let removed = write().map_err(|e| db_failed(req, "db_update_failed", e))?;
    info!(
        feature,
        scope = scope.kind(),
        scope_id = scope.scope_id(),
        removed,
        "access override reset"
    );

    let snap = load_snapshot(conn, req)?;
    matrix_json(conn, &snap, req, tenant_id)
}

fn handle_access_set_grant(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = require_db(state, req)?;
    let feature = get_str(req, "feature")?;
    let tenant_id = get_i64(req, "tenantId")?;
    let granted = match req.params.get("granted") {
        None => return Err(bad_params(req, "missing granted")),
        Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(_) => return Err(bad_params(req, "granted must be boolean or null")),
    };

    let snap = load_snapshot(conn, req)?;
    snap.target(feature, Some(tenant_id), None)
        .map_err(|e| access_err(&req.id, &e))?;
    access::set_grant(conn, feature, tenant_id, granted)
        .map_err(|e| db_failed(req, "db_update_failed", e))?;
    info!(feature, tenant_id, granted = ?granted, "access grant updated");

    let snap = load_snapshot(conn, req)?;
    matrix_json(conn, &snap, req, Some(tenant_id))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let outcome = match req.method.as_str() {
        "access.resolve" => handle_access_resolve(state, req),
        "access.matrix" => handle_access_matrix(state, req),
        "access.toggle" => handle_access_toggle(state, req),
        "access.reset" => handle_access_reset(state, req),
        "access.setGrant" => handle_access_set_grant(state, req),
        _ => return None,
    };
    Some(respond(req, outcome))
}
