use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use tracing::info;

/// Emulator tools offered to schools out of the box: (id, name, enabled by default).
const DEFAULT_FEATURES: &[(&str, &str, bool)] = &[
    ("code_editor", "Code Editor", true),
    ("scratch_editor", "Scratch Editor", true),
    ("python_lab", "Python Lab", true),
    ("sql_lab", "SQL Lab", false),
    ("html_playground", "HTML Playground", true),
    ("circuit_simulator", "Circuit Simulator", false),
    ("photo_editor", "Photo Editor", false),
];

pub fn open_db(workspace: &Path, seed_catalog: bool) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("schooladmind.sqlite3");
    let conn = Connection::open(&db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS features(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            default_enabled INTEGER NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tenants(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            short_name TEXT,
            top_category_id INTEGER
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cohorts(
            id INTEGER PRIMARY KEY,
            tenant_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(tenant_id) REFERENCES tenants(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cohorts_tenant ON cohorts(tenant_id)",
        [],
    )?;

    // Grants and overrides hold no foreign keys: rows for a removed school or
    // cohort are simply never consulted.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS feature_grants(
            feature_id TEXT NOT NULL,
            tenant_id INTEGER NOT NULL,
            granted INTEGER NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(feature_id, tenant_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS feature_overrides(
            id TEXT PRIMARY KEY,
            feature_id TEXT NOT NULL,
            scope TEXT NOT NULL,
            scope_id INTEGER NOT NULL,
            role_class TEXT NOT NULL,
            enabled INTEGER NOT NULL,
            updated_at TEXT,
            UNIQUE(feature_id, scope, scope_id, role_class)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_feature_overrides_scope ON feature_overrides(scope, scope_id)",
        [],
    )?;

    // Category and course rows mirror the host LMS, which does not guarantee
    // consistent parent or category references.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            parent_id INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id INTEGER PRIMARY KEY,
            category_id INTEGER NOT NULL,
            full_name TEXT NOT NULL,
            short_name TEXT,
            visible INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_category ON courses(category_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tenant_courses(
            tenant_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            linked_at TEXT NOT NULL,
            PRIMARY KEY(tenant_id, course_id),
            FOREIGN KEY(tenant_id) REFERENCES tenants(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tenant_courses_course ON tenant_courses(course_id)",
        [],
    )?;

    if seed_catalog {
        seed_default_features(&conn)?;
    }

    info!(path = %db_path.display(), "workspace database ready");
    Ok(conn)
}

fn seed_default_features(conn: &Connection) -> anyhow::Result<()> {
    let existing: i64 = conn.query_row("SELECT COUNT(*) FROM features", [], |r| r.get(0))?;
    if existing > 0 {
        return Ok(());
    }
    let tx = conn.unchecked_transaction()?;
    for (i, (id, name, enabled)) in DEFAULT_FEATURES.iter().enumerate() {
        tx.execute(
            "INSERT INTO features(id, name, default_enabled, sort_order) VALUES(?, ?, ?, ?)",
            (id, name, *enabled as i64, i as i64),
        )?;
    }
    tx.commit()?;
    info!(count = DEFAULT_FEATURES.len(), "seeded default feature catalog");
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
