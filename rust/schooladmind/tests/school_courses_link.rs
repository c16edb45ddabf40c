use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schooladmind");
    let mut child = Command::new(exe)
        .env("SCHOOLADMIND_SEED_CATALOG", "false")
        .env_remove("SCHOOLADMIND_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schooladmind");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

fn open_seeded(prefix: &str) -> (PathBuf, Child, ChildStdin, BufReader<ChildStdout>) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "open",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "seed",
        "catalog.import",
        json!({
            "tenants": [
                { "id": 1, "name": "North School" },
                { "id": 2, "name": "South School" }
            ],
            "categories": [ { "id": 1, "name": "Science" } ],
            "courses": [
                { "id": 30, "categoryId": 1, "fullName": "Physics", "shortName": "PHY" },
                { "id": 31, "categoryId": 1, "fullName": "Chemistry" },
                { "id": 32, "categoryId": 1, "fullName": "Biology" }
            ]
        }),
    );
    (workspace, child, stdin, reader)
}

fn listed_ids(v: &serde_json::Value) -> Vec<i64> {
    v.get("courses")
        .and_then(|c| c.as_array())
        .expect("courses")
        .iter()
        .filter_map(|c| c.get("id").and_then(|v| v.as_i64()))
        .collect()
}

#[test]
fn assigning_twice_links_once() {
    let (workspace, _child, mut stdin, mut reader) = open_seeded("schooladmind-link-idem");

    let a = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schoolCourses.assign",
        json!({ "tenantId": 1, "courseIds": [31, 30, 31] }),
    );
    assert_eq!(a, json!({ "linked": [30, 31], "alreadyLinked": [] }));

    let a = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schoolCourses.assign",
        json!({ "tenantId": 1, "courseIds": [30, 32] }),
    );
    assert_eq!(a, json!({ "linked": [32], "alreadyLinked": [30] }));

    let l = request_ok(&mut stdin, &mut reader, "3", "schoolCourses.list", json!({ "tenantId": 1 }));
    assert_eq!(l.get("tenantId").and_then(|v| v.as_i64()), Some(1));
    // Listed by full name.
    assert_eq!(listed_ids(&l), vec![32, 31, 30]);
    let physics = &l["courses"][2];
    assert_eq!(physics.get("shortName").and_then(|v| v.as_str()), Some("PHY"));
    assert_eq!(physics.get("categoryId").and_then(|v| v.as_i64()), Some(1));
    assert!(physics.get("linkedAt").and_then(|v| v.as_str()).is_some());

    let other = request_ok(&mut stdin, &mut reader, "4", "schoolCourses.list", json!({ "tenantId": 2 }));
    assert!(listed_ids(&other).is_empty());

    let tenants = request_ok(&mut stdin, &mut reader, "5", "tenants.list", json!({}));
    assert_eq!(tenants.pointer("/tenants/0/courseCount").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(tenants.pointer("/tenants/1/courseCount").and_then(|v| v.as_i64()), Some(0));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unassign_removes_only_existing_links() {
    let (workspace, _child, mut stdin, mut reader) = open_seeded("schooladmind-link-remove");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "schoolCourses.assign",
        json!({ "tenantId": 1, "courseIds": [30, 31] }),
    );

    let r = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schoolCourses.unassign",
        json!({ "tenantId": 1, "courseIds": [31, 32] }),
    );
    assert_eq!(r, json!({ "removed": 1 }));

    let r = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schoolCourses.unassign",
        json!({ "tenantId": 1, "courseIds": [31] }),
    );
    assert_eq!(r, json!({ "removed": 0 }));

    let l = request_ok(&mut stdin, &mut reader, "4", "schoolCourses.list", json!({ "tenantId": 1 }));
    assert_eq!(listed_ids(&l), vec![30]);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unknown_rows_are_rejected_without_partial_links() {
    let (workspace, _child, mut stdin, mut reader) = open_seeded("schooladmind-link-errors");

    let v = request(
        &mut stdin,
        &mut reader,
        "1",
        "schoolCourses.assign",
        json!({ "tenantId": 1, "courseIds": [30, 404, 405] }),
    );
    assert_eq!(error_code(&v), Some("not_found"));
    assert_eq!(v.pointer("/error/details/courseIds"), Some(&json!([404, 405])));

    let l = request_ok(&mut stdin, &mut reader, "2", "schoolCourses.list", json!({ "tenantId": 1 }));
    assert!(listed_ids(&l).is_empty());

    let v = request(
        &mut stdin,
        &mut reader,
        "3",
        "schoolCourses.assign",
        json!({ "tenantId": 9, "courseIds": [30] }),
    );
    assert_eq!(error_code(&v), Some("not_found"));

    let v = request(&mut stdin, &mut reader, "4", "schoolCourses.list", json!({ "tenantId": 9 }));
    assert_eq!(error_code(&v), Some("not_found"));

    let v = request(
        &mut stdin,
        &mut reader,
        "5",
        "schoolCourses.assign",
        json!({ "tenantId": 1, "courseIds": "30" }),
    );
    assert_eq!(error_code(&v), Some("bad_params"));

    let v = request(
        &mut stdin,
        &mut reader,
        "6",
        "schoolCourses.unassign",
        json!({ "tenantId": 1, "courseIds": [30, "x"] }),
    );
    assert_eq!(error_code(&v), Some("bad_params"));

    let _ = std::fs::remove_dir_all(workspace);
}
