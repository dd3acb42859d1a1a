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
    let exe = env!("CARGO_BIN_EXE_teachersd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn teachersd");
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

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value["error"]["code"].as_str().expect("error code").to_string()
}

fn select_workspace(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &std::path::Path) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

#[test]
fn activate_keeps_exactly_one_term_active() {
    let workspace = temp_dir("teachersd-term-active");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    for (i, term) in ["1402-2", "1403-1", "1403-2"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("create-{}", i),
            "term.create",
            json!({ "term": term, "title": format!("نیمسال {}", term) }),
        );
    }

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "activate-1",
        "term.activate",
        json!({ "term": "1403-1" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "activate-2",
        "term.activate",
        json!({ "term": "1403-2" }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "list", "term.list", json!({}));
    let terms = listed["terms"].as_array().expect("terms array");
    assert_eq!(terms.len(), 3);
    let active: Vec<&str> = terms
        .iter()
        .filter(|t| t["active"] == true)
        .map(|t| t["term"].as_str().unwrap())
        .collect();
    assert_eq!(active, vec!["1403-2"], "activation moves the single flag");

    // Newest term first.
    assert_eq!(terms[0]["term"], "1403-2");
    assert_eq!(terms[2]["term"], "1402-2");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "activate-missing",
        "term.activate",
        json!({ "term": "1404-1" }),
    );
    assert_eq!(code, "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn term_crud_round_trip() {
    let workspace = temp_dir("teachersd-term-crud");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "create",
        "term.create",
        json!({
            "term": "1403-1",
            "title": "نیمسال اول ۱۴۰۳",
            "startDate": "1403/06/25",
            "endDate": "1403/10/27"
        }),
    );

    let duplicate = request_err_code(
        &mut stdin,
        &mut reader,
        "dup",
        "term.create",
        json!({ "term": "1403-1", "title": "تکراری" }),
    );
    assert_eq!(duplicate, "conflict");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "update",
        "term.update",
        json!({ "term": "1403-1", "title": "نیمسال اول", "startDate": "1403/07/01" }),
    );
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "get",
        "term.get",
        json!({ "term": "1403-1" }),
    );
    assert_eq!(fetched["title"], "نیمسال اول");
    assert_eq!(fetched["startDate"], "1403/07/01");
    assert_eq!(fetched["active"], false);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "delete",
        "term.delete",
        json!({ "term": "1403-1" }),
    );
    let missing = request_err_code(
        &mut stdin,
        &mut reader,
        "get-gone",
        "term.get",
        json!({ "term": "1403-1" }),
    );
    assert_eq!(missing, "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}
