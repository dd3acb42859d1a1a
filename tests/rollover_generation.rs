use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

const ABSENT_TEXT: &str = "عدم حضور در مرکز";

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

fn seed_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
    teacher_codes: &[&str],
) {
    let _ = request_ok(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "seed-center",
        "center.create",
        json!({ "centerCode": "C01", "title": "مرکز شیراز" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "seed-term",
        "term.create",
        json!({ "term": "1403-1", "title": "نیمسال اول ۱۴۰۳" }),
    );
    for (i, code) in teacher_codes.iter().enumerate() {
        let _ = request_ok(
            stdin,
            reader,
            &format!("seed-teacher-{}", i),
            "teacher.create",
            json!({
                "code": code,
                "firstName": "استاد",
                "lastName": format!("شماره {}", i + 1),
                "centerCode": "C01",
                "cooperationType": "عضو هیات علمی"
            }),
        );
    }
}

fn schedule_rows(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    teacher_code: &str,
) -> Vec<serde_json::Value> {
    let result = request_ok(
        stdin,
        reader,
        id,
        "schedule.get",
        json!({ "teacherCode": teacher_code, "term": "1403-1" }),
    );
    result["schedules"].as_array().expect("schedules array").clone()
}

#[test]
fn reset_generates_full_skeleton_and_is_repeatable() {
    let workspace = temp_dir("teachersd-rollover-reset");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed_workspace(&mut stdin, &mut reader, &workspace, &["t100", "t200", "t300"]);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "gen-1",
        "term.generate",
        json!({ "term": "1403-1", "reset": true }),
    );
    assert_eq!(first["teacherCount"], 3);
    assert_eq!(first["createdTeacherTerms"], 3);
    assert_eq!(first["createdSchedules"], 21);
    assert_eq!(first["errorCount"], 0);

    let rows = schedule_rows(&mut stdin, &mut reader, "get-1", "t100");
    assert_eq!(rows.len(), 7);
    let mut days: Vec<&str> = rows
        .iter()
        .map(|r| r["dayOfWeek"].as_str().unwrap())
        .collect();
    days.sort_unstable();
    days.dedup();
    assert_eq!(days.len(), 7, "one row per distinct weekday");
    for row in &rows {
        assert_eq!(row["center"], "C01");
        for slot in ["a", "b", "c", "d", "e"] {
            assert_eq!(row[slot], ABSENT_TEXT);
        }
    }

    // A second reset rebuilds the same skeleton rather than doubling it.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "gen-2",
        "term.generate",
        json!({ "term": "1403-1", "reset": true }),
    );
    assert_eq!(second["createdTeacherTerms"], 3);
    assert_eq!(second["createdSchedules"], 21);
    for code in ["t100", "t200", "t300"] {
        let rows = schedule_rows(&mut stdin, &mut reader, &format!("get-2-{}", code), code);
        assert_eq!(rows.len(), 7);
    }

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn reset_discards_previous_edits() {
    let workspace = temp_dir("teachersd-rollover-wipe");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed_workspace(&mut stdin, &mut reader, &workspace, &["t100"]);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "gen-1",
        "term.generate",
        json!({ "term": "1403-1", "reset": true }),
    );
    let rows = schedule_rows(&mut stdin, &mut reader, "get-1", "t100");
    let schedule_id = rows[0]["scheduleId"].as_str().unwrap().to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "edit-1",
        "schedule.update",
        json!({ "scheduleId": schedule_id, "actor": "t100", "a": "تدریس حضوری" }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "gen-2",
        "term.generate",
        json!({ "term": "1403-1", "reset": true }),
    );
    let rows = schedule_rows(&mut stdin, &mut reader, "get-2", "t100");
    for row in &rows {
        assert_eq!(row["a"], ABSENT_TEXT, "reset returns slots to the default");
    }

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn incremental_fill_is_idempotent_and_preserves_edits() {
    let workspace = temp_dir("teachersd-rollover-fill");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed_workspace(&mut stdin, &mut reader, &workspace, &["t100", "t200", "t300"]);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "gen-1",
        "term.generate",
        json!({ "term": "1403-1", "reset": false }),
    );
    assert_eq!(first["teacherCount"], 3);
    assert_eq!(first["createdTeacherTerms"], 3);
    assert_eq!(first["createdSchedules"], 21);

    let rows = schedule_rows(&mut stdin, &mut reader, "get-1", "t100");
    let schedule_id = rows[0]["scheduleId"].as_str().unwrap().to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "edit-1",
        "schedule.update",
        json!({ "scheduleId": schedule_id, "actor": "t100", "a": "تدریس حضوری" }),
    );

    // Filling again finds nothing missing and touches nothing.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "gen-2",
        "term.generate",
        json!({ "term": "1403-1", "reset": false }),
    );
    assert_eq!(second["teacherCount"], 3);
    assert_eq!(second["createdTeacherTerms"], 0);
    assert_eq!(second["createdSchedules"], 0);

    let rows = schedule_rows(&mut stdin, &mut reader, "get-2", "t100");
    let edited: Vec<_> = rows
        .iter()
        .filter(|r| r["a"] == "تدریس حضوری")
        .collect();
    assert_eq!(edited.len(), 1, "incremental fill keeps the edited row");

    // A teacher hired mid-term gets exactly the missing skeleton.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "late-hire",
        "teacher.create",
        json!({
            "code": "t400",
            "firstName": "استاد",
            "lastName": "جدید",
            "centerCode": "C01",
            "cooperationType": "مدرس مدعو"
        }),
    );
    let third = request_ok(
        &mut stdin,
        &mut reader,
        "gen-3",
        "term.generate",
        json!({ "term": "1403-1", "reset": false }),
    );
    assert_eq!(third["teacherCount"], 4);
    assert_eq!(third["createdTeacherTerms"], 1);
    assert_eq!(third["createdSchedules"], 7);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unknown_term_fails_before_writing() {
    let workspace = temp_dir("teachersd-rollover-noterm");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed_workspace(&mut stdin, &mut reader, &workspace, &["t100"]);

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "gen-bad",
        "term.generate",
        json!({ "term": "9999-9", "reset": false }),
    );
    assert_eq!(code, "not_found");

    // The failed call wrote nothing: a later fill for a real term creates
    // the full skeleton from scratch.
    let gen = request_ok(
        &mut stdin,
        &mut reader,
        "gen-good",
        "term.generate",
        json!({ "term": "1403-1", "reset": false }),
    );
    assert_eq!(gen["createdTeacherTerms"], 1);
    assert_eq!(gen["createdSchedules"], 7);

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "gen-blank",
        "term.generate",
        json!({ "term": "   ", "reset": true }),
    );
    assert_eq!(code, "bad_params");

    let _ = std::fs::remove_dir_all(workspace);
}
