use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

const ALL_TEACHERS: &str = "همه اساتید";
const FACULTY: &str = "عضو هیات علمی";
const VISITING: &str = "مدرس مدعو";

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

fn seed_workspace(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &std::path::Path) {
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
    for (i, (code, coop)) in [("t100", FACULTY), ("t200", FACULTY), ("t300", VISITING)]
        .iter()
        .enumerate()
    {
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
                "cooperationType": coop
            }),
        );
    }
}

fn lock_cohort(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    cooperation_type: &str,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        id,
        "lock.lockCohort",
        json!({
            "term": "1403-1",
            "cooperationType": cooperation_type,
            "username": "u-admin",
            "fullName": "مدیر سامانه",
            "centerCode": "C01",
            "description": "قفل پایان مهلت ویرایش"
        }),
    )
}

fn lock_count(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, id: &str) -> usize {
    let result = request_ok(stdin, reader, id, "lock.list", json!({ "term": "1403-1" }));
    result["locks"].as_array().expect("locks array").len()
}

#[test]
fn lock_cohort_replaces_instead_of_accumulating() {
    let workspace = temp_dir("teachersd-lock-replace");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed_workspace(&mut stdin, &mut reader, &workspace);

    let first = lock_cohort(&mut stdin, &mut reader, "lock-1", ALL_TEACHERS);
    assert_eq!(first["locksCreated"], 21);
    assert_eq!(first["teachersAffected"], 3);
    assert_eq!(lock_count(&mut stdin, &mut reader, "count-1"), 21);

    // Same call again: replace, not append.
    let second = lock_cohort(&mut stdin, &mut reader, "lock-2", ALL_TEACHERS);
    assert_eq!(second["locksCreated"], 21);
    assert_eq!(lock_count(&mut stdin, &mut reader, "count-2"), 21);

    // Re-locking a sub-cohort replaces only that cohort's rows.
    let faculty = lock_cohort(&mut stdin, &mut reader, "lock-3", FACULTY);
    assert_eq!(faculty["locksCreated"], 14);
    assert_eq!(faculty["teachersAffected"], 2);
    assert_eq!(lock_count(&mut stdin, &mut reader, "count-3"), 21);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unlock_cohort_removes_and_reports() {
    let workspace = temp_dir("teachersd-lock-unlock");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed_workspace(&mut stdin, &mut reader, &workspace);

    let _ = lock_cohort(&mut stdin, &mut reader, "lock-1", ALL_TEACHERS);

    let unlocked = request_ok(
        &mut stdin,
        &mut reader,
        "unlock-1",
        "lock.unlockCohort",
        json!({ "term": "1403-1", "cooperationType": ALL_TEACHERS }),
    );
    assert_eq!(unlocked["locksRemoved"], 21);
    assert_eq!(lock_count(&mut stdin, &mut reader, "count-1"), 0);

    // Nothing left to unlock.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "unlock-2",
        "lock.unlockCohort",
        json!({ "term": "1403-1", "cooperationType": ALL_TEACHERS }),
    );
    assert_eq!(code, "not_found");

    // Unlocking one cohort leaves the other cohort's locks alone.
    let _ = lock_cohort(&mut stdin, &mut reader, "lock-2", ALL_TEACHERS);
    let visiting = request_ok(
        &mut stdin,
        &mut reader,
        "unlock-3",
        "lock.unlockCohort",
        json!({ "term": "1403-1", "cooperationType": VISITING }),
    );
    assert_eq!(visiting["locksRemoved"], 7);
    assert_eq!(lock_count(&mut stdin, &mut reader, "count-2"), 14);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn empty_cohorts_and_blank_terms_are_rejected() {
    let workspace = temp_dir("teachersd-lock-reject");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    seed_workspace(&mut stdin, &mut reader, &workspace);

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "lock-bad-coop",
        "lock.lockCohort",
        json!({
            "term": "1403-1",
            "cooperationType": "استاد بازنشسته",
            "username": "u-admin"
        }),
    );
    assert_eq!(code, "not_found");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "lock-blank-term",
        "lock.lockCohort",
        json!({
            "term": "  ",
            "cooperationType": ALL_TEACHERS,
            "username": "u-admin"
        }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "unlock-bad-coop",
        "lock.unlockCohort",
        json!({ "term": "1403-1", "cooperationType": "استاد بازنشسته" }),
    );
    assert_eq!(code, "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}
