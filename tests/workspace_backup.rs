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
    let exe = env!("CARGO_BIN_EXE_tutord");
    let mut child = Command::new(exe)
        .env_remove("TUTORD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn tutord");
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

#[test]
fn export_then_import_restores_workspace_state() {
    let workspace = temp_dir("tutord-backup-ipc");
    let out_dir = temp_dir("tutord-backup-ipc-out");
    let bundle = out_dir.join("center.zip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "instructors.create",
        json!({ "name": "Zeinab" }),
    );

    let export = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "backup.exportWorkspace",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(export["bundleFormat"], "tutord-workspace-v1");
    assert_eq!(export["dbSha256"].as_str().map(|s| s.len()), Some(64));
    assert!(bundle.is_file());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "instructors.create",
        json!({ "name": "Added after export" }),
    );
    let before = request_ok(&mut stdin, &mut reader, "5", "instructors.list", json!({}));
    assert_eq!(before["instructors"].as_array().map(|a| a.len()), Some(2));

    let import = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "backup.importWorkspace",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(import["dbSha256"], export["dbSha256"]);

    let after = request_ok(&mut stdin, &mut reader, "7", "instructors.list", json!({}));
    let names: Vec<_> = after["instructors"]
        .as_array()
        .expect("instructors")
        .iter()
        .filter_map(|i| i["name"].as_str().map(|s| s.to_string()))
        .collect();
    assert_eq!(names, vec!["Zeinab".to_string()]);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn import_of_non_bundle_keeps_current_database() {
    let workspace = temp_dir("tutord-backup-bad-import");
    let junk = workspace.join("notes.txt");
    std::fs::write(&junk, b"not a zip").expect("write junk");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "instructors.create",
        json!({ "name": "Kept" }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "backup.importWorkspace",
        json!({ "inPath": junk.to_string_lossy() }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "io_failed");

    let list = request_ok(&mut stdin, &mut reader, "4", "instructors.list", json!({}));
    assert_eq!(list["instructors"][0]["name"], "Kept");

    let _ = std::fs::remove_dir_all(workspace);
}
