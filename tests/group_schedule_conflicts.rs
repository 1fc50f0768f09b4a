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

fn create_instructor(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
) -> String {
    let res = request_ok(stdin, reader, id, "instructors.create", json!({ "name": name }));
    res["instructor"]["id"].as_str().expect("instructor id").to_string()
}

#[test]
fn overlapping_group_is_rejected_until_forced() {
    let workspace = temp_dir("tutord-group-conflicts");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let instructor_id = create_instructor(&mut stdin, &mut reader, "2", "Mariam");

    let g1 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "groups.save",
        json!({
            "name": "G1",
            "instructorId": instructor_id,
            "price": 500,
            "maxStudents": 10,
            "slots": [{ "day": "saturday", "start": "10:00", "end": "11:00" }]
        }),
    );
    assert_eq!(g1["saved"], true);
    let g1_id = g1["group"]["id"].as_str().expect("g1 id").to_string();

    let g2_params = json!({
        "name": "G2",
        "instructorId": instructor_id,
        "price": 300,
        "slots": [{ "day": "saturday", "start": "10:30", "end": "11:30" }]
    });
    let rejected = request_ok(&mut stdin, &mut reader, "4", "groups.save", g2_params.clone());
    assert_eq!(rejected["saved"], false);
    assert_eq!(rejected["hasConflicts"], true);
    let conflicts = rejected["report"]["conflicts"].as_array().expect("conflicts");
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0]["groupId"], g1_id.as_str());
    assert_eq!(conflicts[0]["groupName"], "G1");
    assert_eq!(conflicts[0]["day"], "saturday");
    assert_eq!(conflicts[0]["start"], "10:00");
    assert_eq!(conflicts[0]["end"], "11:00");
    assert!(rejected["report"]["message"]
        .as_str()
        .expect("message")
        .contains("Mariam"));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "groups.list",
        json!({ "instructorId": instructor_id }),
    );
    assert_eq!(listed["groups"].as_array().map(|a| a.len()), Some(1));

    let mut forced = g2_params;
    forced["forceSave"] = json!(true);
    let saved = request_ok(&mut stdin, &mut reader, "6", "groups.save", forced);
    assert_eq!(saved["saved"], true);
    assert_eq!(saved["group"]["slots"][0]["start"], "10:30");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "groups.list",
        json!({ "instructorId": instructor_id }),
    );
    assert_eq!(listed["groups"].as_array().map(|a| a.len()), Some(2));
}

#[test]
fn forced_resave_keeps_a_single_copy_of_each_slot() {
    let workspace = temp_dir("tutord-group-idempotent");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let instructor_id = create_instructor(&mut stdin, &mut reader, "2", "Samir");

    let slots = json!([
        { "day": "sunday", "start": "09:00", "end": "10:00" },
        { "day": "tuesday", "start": "17:00", "durationMinutes": 90 }
    ]);
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "groups.save",
        json!({
            "name": "Chemistry",
            "instructorId": instructor_id,
            "price": 250.5,
            "slots": slots,
            "forceSave": true
        }),
    );
    let group_id = first["group"]["id"].as_str().expect("id").to_string();

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "groups.save",
        json!({
            "groupId": group_id,
            "name": "Chemistry",
            "instructorId": instructor_id,
            "price": 250.5,
            "slots": slots,
            "forceSave": true
        }),
    );
    assert_eq!(second["saved"], true);
    assert_eq!(second["group"]["slots"], first["group"]["slots"]);
    assert_eq!(second["group"]["price"], 250.5);

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "groups.get",
        json!({ "groupId": group_id }),
    );
    let slots = got["group"]["slots"].as_array().expect("slots");
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[1]["end"], "18:30");
}

#[test]
fn editing_a_group_ignores_its_own_slots_but_not_siblings() {
    let workspace = temp_dir("tutord-group-edit");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let instructor_id = create_instructor(&mut stdin, &mut reader, "2", "Dina");
    let other_instructor = create_instructor(&mut stdin, &mut reader, "3", "Fadi");

    let morning = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "groups.save",
        json!({
            "name": "Morning",
            "instructorId": instructor_id,
            "price": 100,
            "slots": [{ "day": "monday", "hour": 9, "minute": 0, "period": "AM", "durationMinutes": 60 }]
        }),
    );
    let morning_id = morning["group"]["id"].as_str().expect("id").to_string();
    assert_eq!(morning["group"]["slots"][0]["startLabel"], "9:00 AM");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "groups.save",
        json!({
            "name": "Noon",
            "instructorId": instructor_id,
            "price": 100,
            "slots": [{ "day": "monday", "start": "12:00", "end": "13:00" }]
        }),
    );

    let shifted = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "groups.save",
        json!({
            "groupId": morning_id,
            "name": "Morning",
            "instructorId": instructor_id,
            "price": 100,
            "slots": [{ "day": "monday", "start": "09:30", "end": "10:30" }]
        }),
    );
    assert_eq!(shifted["saved"], true);

    let clash = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "groups.checkConflicts",
        json!({
            "instructorId": instructor_id,
            "groupId": morning_id,
            "slots": [{ "day": "monday", "start": "12:30", "end": "13:30" }]
        }),
    );
    assert_eq!(clash["hasConflicts"], true);
    assert_eq!(clash["report"]["conflicts"][0]["groupName"], "Noon");

    // Another instructor may teach at the same time.
    let other = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "groups.save",
        json!({
            "name": "Parallel",
            "instructorId": other_instructor,
            "price": 100,
            "slots": [{ "day": "monday", "start": "12:00", "end": "13:00" }]
        }),
    );
    assert_eq!(other["saved"], true);
}

#[test]
fn invalid_group_input_is_bad_params() {
    let workspace = temp_dir("tutord-group-invalid");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let instructor_id = create_instructor(&mut stdin, &mut reader, "2", "Hany");

    let reversed = request(
        &mut stdin,
        &mut reader,
        "3",
        "groups.save",
        json!({
            "name": "Backwards",
            "instructorId": instructor_id,
            "price": 100,
            "slots": [{ "day": "friday", "start": "11:00", "end": "10:00" }]
        }),
    );
    assert_eq!(reversed["ok"], false);
    assert_eq!(reversed["error"]["code"], "bad_params");
    assert_eq!(reversed["error"]["details"]["field"], "slots[0].end");

    let negative = request(
        &mut stdin,
        &mut reader,
        "4",
        "groups.save",
        json!({ "name": "Cheap", "instructorId": instructor_id, "price": -1 }),
    );
    assert_eq!(negative["error"]["code"], "bad_params");

    let unknown = request(
        &mut stdin,
        &mut reader,
        "5",
        "groups.save",
        json!({ "name": "Orphan", "instructorId": "nobody", "price": 10 }),
    );
    assert_eq!(unknown["error"]["code"], "not_found");

    let listed = request_ok(&mut stdin, &mut reader, "6", "groups.list", json!({}));
    assert_eq!(listed["groups"].as_array().map(|a| a.len()), Some(0));
}
