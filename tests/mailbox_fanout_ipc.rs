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
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_raw(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
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
    let value = request_raw(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request_raw(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

fn select_workspace(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, prefix: &str) {
    let workspace = temp_dir(prefix);
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

fn create_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    name: &str,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        &format!("class-{}", name),
        "classes.create",
        json!({ "name": name, "year": 2025 }),
    );
    res.get("classCode")
        .and_then(|v| v.as_str())
        .expect("classCode")
        .to_string()
}

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_code: &str,
    first: &str,
    last: &str,
    parent_count: usize,
) -> (String, Vec<String>) {
    let parents: Vec<_> = (0..parent_count)
        .map(|i| json!({ "firstName": format!("Parent{}", i), "lastName": last }))
        .collect();
    let res = request_ok(
        stdin,
        reader,
        &format!("student-{}-{}", first, last),
        "students.create",
        json!({
            "classCode": class_code,
            "firstName": first,
            "lastName": last,
            "parents": parents
        }),
    );
    let student = res
        .get("studentUserId")
        .and_then(|v| v.as_str())
        .expect("studentUserId")
        .to_string();
    let parent_ids = res
        .get("parentUserIds")
        .and_then(|v| v.as_array())
        .expect("parentUserIds")
        .iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.to_string())
        .collect();
    (student, parent_ids)
}

fn create_teacher(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    first: &str,
    last: &str,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        &format!("teacher-{}-{}", first, last),
        "teachers.create",
        json!({ "firstName": first, "lastName": last }),
    );
    res.get("teacherUserId")
        .and_then(|v| v.as_str())
        .expect("teacherUserId")
        .to_string()
}

fn inbox_len(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    user_id: &str,
) -> usize {
    let res = request_ok(
        stdin,
        reader,
        &format!("inbox-{}", user_id),
        "mailbox.received.list",
        json!({ "userId": user_id }),
    );
    res.get("received")
        .and_then(|v| v.as_array())
        .map(|a| a.len())
        .unwrap_or(0)
}

#[test]
fn class_selector_reaches_every_student_once() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, "gradebook-fanout-class");
    let class_code = create_class(&mut stdin, &mut reader, "5b");
    let (s1, _) = create_student(&mut stdin, &mut reader, &class_code, "Anna", "Koval", 0);
    let (s2, _) = create_student(&mut stdin, &mut reader, &class_code, "Bohdan", "Tkach", 0);
    let (s3, _) = create_student(&mut stdin, &mut reader, &class_code, "Daryna", "Lys", 0);
    let teacher = create_teacher(&mut stdin, &mut reader, "Oksana", "Rudenko");

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "send",
        "mailbox.send",
        json!({
            "actorUserId": teacher,
            "subject": "Field trip",
            "text": "Bring a signed permission slip by Friday.",
            "selector": { "kind": "class", "classCode": class_code }
        }),
    );
    assert_eq!(res.get("delivered").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(
        res.get("recipientLabel").and_then(|v| v.as_str()),
        Some("5b")
    );

    for s in [&s1, &s2, &s3] {
        assert_eq!(inbox_len(&mut stdin, &mut reader, s), 1);
    }

    // One sent record regardless of audience size.
    let sent = request_ok(
        &mut stdin,
        &mut reader,
        "sent",
        "mailbox.sent.list",
        json!({ "userId": teacher }),
    );
    let sent = sent.get("sent").and_then(|v| v.as_array()).expect("sent");
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].get("recipientLabel").and_then(|v| v.as_str()),
        Some("5b")
    );
}

#[test]
fn class_parents_selector_collects_parents_across_the_class() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, "gradebook-fanout-parents");
    let class_code = create_class(&mut stdin, &mut reader, "6c");
    let (_s1, p1) = create_student(&mut stdin, &mut reader, &class_code, "Ivan", "Moroz", 2);
    let (_s2, p2) = create_student(&mut stdin, &mut reader, &class_code, "Yulia", "Hnatiuk", 1);
    let (s3, _) = create_student(&mut stdin, &mut reader, &class_code, "Marko", "Savchuk", 0);
    let teacher = create_teacher(&mut stdin, &mut reader, "Olha", "Dmytruk");

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "send",
        "mailbox.send",
        json!({
            "actorUserId": teacher,
            "subject": "Parent meeting",
            "text": "We meet on Thursday at 18:00 in room 14.",
            "selector": { "kind": "classParents", "classCode": class_code }
        }),
    );
    assert_eq!(res.get("delivered").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(
        res.get("recipientLabel").and_then(|v| v.as_str()),
        Some("6c parents")
    );

    for p in p1.iter().chain(p2.iter()) {
        assert_eq!(inbox_len(&mut stdin, &mut reader, p), 1);
    }
    // The parentless student got nothing, and neither did the students.
    assert_eq!(inbox_len(&mut stdin, &mut reader, &s3), 0);
}

#[test]
fn empty_audience_writes_nothing() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, "gradebook-fanout-empty");
    let class_code = create_class(&mut stdin, &mut reader, "1a");
    let teacher = create_teacher(&mut stdin, &mut reader, "Roman", "Zayets");

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "send",
        "mailbox.send",
        json!({
            "actorUserId": teacher,
            "subject": "Hello",
            "text": "Anyone there?",
            "selector": { "kind": "class", "classCode": class_code }
        }),
    );
    assert_eq!(res.get("delivered").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(res.get("emptyAudience").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        res.get("recipientLabel").and_then(|v| v.as_str()),
        Some("1a")
    );

    // No sent record either: the message never existed.
    let sent = request_ok(
        &mut stdin,
        &mut reader,
        "sent",
        "mailbox.sent.list",
        json!({ "userId": teacher }),
    );
    assert_eq!(
        sent.get("sent").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    // Same for a class whose students all lack parents.
    create_student(&mut stdin, &mut reader, &class_code, "Lev", "Bilous", 0);
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "send2",
        "mailbox.send",
        json!({
            "actorUserId": teacher,
            "subject": "Hello again",
            "text": "Parents?",
            "selector": { "kind": "classParents", "classCode": class_code }
        }),
    );
    assert_eq!(res.get("emptyAudience").and_then(|v| v.as_bool()), Some(true));
}

#[test]
fn subject_teachers_selector_uses_the_subject_label() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, "gradebook-fanout-subject");
    let class_code = create_class(&mut stdin, &mut reader, "8a");
    let t1 = create_teacher(&mut stdin, &mut reader, "Nina", "Kravets");
    let t2 = create_teacher(&mut stdin, &mut reader, "Pavlo", "Sydorenko");
    let manager = request_ok(
        &mut stdin,
        &mut reader,
        "mgr",
        "managers.create",
        json!({ "firstName": "Halyna", "lastName": "Ostap" }),
    );
    let manager = manager
        .get("managerUserId")
        .and_then(|v| v.as_str())
        .expect("managerUserId")
        .to_string();

    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "subj",
        "subjects.create",
        json!({ "classCode": class_code, "name": "Physics", "shortcut": "PHY" }),
    );
    let subject_code = subject
        .get("subjectCode")
        .and_then(|v| v.as_str())
        .expect("subjectCode")
        .to_string();
    for (i, t) in [&t1, &t2].iter().enumerate() {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("assign{}", i),
            "subjects.teachers.add",
            json!({ "subjectCode": subject_code, "teacherUserId": t }),
        );
    }

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "send",
        "mailbox.send",
        json!({
            "actorUserId": manager,
            "subject": "Curriculum update",
            "text": "The physics syllabus changes next term.",
            "selector": { "kind": "subjectTeachers", "subjectCode": subject_code }
        }),
    );
    assert_eq!(res.get("delivered").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(
        res.get("recipientLabel").and_then(|v| v.as_str()),
        Some("Physics teachers")
    );
    assert_eq!(inbox_len(&mut stdin, &mut reader, &t1), 1);
    assert_eq!(inbox_len(&mut stdin, &mut reader, &t2), 1);
}

#[test]
fn student_parents_selector_labels_with_the_student_name() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, "gradebook-fanout-sparents");
    let class_code = create_class(&mut stdin, &mut reader, "3d");
    let (student, parents) =
        create_student(&mut stdin, &mut reader, &class_code, "Sofia", "Melnyk", 2);
    let teacher = create_teacher(&mut stdin, &mut reader, "Taras", "Voron");

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "send",
        "mailbox.send",
        json!({
            "actorUserId": teacher,
            "subject": "Progress note",
            "text": "Sofia did very well this week.",
            "selector": { "kind": "studentParents", "studentUserId": student }
        }),
    );
    assert_eq!(res.get("delivered").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(
        res.get("recipientLabel").and_then(|v| v.as_str()),
        Some("Sofia Melnyk parents")
    );
    for p in &parents {
        assert_eq!(inbox_len(&mut stdin, &mut reader, p), 1);
    }
    assert_eq!(inbox_len(&mut stdin, &mut reader, &student), 0);
}

#[test]
fn unknown_targets_and_oversized_messages_are_rejected() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, "gradebook-fanout-reject");
    let teacher = create_teacher(&mut stdin, &mut reader, "Yurii", "Pavlenko");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "no-class",
        "mailbox.send",
        json!({
            "actorUserId": teacher,
            "subject": "Hi",
            "text": "...",
            "selector": { "kind": "class", "classCode": "no-such-class" }
        }),
    );
    assert_eq!(code, "not_found");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "no-sender",
        "mailbox.send",
        json!({
            "actorUserId": "no-such-user",
            "subject": "Hi",
            "text": "...",
            "selector": { "kind": "allManagers" }
        }),
    );
    assert_eq!(code, "not_found");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "long-subject",
        "mailbox.send",
        json!({
            "actorUserId": teacher,
            "subject": "s".repeat(129),
            "text": "...",
            "selector": { "kind": "allManagers" }
        }),
    );
    assert_eq!(code, "validation_failed");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "long-text",
        "mailbox.send",
        json!({
            "actorUserId": teacher,
            "subject": "Hi",
            "text": "t".repeat(1025),
            "selector": { "kind": "allManagers" }
        }),
    );
    assert_eq!(code, "validation_failed");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "bad-kind",
        "mailbox.send",
        json!({
            "actorUserId": teacher,
            "subject": "Hi",
            "text": "...",
            "selector": { "kind": "everyone" }
        }),
    );
    assert_eq!(code, "bad_params");
}
