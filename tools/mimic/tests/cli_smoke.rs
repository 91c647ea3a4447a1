use assert_cmd::cargo::cargo_bin_cmd;
use mimic::event::{Button, Event, EventKind, Key};
use mimic::sequence::{Sequence, TimedEvent};
use std::path::Path;

fn write_capture(path: &Path) {
    let ms = 1_000_000u64;
    let captured = [
        TimedEvent {
            timestamp_ns: 0,
            kind: EventKind::KeyPress { key: Key::Char('a') },
        },
        TimedEvent {
            timestamp_ns: ms,
            kind: EventKind::KeyRelease { key: Key::Char('a') },
        },
        TimedEvent {
            timestamp_ns: 2 * ms,
            kind: EventKind::PointerMoveTo { x: 5, y: 0 },
        },
        TimedEvent {
            timestamp_ns: 3 * ms,
            kind: EventKind::PointerMoveTo { x: 10, y: 0 },
        },
        TimedEvent {
            timestamp_ns: 4 * ms,
            kind: EventKind::PointerPress { button: Button::Left },
        },
        TimedEvent {
            timestamp_ns: 5 * ms,
            kind: EventKind::PointerRelease { button: Button::Left },
        },
    ];
    let lines = captured
        .iter()
        .map(|event| serde_json::to_string(event).expect("serialize capture"))
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(path, lines).expect("write capture");
}

fn stdout_of(out: &assert_cmd::assert::Assert) -> String {
    String::from_utf8(out.get_output().stdout.clone()).expect("utf8")
}

#[test]
fn help_lists_playback_flags() {
    let mut cmd = cargo_bin_cmd!("mimic");
    cmd.arg("--help");
    let out = cmd.assert().success();
    let stdout = stdout_of(&out);

    for flag in ["--guide", "--scenario", "--sequence", "--seed", "--realized-out", "--list"] {
        assert!(stdout.contains(flag), "help should mention {flag}");
    }
}

#[test]
fn missing_guide_exits_nonzero() {
    let mut cmd = cargo_bin_cmd!("mimic");
    cmd.arg("--list");
    cmd.assert().failure();

    let temp = tempfile::tempdir().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("mimic");
    cmd.arg("--guide").arg(temp.path().join("absent.guide")).arg("--list");
    cmd.assert().failure();
}

#[test]
fn import_define_list_and_play_round_trip() {
    let temp = tempfile::tempdir().expect("tempdir");
    let guide = temp.path().join("app.guide");
    let capture = temp.path().join("capture.jsonl");
    write_capture(&capture);

    let mut cmd = cargo_bin_cmd!("mimic");
    cmd.arg("--guide")
        .arg(&guide)
        .arg("--import-capture")
        .arg(&capture)
        .arg("--name")
        .arg("login");
    let out = cmd.assert().success();
    assert!(stdout_of(&out).contains("recorded login"));

    let mut cmd = cargo_bin_cmd!("mimic");
    cmd.arg("--guide")
        .arg(&guide)
        .arg("--define-scenario")
        .arg("main=log.*");
    cmd.assert().success();

    let mut cmd = cargo_bin_cmd!("mimic");
    cmd.arg("--guide").arg(&guide).arg("--list");
    let listing = stdout_of(&cmd.assert().success());
    assert!(listing.contains("sequence login"));
    assert!(listing.contains("scenario main: log.*"));

    let realized = temp.path().join("realized.json");
    let play = |realized: &Path| {
        let mut cmd = cargo_bin_cmd!("mimic");
        cmd.arg("--guide")
            .arg(&guide)
            .arg("--scenario")
            .arg("main")
            .arg("--seed")
            .arg("7")
            .arg("--realized-out")
            .arg(realized);
        stdout_of(&cmd.assert().success())
    };
    let first = play(&realized);
    let dispatched = first
        .lines()
        .map(|line| serde_json::from_str::<Event>(line).expect("event line"))
        .collect::<Vec<_>>();
    assert!(dispatched.iter().all(Event::is_atomic));

    let saved: Sequence =
        serde_json::from_str(&std::fs::read_to_string(&realized).expect("read realized"))
            .expect("parse realized");
    assert_eq!(saved.events(), dispatched.as_slice());

    let second = play(&temp.path().join("again.json"));
    assert_eq!(first, second, "same seed should dispatch the same timeline");
}

#[test]
fn sealed_guide_requires_the_passphrase() {
    let temp = tempfile::tempdir().expect("tempdir");
    let guide = temp.path().join("secret.guide");
    let capture = temp.path().join("capture.jsonl");
    write_capture(&capture);

    let mut cmd = cargo_bin_cmd!("mimic");
    cmd.env("MIMIC_TEST_PASS", "open sesame")
        .arg("--guide")
        .arg(&guide)
        .arg("--passphrase-env")
        .arg("MIMIC_TEST_PASS")
        .arg("--import-capture")
        .arg(&capture)
        .arg("--name")
        .arg("login");
    cmd.assert().success();

    let mut cmd = cargo_bin_cmd!("mimic");
    cmd.arg("--guide").arg(&guide).arg("--list");
    let out = cmd.assert().failure();
    let stderr = String::from_utf8(out.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.contains("decrypt"));

    let mut cmd = cargo_bin_cmd!("mimic");
    cmd.env("MIMIC_TEST_PASS", "open sesame")
        .arg("--guide")
        .arg(&guide)
        .arg("--passphrase-env")
        .arg("MIMIC_TEST_PASS")
        .arg("--list");
    assert!(stdout_of(&cmd.assert().success()).contains("sequence login"));
}

#[test]
fn unknown_scenario_exits_nonzero() {
    let temp = tempfile::tempdir().expect("tempdir");
    let guide = temp.path().join("app.guide");
    let capture = temp.path().join("capture.jsonl");
    write_capture(&capture);

    let mut cmd = cargo_bin_cmd!("mimic");
    cmd.arg("--guide")
        .arg(&guide)
        .arg("--import-capture")
        .arg(&capture)
        .arg("--name")
        .arg("login");
    cmd.assert().success();

    let mut cmd = cargo_bin_cmd!("mimic");
    cmd.arg("--guide").arg(&guide).arg("--scenario").arg("nope");
    let out = cmd.assert().failure();
    let stderr = String::from_utf8(out.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.contains("no match"));
}

#[cfg(unix)]
#[test]
fn interrupt_cancels_playback_and_keeps_the_partial_run() {
    use std::io::{BufRead, BufReader};
    use std::process::{Command, Stdio};

    let temp = tempfile::tempdir().expect("tempdir");
    let guide = temp.path().join("slow.guide");
    let capture = temp.path().join("slow.jsonl");
    let lines = [
        TimedEvent {
            timestamp_ns: 0,
            kind: EventKind::KeyPress { key: Key::Char('z') },
        },
        TimedEvent {
            timestamp_ns: 30_000_000_000,
            kind: EventKind::KeyRelease { key: Key::Char('z') },
        },
    ]
    .iter()
    .map(|event| serde_json::to_string(event).expect("serialize capture"))
    .collect::<Vec<_>>()
    .join("\n");
    std::fs::write(&capture, lines).expect("write capture");

    let mut cmd = cargo_bin_cmd!("mimic");
    cmd.arg("--guide")
        .arg(&guide)
        .arg("--import-capture")
        .arg(&capture)
        .arg("--name")
        .arg("slow");
    cmd.assert().success();

    let realized = temp.path().join("partial.json");
    let mut child = Command::new(env!("CARGO_BIN_EXE_mimic"))
        .arg("--guide")
        .arg(&guide)
        .arg("--sequence")
        .arg("slow")
        .arg("--realized-out")
        .arg(&realized)
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn");
    let mut stdout = BufReader::new(child.stdout.take().expect("stdout"));
    let mut first = String::new();
    stdout.read_line(&mut first).expect("first event");
    let dispatched: Event = serde_json::from_str(first.trim()).expect("event line");
    assert_eq!(dispatched, Event::key_press(0, Key::Char('z')));

    let status = Command::new("kill")
        .arg("-INT")
        .arg(child.id().to_string())
        .status()
        .expect("kill");
    assert!(status.success());
    let exit = child.wait().expect("wait");
    assert_eq!(exit.code(), Some(mimic::EXIT_CANCELLED));

    let saved: Sequence =
        serde_json::from_str(&std::fs::read_to_string(&realized).expect("read realized"))
            .expect("parse realized");
    assert_eq!(saved.events(), &[Event::key_press(0, Key::Char('z'))]);
}
