use std::process::Command;

fn run_strobe(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_strobe"))
        .args(args)
        .output()
        .expect("run strobe")
}

#[test]
fn help_lists_subcommands() {
    let output = run_strobe(&["help"]);
    assert!(
        output.status.success(),
        "strobe help failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("demo"), "missing demo in help output");
    assert!(stdout.contains("probe"), "missing probe in help output");
}

#[test]
fn demo_jsonl_emits_parseable_events() {
    let output = run_strobe(&[
        "demo",
        "--frames",
        "2",
        "--zones-per-frame",
        "2",
        "--capacity",
        "16",
        "--jsonl",
    ]);
    assert!(
        output.status.success(),
        "strobe demo failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut kinds = Vec::new();
    for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
        let value: serde_json::Value =
            serde_json::from_str(line).unwrap_or_else(|err| panic!("bad JSON line {line}: {err}"));
        kinds.push(
            value
                .get("kind")
                .and_then(|kind| kind.as_str())
                .expect("kind field")
                .to_owned(),
        );
    }

    assert_eq!(kinds[0], "new_context");
    assert_eq!(kinds.iter().filter(|kind| *kind == "zone_begin").count(), 4);
    assert_eq!(kinds.iter().filter(|kind| *kind == "zone_end").count(), 4);
    // Two slots per zone, all resolved before exit.
    assert_eq!(kinds.iter().filter(|kind| *kind == "gpu_time").count(), 8);
}

#[test]
fn demo_recovers_abandoned_zones() {
    let output = run_strobe(&[
        "demo",
        "--frames",
        "1",
        "--zones-per-frame",
        "4",
        "--capacity",
        "16",
        "--timeout-ms",
        "30",
        "--abandon-every",
        "2",
        "--jsonl",
    ]);
    assert!(
        output.status.success(),
        "strobe demo failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let gpu_events = stdout
        .lines()
        .filter(|line| line.contains("\"kind\":\"gpu_time\""))
        .count();
    assert_eq!(
        gpu_events, 8,
        "abandoned zones still resolve through timeout synthesis"
    );
    let summary = String::from_utf8_lossy(&output.stderr);
    assert!(
        summary.contains("outstanding=0"),
        "drain must clear the ring: {summary}"
    );
}
