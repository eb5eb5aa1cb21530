use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn config_prints_default_settings() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("callmix-scripts"));
    cmd.arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("mixing_interval_ms"))
        .stdout(predicate::str::contains("internal_sample_rate"))
        .stdout(predicate::str::contains("talk_detection"));
}

#[test]
fn conference_writes_one_recording_per_party() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("callmix-scripts"));
    cmd.args(["conference", "--parties", "3", "--seconds", "0.5", "--out"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("party-1"))
        .stdout(predicate::str::contains("party-3"));

    for party in 1..=3 {
        let path = dir.path().join(format!("party-{}.wav", party));
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.spec().channels, 1);
        assert!(reader.len() > 0, "{} is empty", path.display());
    }
}

#[test]
fn conference_rejects_unknown_arguments() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("callmix-scripts"));
    cmd.args(["conference", "--volume", "11"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown conference arg"));
}

#[test]
fn show_log_tags_lines_with_their_target() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("callmix-scripts"));
    cmd.env("RUST_LOG", "info,bridge=debug")
        .env_remove("CALLMIX_LOG_STDERR")
        .args(["conference", "--parties", "2", "--seconds", "0.2", "--show-log", "--out"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("callmix_scripts: conference bridge"))
        .stdout(predicate::str::contains("bridge: bridge"));
}
