use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn write_tone(path: &Path, freq: f32, secs: f32) {
    let sr = 22_050u32;
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: sr,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..(secs * sr as f32) as usize {
        let s = 0.2 * (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin();
        writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

fn navarasa(models: &Path) -> Command {
    let mut cmd = Command::cargo_bin("navarasa").unwrap();
    cmd.env_remove("RUST_LOG").arg("--model-dir").arg(models);
    cmd
}

#[test]
fn json_predictions_on_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("tone.wav");
    write_tone(&wav, 440.0, 2.0);

    let out = navarasa(&dir.path().join("models"))
        .arg("--json")
        .arg(&wav)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    let result = &entries[0]["result"];
    assert_eq!(result["emotions"].as_object().unwrap().len(), 9);
    assert!(result["primaryEmotion"].is_string());
    assert!(result["confidence"].as_f64().unwrap() > 0.0);
    assert!(result["features"]["tempo"].is_number());
}

#[test]
fn table_goes_to_stderr() {
    let dir = tempfile::tempdir().unwrap();
    write_tone(&dir.path().join("a.wav"), 220.0, 1.5);
    write_tone(&dir.path().join("b.wav"), 880.0, 1.5);

    navarasa(&dir.path().join("models"))
        .arg(dir.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("Emotions"))
        .stderr(predicate::str::contains("rule_based"))
        .stderr(predicate::str::contains("a.wav"))
        .stdout(predicate::str::contains("\"primaryEmotion\""));
}

#[test]
fn features_mode_prints_descriptors() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("tone.wav");
    write_tone(&wav, 330.0, 1.0);

    navarasa(&dir.path().join("models"))
        .args(["--features", "--json"])
        .arg(&wav)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"mfccs_mean\""))
        .stdout(predicate::str::contains("\"tempo\""))
        .stdout(predicate::str::contains("primaryEmotion").not());
}

#[test]
fn missing_path_fails() {
    let dir = tempfile::tempdir().unwrap();
    navarasa(dir.path())
        .arg(dir.path().join("nowhere.wav"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Path not found"));
}

#[test]
fn failing_file_is_named() {
    let dir = tempfile::tempdir().unwrap();
    write_tone(&dir.path().join("fine.wav"), 440.0, 1.0);
    std::fs::write(dir.path().join("broken.wav"), b"RIFF but not really").unwrap();

    navarasa(&dir.path().join("models"))
        .arg("--json")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("broken.wav"))
        .stderr(predicate::str::contains("Audio decode failed"));
}

#[test]
fn paths_are_required() {
    Command::cargo_bin("navarasa").unwrap().assert().failure();
}
