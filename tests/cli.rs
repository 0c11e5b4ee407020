use std::fmt::Write as FmtWrite;
use std::fs;
use std::process::Command;

use tempfile::tempdir;

fn write_training_csv(path: &std::path::Path) {
    let mut text = String::from("temp,hum,wind,cnt\n");
    for i in 0..60 {
        let temp = (i % 13) as f64 - 6.0;
        let hum = ((i * 7) % 11) as f64 - 5.0;
        let wind = ((i * 5) % 3) as f64;
        let cnt = 3.0 * temp - hum + 10.0;
        writeln!(text, "{temp},{hum},{wind},{cnt}").unwrap();
    }
    fs::write(path, text).expect("write training data");
}

#[test]
fn fit_then_explain_writes_sage_values() {
    let tmp = tempdir().expect("temporary directory");
    let data_path = tmp.path().join("train.csv");
    write_training_csv(&data_path);

    let exe = env!("CARGO_BIN_EXE_sage");
    let status = Command::new(exe)
        .current_dir(tmp.path())
        .args(["fit", data_path.to_str().expect("path str")])
        .status()
        .expect("run sage fit");
    assert!(status.success(), "fit exited with status {status:?}");
    assert!(tmp.path().join("model.toml").exists(), "model.toml missing");

    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args([
            "explain",
            data_path.to_str().expect("path str"),
            "--model",
            "model.toml",
            "--n-samples",
            "24",
            "--seed",
            "3",
        ])
        .output()
        .expect("run sage explain");
    assert!(
        output.status.success(),
        "explain failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let tsv = fs::read_to_string(tmp.path().join("sage.tsv")).expect("sage.tsv written");
    let lines: Vec<&str> = tsv.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "feature\tsage_value\tstd_error");
    assert!(lines[1].starts_with("temp\t"));
    assert!(lines[2].starts_with("hum\t"));
    assert!(lines[3].starts_with("wind\t"));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("24 permutations"), "{stdout}");
}

fn explain_with_background_subsample(dir: &std::path::Path, seed: Option<&str>) -> (String, String) {
    let mut args = vec![
        "explain",
        "train.csv",
        "--model",
        "model.toml",
        "--background-rows",
        "10",
        "--n-samples",
        "8",
    ];
    if let Some(seed) = seed {
        args.extend(["--seed", seed]);
    }
    let output = Command::new(env!("CARGO_BIN_EXE_sage"))
        .current_dir(dir)
        .args(&args)
        .output()
        .expect("run sage explain");
    assert!(
        output.status.success(),
        "explain failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let tsv = fs::read_to_string(dir.join("sage.tsv")).expect("sage.tsv written");
    (stdout, tsv)
}

#[test]
fn printed_seed_reproduces_a_subsampled_background_run() {
    let tmp = tempdir().expect("temporary directory");
    write_training_csv(&tmp.path().join("train.csv"));
    let status = Command::new(env!("CARGO_BIN_EXE_sage"))
        .current_dir(tmp.path())
        .args(["fit", "train.csv"])
        .status()
        .expect("run sage fit");
    assert!(status.success());

    let (stdout, first) = explain_with_background_subsample(tmp.path(), None);
    let seed = stdout
        .lines()
        .find_map(|line| line.strip_prefix("Sampling seed: "))
        .expect("seed printed")
        .trim()
        .to_string();

    let (_, second) = explain_with_background_subsample(tmp.path(), Some(&seed));
    let (_, third) = explain_with_background_subsample(tmp.path(), Some(&seed));
    assert_eq!(first, second);
    assert_eq!(second, third);
}

#[test]
fn explain_without_model_file_fails_cleanly() {
    let tmp = tempdir().expect("temporary directory");
    let data_path = tmp.path().join("train.csv");
    write_training_csv(&data_path);

    let output = Command::new(env!("CARGO_BIN_EXE_sage"))
        .current_dir(tmp.path())
        .args([
            "explain",
            data_path.to_str().expect("path str"),
            "--model",
            "missing.toml",
        ])
        .output()
        .expect("run sage explain");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).starts_with("Error:"));
}
