use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn write_spec(dir: &Path, spec: &str) -> std::path::PathBuf {
    let path = dir.join("spec.yaml");
    fs::write(&path, spec).expect("Failed to write test spec");
    path
}

fn calico(spec: &Path, extra: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_calico"))
        .arg(spec)
        .arg("--no-sandbox")
        .args(extra)
        .output()
        .expect("Failed to execute calico")
}

#[test]
fn test_passing_suite_grade() {
    let dir = tempfile::tempdir().unwrap();
    let spec = write_spec(
        dir.path(),
        r#"
- greeting:
    run: sh -c 'printf "Name: "; read n; echo "Hello, $n!"'
    script:
        - expect: "Name: "
        - send: "Alice"
        - expect: "Hello, Alice!"
    points: 6

- exit_code:
    run: sh -c 'exit 4'
    return: 4
    points: 4
"#,
    );

    let output = calico(&spec, &[]);
    assert!(
        output.status.success(),
        "calico failed with stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("greeting"), "Output should list the case");
    assert!(stdout.contains(" 6 / 6"), "Output should show earned points: {stdout}");
    assert!(
        stdout.trim_end().ends_with("Grade: 10 / 10"),
        "Unexpected grade: {stdout}"
    );
}

#[test]
fn test_failed_blocker_stops_grading() {
    let dir = tempfile::tempdir().unwrap();
    let spec = write_spec(
        dir.path(),
        r#"
- build:
    run: "false"
    blocker: true

- later:
    run: "true"
    points: 5
"#,
    );

    let output = calico(&spec, &[]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("FAILED"));
    assert!(!stdout.contains("later"), "Later cases must not run: {stdout}");
    assert!(stdout.contains("Grade: 0 / 5"));
}

#[test]
fn test_validate_only() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let spec = write_spec(
        dir.path(),
        &format!("- touch:\n    run: touch {}\n", marker.display()),
    );

    let output = calico(&spec, &["--validate"]);
    assert!(output.status.success());
    assert!(!String::from_utf8_lossy(&output.stdout).contains("Grade:"));
    assert!(!marker.exists(), "Validation must not run any case");
}

#[test]
fn test_invalid_spec_exits_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let spec = write_spec(dir.path(), "- broken:\n    return: 0\n");

    let output = calico(&spec, &[]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("broken: no run command"), "stderr: {stderr}");
}

#[test]
fn test_case_selection_and_directory() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("data.txt"), "from the test directory\n").unwrap();
    let spec = write_spec(
        dir.path(),
        r#"
- _read_data:
    run: cat data.txt
    script:
        - expect: "from the test directory"
    points: 2

- other:
    run: "false"
    points: 3
"#,
    );

    let dir_arg = dir.path().display().to_string();
    let output = calico(&spec, &["-d", &dir_arg, "--case", "_read_data", "--quiet"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), "Grade: 2 / 5");
}

#[cfg(unix)]
#[test]
fn test_relative_program_in_directory() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let program = dir.path().join("greet");
    fs::write(
        &program,
        "#!/bin/sh\nprintf 'Name: '\nread name\necho \"Hello, $name!\"\n",
    )
    .unwrap();
    fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();
    let spec = write_spec(
        dir.path(),
        r#"
- greet:
    run: ./greet
    script:
        - expect: "Name: "
        - send: "Bob"
        - expect: "Hello, Bob!"
    points: 3
"#,
    );

    let dir_arg = dir.path().display().to_string();
    let output = calico(&spec, &["-d", &dir_arg, "--quiet"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "Grade: 3 / 3");
}

#[test]
fn test_unknown_case_selection_fails() {
    let dir = tempfile::tempdir().unwrap();
    let spec = write_spec(dir.path(), "- only:\n    run: \"true\"\n");

    let output = calico(&spec, &["--case", "missing"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing"));
}
