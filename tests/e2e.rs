use std::path::PathBuf;
use std::process::Command;

fn write_temp(suffix: &str, content: &str) -> PathBuf {
    // Use a unique temp file per test to avoid conflicts in parallel runs
    let temp_dir = std::env::temp_dir();
    let unique_id = std::thread::current().id();
    let temp_file = temp_dir.join(format!("shale_test_{:?}_{}", unique_id, suffix));
    std::fs::write(&temp_file, content).unwrap();
    temp_file
}

fn run_shale(source: &str, args: &[&str]) -> (String, String, bool) {
    let temp_file = write_temp("src.shale", source);

    let mut cmd_args: Vec<String> = vec![args[0].to_string(), temp_file.display().to_string()];
    cmd_args.extend(args[1..].iter().map(|s| s.to_string()));

    let output = Command::new(env!("CARGO_BIN_EXE_shale"))
        .args(&cmd_args)
        .output()
        .expect("failed to execute shale");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();

    std::fs::remove_file(&temp_file).ok();

    (stdout, stderr, success)
}

fn assert_success(source: &str, args: &[&str]) -> String {
    let (stdout, stderr, success) = run_shale(source, args);
    assert!(success, "command should succeed, stderr:\n{}", stderr);
    stdout
}

fn assert_failure(source: &str, args: &[&str]) -> String {
    let (_, stderr, success) = run_shale(source, args);
    assert!(!success, "command should fail");
    stderr
}

#[test]
fn test_run_prints_result() {
    let source = "int32 main(int32 x) { return x + x; }";
    let stdout = assert_success(source, &["run", "21"]);
    assert_eq!(stdout, "42\n");
}

#[test]
fn test_run_void_prints_nothing() {
    let source = "void main() { int32 x = 1; }";
    let stdout = assert_success(source, &["run"]);
    assert_eq!(stdout, "");
}

#[test]
fn test_run_custom_entry() {
    let source = "int32 answer() { return 42; }";
    let stdout = assert_success(source, &["run", "--entry", "answer"]);
    assert_eq!(stdout, "42\n");
}

#[test]
fn test_run_negative_argument() {
    let source = "int32 main(int32 x) { return x * x; }";
    let stdout = assert_success(source, &["run", "-3"]);
    assert_eq!(stdout, "9\n");
}

#[test]
fn test_run_reports_trap() {
    let source = "int32 main(int32 x) { return x / 0; }";
    let stderr = assert_failure(source, &["run", "1"]);
    assert!(stderr.contains("division by zero"), "stderr:\n{}", stderr);
}

#[test]
fn test_check_passes() {
    let source = "int32 main() { return 1; }";
    let stdout = assert_success(source, &["check"]);
    assert_eq!(stdout, "Type check passed.\n");
}

#[test]
fn test_check_reports_location() {
    let source = "int32 main() { return true; }";
    let stderr = assert_failure(source, &["check"]);
    assert!(stderr.contains("error:"), "stderr:\n{}", stderr);
    assert!(stderr.contains(":1:"), "stderr:\n{}", stderr);
}

#[test]
fn test_check_json_diagnostic() {
    let source = "int32 main() { }";
    let (stdout, _, success) = run_shale(source, &["check", "--json"]);
    assert!(!success);
    assert!(stdout.contains("\"ok\":false"), "stdout:\n{}", stdout);
    assert!(stdout.contains("\"kind\":\"type\""), "stdout:\n{}", stdout);
    assert!(stdout.contains("missing return"), "stdout:\n{}", stdout);

    let source = "int32 main() { return 1; }";
    let (stdout, _, success) = run_shale(source, &["check", "--json"]);
    assert!(success);
    assert!(stdout.contains("\"ok\":true"), "stdout:\n{}", stdout);
}

#[test]
fn test_manifest_run() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("double.shale"),
        "int32 main(int32 x) { return x + x; }",
    )
    .unwrap();
    let manifest = r#"
[[case]]
name = "inc"
source = "int32 main(int32 x) { return x + 1; }"
entry = "main"
args = [41]
expect = 42

[[case]]
name = "from-file"
file = "double.shale"
entry = "main"
args = [21]
expect = 42

[[case]]
name = "trap"
source = "int32 main() { return 1 / 0; }"
entry = "main"
error = "division by zero"
"#;
    let manifest_path = dir.path().join("manifest.toml");
    std::fs::write(&manifest_path, manifest).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_shale"))
        .args(["test", manifest_path.to_str().unwrap()])
        .output()
        .expect("failed to execute shale");
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();

    assert!(output.status.success(), "stdout:\n{}", stdout);
    assert!(stdout.contains("3 passed, 0 failed"), "stdout:\n{}", stdout);
}

#[test]
fn test_manifest_failure_sets_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = r#"
[[case]]
name = "wrong"
source = "int32 main() { return 1; }"
entry = "main"
expect = 2
"#;
    let manifest_path = dir.path().join("manifest.toml");
    std::fs::write(&manifest_path, manifest).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_shale"))
        .args(["test", manifest_path.to_str().unwrap()])
        .output()
        .expect("failed to execute shale");
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();

    assert!(!output.status.success());
    assert!(stdout.contains("0 passed, 1 failed"), "stdout:\n{}", stdout);
}
