use std::process::Command;

fn run_without_credentials(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_tgterm"))
        .args(args)
        .env_remove("TGTERM_API_ID")
        .env_remove("TGTERM_API_HASH")
        .output()
        .expect("failed to execute tgterm binary")
}

#[test]
fn missing_credentials_fail_before_any_network() {
    let output = run_without_credentials(&["chats", "list"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TGTERM_API_ID"), "stderr: {stderr}");
}

#[test]
fn missing_hash_is_its_own_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_tgterm"))
        .args(["chats", "list"])
        .env("TGTERM_API_ID", "94575")
        .env_remove("TGTERM_API_HASH")
        .output()
        .expect("failed to execute tgterm binary");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TGTERM_API_HASH"), "stderr: {stderr}");
}

#[test]
fn help_needs_no_configuration() {
    let output = run_without_credentials(&["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("tgterm"), "stdout: {stdout}");
    assert!(stdout.contains("chats"), "stdout: {stdout}");
}
