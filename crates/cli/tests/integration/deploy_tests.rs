//! `kiln deploy` with a scripted stand-in for `adb`.

use predicates::prelude::*;

use crate::common::{TestEnv, library};

fn hello() -> TestEnv {
  TestEnv::project("libbase", &[("libbase", &library("libbase", &[]))])
}

fn artifact(env: &TestEnv) -> std::path::PathBuf {
  dunce::canonicalize(env.path()).unwrap().join("bin/hello-1.2.0-arm64-v8a-debug.apk")
}

#[test]
fn deploy_installs_the_package_on_the_selected_device() {
  let env = hello();
  let adb = env.write_script(
    "tools/adb",
    r#"printf '%s\n' "$@" > "$(dirname "$0")/adb-args.txt"
echo 'Performing Streamed Install'
echo 'Success'"#,
  );

  let output = env
    .kiln()
    .env("KILN_ADB", &adb)
    .args(["--json", "deploy", "--serial", "emulator-5554"])
    .output()
    .unwrap();
  assert_eq!(output.status.code(), Some(0), "{}", String::from_utf8_lossy(&output.stderr));

  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let artifact = artifact(&env);
  assert_eq!(report["deployed"], artifact.to_string_lossy().as_ref());

  let args = std::fs::read_to_string(env.path().join("tools/adb-args.txt")).unwrap();
  let args: Vec<&str> = args.lines().collect();
  assert_eq!(
    args,
    vec!["-s", "emulator-5554", "install", "-r", artifact.to_str().unwrap()]
  );
}

#[test]
fn text_deploy_reports_the_installed_artifact() {
  let env = hello();
  let adb = env.write_script("tools/adb", "echo Success");

  env
    .kiln()
    .env("KILN_ADB", &adb)
    .arg("deploy")
    .assert()
    .success()
    .stdout(predicate::str::contains("Installed"))
    .stdout(predicate::str::contains("hello-1.2.0-arm64-v8a-debug.apk"));
}

#[test]
fn no_connected_device_exits_with_deploy_code() {
  let env = hello();
  let adb = env.write_script(
    "tools/adb",
    "echo '* daemon started successfully'\necho 'adb: no devices/emulators found' >&2\nexit 1",
  );

  env
    .kiln()
    .env("KILN_ADB", &adb)
    .arg("deploy")
    .assert()
    .code(7)
    .stderr(predicate::str::contains("exited with status 1"))
    .stderr(predicate::str::contains("* daemon started successfully"))
    .stderr(predicate::str::contains("adb: no devices/emulators found"));
  // The package was still built.
  assert!(artifact(&env).is_file());
}

#[test]
fn rejected_install_is_a_deploy_error_even_with_status_zero() {
  let env = hello();
  let adb = env.write_script(
    "tools/adb",
    "echo 'Performing Streamed Install'\necho 'Failure [INSTALL_FAILED_VERSION_DOWNGRADE]'",
  );

  let output = env
    .kiln()
    .env("KILN_ADB", &adb)
    .args(["--json", "deploy"])
    .output()
    .unwrap();
  assert_eq!(output.status.code(), Some(7));

  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(report["category"], "deploy");
  assert_eq!(report["exit_code"], 7);
  let error = &report["errors"][0];
  assert!(error["message"].as_str().unwrap().contains("INSTALL_FAILED_VERSION_DOWNGRADE"));
  assert!(error["output"].as_str().unwrap().contains("Performing Streamed Install"));
}

#[test]
fn missing_installer_exits_with_deploy_code() {
  let env = hello();
  let missing = env.path().join("tools/no-such-adb");

  env
    .kiln()
    .env("KILN_ADB", &missing)
    .arg("deploy")
    .assert()
    .code(7)
    .stderr(predicate::str::contains("failed to start"));
}

#[test]
fn build_failure_stops_before_the_installer_runs() {
  let env = TestEnv::project(
    "libbad",
    &[(
      "libbad",
      r#"return {
  name = "libbad",
  version = "0.9",
  stages = { compile = [[exit 3]] },
}
"#,
    )],
  );
  let adb = env.write_script("tools/adb", r#"touch "$(dirname "$0")/adb-called""#);

  env.kiln().env("KILN_ADB", &adb).arg("deploy").assert().code(5);
  assert!(!env.path().join("tools/adb-called").exists());
}
