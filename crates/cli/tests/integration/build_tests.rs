//! `kiln build` and `kiln clean` against real stage scripts.

use predicates::prelude::*;

use crate::common::{TestEnv, library};

fn hello() -> TestEnv {
  TestEnv::project(
    "libapp",
    &[("libbase", &library("libbase", &[])), ("libapp", &library("libapp", &["libbase"]))],
  )
}

#[test]
fn build_produces_a_debug_package() {
  let env = hello();
  let (code, report) = env.json(&["build"]);
  assert_eq!(code, Some(0), "{}", report);

  assert_eq!(report["package_id"], "org.example.hello");
  assert_eq!(report["mode"], "debug");
  let arch = &report["archs"][0];
  assert_eq!(arch["arch"], "arm64-v8a");
  assert_eq!(arch["plan"], serde_json::json!(["libbase@1.0", "libapp@1.0"]));

  let artifact = dunce::canonicalize(env.path()).unwrap().join("bin/hello-1.2.0-arm64-v8a-debug.apk");
  assert!(artifact.is_file());
  assert_eq!(arch["package"]["artifact"], artifact.to_string_lossy().as_ref());
  assert_eq!(arch["package"]["signed"], false);

  let tree = std::path::PathBuf::from(arch["package"]["tree"].as_str().unwrap());
  assert!(tree.join("assets/app/main.py").is_file());
  assert!(tree.join("assets/app/data/readme.txt").is_file());
  assert!(tree.join("lib/arm64-v8a/libapp.so").is_file());
}

#[test]
fn rebuild_is_served_from_cache() {
  let env = hello();
  env.kiln().arg("build").assert().success();

  let (code, report) = env.json(&["build"]);
  assert_eq!(code, Some(0));
  let recipes = report["archs"][0]["build"]["recipes"].as_array().unwrap();
  assert_eq!(recipes.len(), 2);
  assert!(recipes.iter().all(|r| r["outcome"] == "cached"));
}

#[test]
fn text_output_summarizes_the_build() {
  let env = hello();
  env
    .kiln()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("hello-1.2.0-arm64-v8a-debug.apk"))
    .stdout(predicate::str::contains("2 built, 0 cached"));
}

#[test]
fn failing_stage_exits_with_build_code_and_shows_tool_output() {
  let env = TestEnv::project(
    "libbad",
    &[(
      "libbad",
      r#"return {
  name = "libbad",
  version = "0.9",
  stages = { compile = [[echo 'fatal: undefined reference to main' >&2; exit 2]] },
}
"#,
    )],
  );

  env
    .kiln()
    .arg("build")
    .assert()
    .code(5)
    .stderr(predicate::str::contains("libbad@0.9: compile stage failed"))
    .stderr(predicate::str::contains("fatal: undefined reference to main"));
  assert!(!env.path().join("bin").exists());
}

#[test]
fn release_without_signing_credentials_fails_assembly() {
  let env = hello();
  let (code, report) = env.json(&["build", "--release"]);
  assert_eq!(code, Some(6));
  assert_eq!(report["category"], "assembly");
  assert!(report["errors"][0]["message"].as_str().unwrap().contains("KILN_KEYSTORE"));
}

#[test]
fn clean_removes_project_outputs_but_keeps_the_cache() {
  let env = hello();
  env.kiln().arg("build").assert().success();

  env.kiln().arg("clean").assert().success().stdout(predicate::str::contains("Clean complete"));
  assert!(!env.path().join(".kiln").exists());
  assert!(!env.path().join("bin").exists());
  assert!(env.cache_path().join("v1/builds/arm64-v8a").is_dir());

  let (code, report) = env.json(&["build"]);
  assert_eq!(code, Some(0));
  assert!(
    report["archs"][0]["build"]["recipes"]
      .as_array()
      .unwrap()
      .iter()
      .all(|r| r["outcome"] == "cached")
  );
}

#[test]
fn clean_all_forces_a_full_rebuild() {
  let env = hello();
  env.kiln().arg("build").assert().success();
  env.kiln().args(["clean", "--all"]).assert().success();
  assert!(!env.cache_path().join("v1").exists());

  let (_, report) = env.json(&["build"]);
  assert!(
    report["archs"][0]["build"]["recipes"]
      .as_array()
      .unwrap()
      .iter()
      .all(|r| r["outcome"] == "built")
  );
}
