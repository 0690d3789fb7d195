//! Plan resolution through the pipeline front end.

use kiln_lib::platform::TargetArch;

use crate::common::{Project, library};

#[test]
fn plan_lists_dependencies_first_for_each_arch() {
  let project = Project::new("app-lib");
  project.recipe("libbase", &library("libbase", &[], "lib/libbase.so", "base"));
  project.recipe("app-lib", &library("app-lib", &["libbase"], "share/app.txt", "app"));

  let mut options = project.options();
  options.archs = vec![TargetArch::Arm64V8a, TargetArch::X86_64];
  let report = project.pipeline().plan(&options).unwrap();

  assert_eq!(report.package_id, "org.example.demo");
  assert_eq!(report.archs.len(), 2);
  for arch in &report.archs {
    let ids: Vec<&str> = arch.steps.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["libbase@1.0", "app-lib@1.0"]);
    assert!(arch.steps.iter().all(|s| !s.cached));
    assert_eq!(arch.steps[1].deps, vec!["libbase@1.0"]);
  }
  assert_ne!(report.archs[0].steps[0].fingerprint, report.archs[1].steps[0].fingerprint);
}

#[test]
fn plan_has_no_side_effects() {
  let project = Project::new("libbase");
  project.recipe("libbase", &library("libbase", &[], "lib/libbase.so", "base"));

  project.pipeline().plan(&project.options()).unwrap();

  assert!(!project.path().join("cache").exists());
  assert!(!project.path().join(".kiln").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn plan_reports_cache_status_after_a_build() {
  let project = Project::new("libbase");
  project.recipe("libbase", &library("libbase", &[], "lib/libbase.so", "base"));
  let pipeline = project.pipeline();

  pipeline.run(&project.options()).await.unwrap();
  let report = pipeline.plan(&project.options()).unwrap();
  assert!(report.archs[0].steps[0].cached);
}

#[test]
fn every_unresolvable_arch_is_reported() {
  let project = Project::new("libx86");
  let recipe = library("libx86", &[], "lib/libx86.so", "x86").replace(
    "kind = \"library\",",
    "kind = \"library\",\n  archs = { \"x86_64\" },",
  );
  project.recipe("libx86", &recipe);

  let mut options = project.options();
  options.archs = vec![TargetArch::Arm64V8a, TargetArch::ArmeabiV7a];
  let err = project.pipeline().plan(&options).unwrap_err();

  assert_eq!(err.exit_code(), 3);
  let diagnostics = err.diagnostics();
  assert_eq!(diagnostics.len(), 2);
  assert!(diagnostics[0].message.starts_with("[arm64-v8a] "));
  assert!(diagnostics[1].message.starts_with("[armeabi-v7a] "));
  assert!(diagnostics.iter().all(|d| d.message.contains("libx86")));
}
