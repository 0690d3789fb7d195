//! End-to-end pipeline runs with real stage scripts.

use kiln_lib::build::RecipeOutcome;
use kiln_lib::pipeline::{ErrorCategory, PipelineError};
use tokio_util::sync::CancellationToken;

use crate::common::{Project, library, sha256_file, write_tar_gz};

#[tokio::test]
async fn builds_stages_and_packages_a_project() {
  let project = Project::new("app-lib");
  project.recipe("libbase", &library("libbase", &[], "lib/libbase.so", "base"));
  project.recipe(
    "app-lib",
    &library("app-lib", &["libbase"], "share/app/data.txt", "data"),
  );

  let report = project.pipeline().run(&project.options()).await.unwrap();

  assert_eq!(report.archs.len(), 1);
  let arch = &report.archs[0];
  assert_eq!(arch.plan, vec!["libbase@1.0", "app-lib@1.0"]);
  assert_eq!(arch.build.built(), 2);

  let tree = &arch.package.tree;
  assert!(tree.join("assets/app/main.py").is_file());
  assert!(tree.join("lib/arm64-v8a/libbase.so").is_file());
  assert_eq!(
    std::fs::read_to_string(tree.join("assets/runtime/share/app/data.txt")).unwrap(),
    "data"
  );
  let manifest = std::fs::read_to_string(tree.join("AndroidManifest.xml")).unwrap();
  assert!(manifest.contains("package=\"org.example.demo\""));
  assert!(manifest.contains("android.permission.INTERNET"));

  let artifact = &arch.package.artifact;
  let root = dunce::canonicalize(project.path()).unwrap();
  assert_eq!(artifact, &root.join("bin/demo-0.1.0-arm64-v8a-debug.apk"));
  assert_eq!(sha256_file(artifact), arch.package.sha256);
}

#[tokio::test]
async fn second_run_is_a_cache_hit_with_identical_output() {
  let project = Project::new("libbase");
  project.recipe("libbase", &library("libbase", &[], "lib/libbase.so", "base"));
  let pipeline = project.pipeline();

  let first = pipeline.run(&project.options()).await.unwrap();
  let second = pipeline.run(&project.options()).await.unwrap();

  assert_eq!(first.built(), 1);
  assert_eq!(second.built(), 0);
  assert_eq!(second.cached(), 1);
  assert_eq!(
    second.archs[0].build.get("libbase").unwrap().outcome,
    RecipeOutcome::Cached
  );
  assert_eq!(first.archs[0].package.sha256, second.archs[0].package.sha256);
}

#[tokio::test]
async fn changing_a_recipe_rebuilds_only_it_and_its_dependents() {
  let project = Project::new("app-lib, libother");
  project.recipe("libbase", &library("libbase", &[], "lib/libbase.so", "v1"));
  project.recipe("app-lib", &library("app-lib", &["libbase"], "share/app.txt", "app"));
  project.recipe("libother", &library("libother", &[], "lib/libother.so", "other"));
  let pipeline = project.pipeline();
  pipeline.run(&project.options()).await.unwrap();

  project.recipe("libbase", &library("libbase", &[], "lib/libbase.so", "v2"));
  let report = pipeline.run(&project.options()).await.unwrap();

  let build = &report.archs[0].build;
  assert_eq!(build.get("libbase").unwrap().outcome, RecipeOutcome::Built);
  assert_eq!(build.get("app-lib").unwrap().outcome, RecipeOutcome::Built);
  assert_eq!(build.get("libother").unwrap().outcome, RecipeOutcome::Cached);
  assert_eq!(
    std::fs::read_to_string(report.archs[0].package.tree.join("lib/arm64-v8a/libbase.so")).unwrap(),
    "v2"
  );
}

#[tokio::test]
async fn failing_recipe_reports_stage_and_keeps_independent_work() {
  let project = Project::new("libgood, app-lib");
  project.recipe("libgood", &library("libgood", &[], "lib/libgood.so", "ok"));
  project.recipe(
    "libbroken",
    r#"return {
  name = "libbroken",
  version = "1.0",
  stages = { configure = [[echo 'configure: error: C compiler cannot create executables' >&2; exit 77]] },
}
"#,
  );
  project.recipe("app-lib", &library("app-lib", &["libbroken"], "share/app.txt", "app"));

  let err = project.pipeline().run(&project.options()).await.unwrap_err();
  assert_eq!(err.category(), ErrorCategory::Build);
  assert_eq!(err.exit_code(), 5);

  let diagnostics = err.diagnostics();
  let broken = diagnostics
    .iter()
    .find(|d| d.message.contains("libbroken@1.0: configure stage failed"))
    .unwrap();
  assert!(
    broken
      .output
      .as_deref()
      .unwrap()
      .contains("configure: error: C compiler cannot create executables")
  );
  assert!(diagnostics.iter().any(|d| d.message.contains("app-lib@1.0 skipped")));

  let entries = project.build_entries("arm64-v8a");
  assert_eq!(entries.len(), 1);
  assert!(entries[0].starts_with("libgood-1.0-"));
  assert!(!project.path().join("bin").exists());
}

#[tokio::test]
async fn toolchains_are_provisioned_and_on_the_stage_path() {
  let project = Project::new("libtooled");
  let archive = project.path().join("hosttool-1.0.tar.gz");
  write_tar_gz(
    &archive,
    &[("hosttool-1.0/bin/hosttool", "#!/bin/sh\necho from-toolchain\n")],
  );
  project.recipe(
    "hosttool",
    &format!(
      "return {{ name = \"hosttool\", version = \"1.0\", kind = \"toolchain\", url = \"file://{}\", sha256 = \"{}\" }}\n",
      archive.display(),
      sha256_file(&archive)
    ),
  );
  project.recipe(
    "libtooled",
    r#"return {
  name = "libtooled",
  version = "1.0",
  depends = { "hosttool" },
  stages = { install = [[mkdir -p "$KILN_PREFIX/share" && hosttool > "$KILN_PREFIX/share/tool.txt"]] },
}
"#,
  );

  let report = project.pipeline().run(&project.options()).await.unwrap();

  assert_eq!(report.toolchains.len(), 1);
  assert!(!report.toolchains[0].cached);
  assert!(report.toolchains[0].bin_dir().join("hosttool").is_file());
  assert_eq!(
    std::fs::read_to_string(report.archs[0].package.tree.join("assets/runtime/share/tool.txt")).unwrap(),
    "from-toolchain\n"
  );

  let again = project.pipeline().run(&project.options()).await.unwrap();
  assert!(again.toolchains[0].cached);
}

#[tokio::test]
async fn checksum_mismatch_is_a_provisioning_error() {
  let project = Project::new("hosttool");
  let archive = project.path().join("hosttool-1.0.tar.gz");
  write_tar_gz(&archive, &[("bin/hosttool", "#!/bin/sh\n")]);
  project.recipe(
    "hosttool",
    &format!(
      "return {{ name = \"hosttool\", version = \"1.0\", kind = \"toolchain\", url = \"file://{}\", sha256 = \"{}\" }}\n",
      archive.display(),
      "0".repeat(64)
    ),
  );

  let err = project.pipeline().run(&project.options()).await.unwrap_err();
  assert_eq!(err.exit_code(), 4);
  assert!(err.diagnostics()[0].message.contains("checksum mismatch for toolchain hosttool@1.0"));
  let toolchains = project.layout().toolchains_dir();
  let leftovers = std::fs::read_dir(&toolchains)
    .map(|entries| entries.flatten().filter(|e| e.file_name().to_string_lossy().starts_with("hosttool-")).count())
    .unwrap_or(0);
  assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn unresolved_requirement_fails_before_any_work() {
  let project = Project::new("libmissing");

  let err = project.pipeline().run(&project.options()).await.unwrap_err();
  assert!(matches!(err, PipelineError::Resolve { .. }));
  assert_eq!(err.exit_code(), 3);
  assert!(err.to_string().contains("libmissing"));
  assert!(project.build_entries("arm64-v8a").is_empty());
  assert!(!project.path().join(".kiln").exists());
}

#[tokio::test]
async fn invalid_manifest_is_a_validation_error() {
  let project = Project::new("libbase");
  project.write("kiln.spec", "[app]\ntitle = Broken\npackage.name = demo\n");

  let err = project.pipeline().run(&project.options()).await.unwrap_err();
  assert_eq!(err.exit_code(), 2);
  let message = err.to_string();
  assert!(message.contains("app.package.domain"));
  assert!(message.contains("app.version"));
}

#[tokio::test]
async fn clean_build_discards_cached_entries() {
  let project = Project::new("libbase");
  project.recipe("libbase", &library("libbase", &[], "lib/libbase.so", "base"));
  let pipeline = project.pipeline();
  pipeline.run(&project.options()).await.unwrap();

  let mut options = project.options();
  options.clean = true;
  let report = pipeline.run(&options).await.unwrap();
  assert_eq!(report.built(), 1);
  assert_eq!(report.cached(), 0);
}

#[tokio::test]
async fn missing_include_pattern_is_an_assembly_error() {
  let project = Project::new("libbase");
  project.recipe("libbase", &library("libbase", &[], "lib/libbase.so", "base"));
  let spec = std::fs::read_to_string(project.manifest_path()).unwrap();
  project.write("kiln.spec", &format!("{}source.include_patterns = fonts/*.ttf\n", spec));

  let err = project.pipeline().run(&project.options()).await.unwrap_err();
  assert_eq!(err.exit_code(), 6);
  assert!(err.to_string().contains("fonts/*.ttf"));
}

#[cfg(unix)]
#[tokio::test]
async fn cancellation_interrupts_a_running_build() {
  let project = Project::new("libslow");
  project.recipe(
    "libslow",
    r#"return {
  name = "libslow",
  version = "1.0",
  kind = "library",
  stages = { compile = "sleep 30" },
}
"#,
  );

  let cancel = CancellationToken::new();
  let pipeline = project.pipeline().with_cancellation(cancel.clone());
  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    trigger.cancel();
  });

  let err = pipeline.run(&project.options()).await.unwrap_err();
  assert!(matches!(err, PipelineError::Interrupted));
  assert_eq!(err.exit_code(), 130);
  assert_eq!(err.category(), ErrorCategory::Interrupted);
  assert!(project.build_entries("arm64-v8a").is_empty());
  assert!(!project.path().join("bin").exists());
}
