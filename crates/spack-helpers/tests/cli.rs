use spack_helpers::api::{FilterOutput, ValidateOutput};
use std::path::Path;
use std::process::{Command, Output};

const LOCK: &str = r#"{
  "_meta": {"file-type": "spack-lockfile", "lockfile-version": 6, "specfile-version": 5},
  "roots": [
    {"hash": "dwfaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "spec": "libdwarf"}
  ],
  "concrete_specs": {
    "dwfaaaaaaaaaaaaaaaaaaaaaaaaaaaaa": {
      "name": "libdwarf",
      "version": "20180129",
      "parameters": {"build_system": "makefile", "cflags": []},
      "dependencies": [
        {"name": "libelf", "hash": "elfaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "parameters": {"deptypes": ["build", "link"], "virtuals": []}},
        {"name": "zlib", "hash": "zl1aaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "parameters": {"deptypes": ["build", "link"], "virtuals": []}},
        {"name": "gcc", "hash": "gccaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "parameters": {"deptypes": ["build"], "virtuals": ["c", "cxx"]}},
        {"name": "gmake", "hash": "gmkaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "parameters": {"deptypes": ["build"], "virtuals": []}}
      ]
    },
    "elfaaaaaaaaaaaaaaaaaaaaaaaaaaaaa": {
      "name": "libelf",
      "version": "0.8.13",
      "parameters": {"build_system": "autotools"},
      "dependencies": [
        {"name": "zlib", "hash": "zl2aaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "parameters": {"deptypes": ["build", "link"], "virtuals": []}},
        {"name": "gcc", "hash": "gccaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "parameters": {"deptypes": ["build"], "virtuals": ["c"]}},
        {"name": "gmake", "hash": "gmkaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "parameters": {"deptypes": ["build"], "virtuals": []}}
      ]
    },
    "zl1aaaaaaaaaaaaaaaaaaaaaaaaaaaaa": {"name": "zlib", "version": "1.3.1", "parameters": {"shared": true}},
    "zl2aaaaaaaaaaaaaaaaaaaaaaaaaaaaa": {"name": "zlib", "version": "1.3.1", "parameters": {"shared": false}},
    "gccaaaaaaaaaaaaaaaaaaaaaaaaaaaaa": {
      "name": "gcc",
      "version": "11.2.0",
      "parameters": {"languages": ["c", "c++", "fortran"]},
      "external": {"path": "/usr", "module": null, "extra_attributes": {}}
    },
    "gmkaaaaaaaaaaaaaaaaaaaaaaaaaaaaa": {"name": "gmake", "version": "4.4.1", "external": null}
  }
}"#;

const MANIFEST: &str = r#"spack:
  specs:
  - libdwarf
  view: false
  packages:
    gcc:
      buildable: false
      externals:
      - spec: gcc@11.2.0
        prefix: /usr
      - spec: gcc@10.3.0
        prefix: /opt/gcc-10
"#;

fn seed_env(dir: &Path, manifest: &str) {
    std::fs::write(dir.join("spack.yaml"), manifest).expect("write spack.yaml");
    std::fs::write(dir.join("spack.lock"), LOCK).expect("write spack.lock");
}

fn spack_helpers(env: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_spack-helpers"));
    cmd.arg("--env")
        .arg(env)
        .env_remove("SPACK_ENV")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1");
    cmd
}

fn run(cmd: &mut Command) -> Output {
    cmd.output().expect("run spack-helpers")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn validate_json(out: &Output) -> ValidateOutput {
    serde_json::from_slice(&out.stdout).unwrap_or_else(|e| {
        panic!(
            "parse ValidateOutput: {e}; stdout={} stderr={}",
            stdout(out),
            String::from_utf8_lossy(&out.stderr)
        )
    })
}

#[test]
fn check_duplicates_reports_and_honours_ignores() {
    let dir = tempfile::tempdir().expect("temp env");
    seed_env(dir.path(), MANIFEST);

    let out = run(spack_helpers(dir.path()).args(["validate", "check-duplicates"]));
    assert_eq!(out.status.code(), Some(1));
    let text = stdout(&out);
    assert!(text.contains("Duplicates found!"), "stdout={text}");
    assert!(text.contains("Package: zlib"));
    assert!(text.contains("  zlib@1.3.1/zl1aaaa"));
    assert!(text.contains("  zlib@1.3.1/zl2aaaa"));

    let out = run(spack_helpers(dir.path()).args(["validate", "check-duplicates", "-i", "zlib"]));
    assert_eq!(out.status.code(), Some(0));
    assert!(stdout(&out).contains("No duplicates found."));
}

#[test]
fn compiler_usage_json_lists_offenders() {
    let dir = tempfile::tempdir().expect("temp env");
    seed_env(dir.path(), MANIFEST);

    let out = run(spack_helpers(dir.path()).args([
        "--json",
        "validate",
        "allow-pkgs-for-compiler",
        "gcc",
        "gmake",
    ]));
    assert_eq!(out.status.code(), Some(1));
    let report = validate_json(&out);
    assert!(!report.ok);
    assert_eq!(report.checks_run, vec!["compiler_usage:gcc"]);
    let mut offenders: Vec<String> = report
        .violations
        .iter()
        .filter_map(|v| v.node.as_ref().map(|n| n.name.clone()))
        .collect();
    offenders.sort();
    assert_eq!(offenders, vec!["libdwarf", "libelf"]);
    assert!(report.lockfile_sha256.is_some_and(|h| h.len() == 64));

    let allowed = dir.path().join("allowed.txt");
    std::fs::write(&allowed, "# compiled with gcc\nlibdwarf\n\nlibelf\n").expect("write list");
    let out = run(spack_helpers(dir.path())
        .args(["validate", "allow-pkgs-for-compiler", "gcc", "--pkgs-from-file"])
        .arg(&allowed));
    assert_eq!(out.status.code(), Some(0));
    assert!(stdout(&out).contains("are in the allowed list"));
}

#[test]
fn allowed_compiler_versions() {
    let dir = tempfile::tempdir().expect("temp env");
    seed_env(dir.path(), MANIFEST);

    let out = run(spack_helpers(dir.path()).args(["validate", "compilers", "gcc@11"]));
    assert_eq!(out.status.code(), Some(0));
    assert!(stdout(&out).contains("All specs use allowed compilers."));

    let out = run(spack_helpers(dir.path()).args(["validate", "compilers", "gcc@12:", "llvm"]));
    assert_eq!(out.status.code(), Some(1));
    let text = stdout(&out);
    assert!(text.contains("Found 2 spec(s) using disallowed compiler(s)!"), "stdout={text}");
    assert!(text.contains("c provider: gcc@11.2.0/gccaaaa"));
}

#[test]
fn approved_packages_from_a_list_file() {
    let dir = tempfile::tempdir().expect("temp env");
    seed_env(dir.path(), MANIFEST);
    let list = dir.path().join("approved.txt");
    std::fs::write(&list, "libdwarf\nlibelf\nzlib\ngcc\n").expect("write list");

    let out = run(spack_helpers(dir.path())
        .args(["--json", "validate", "check-approved-pkgs", "--pkgs-from-file"])
        .arg(&list));
    assert_eq!(out.status.code(), Some(1));
    let report = validate_json(&out);
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].code, "approved_packages.unapproved");

    let out = run(spack_helpers(dir.path()).args([
        "validate",
        "check-approved-pkgs",
        "--packages",
        "libdwarf",
        "libelf",
        "zlib",
        "gcc",
        "gmake",
    ]));
    assert_eq!(out.status.code(), Some(0));
    assert!(stdout(&out).contains("All packages are approved."));
}

#[test]
fn buildable_policy_uses_the_manifest() {
    let dir = tempfile::tempdir().expect("temp env");
    seed_env(dir.path(), MANIFEST);
    let out = run(spack_helpers(dir.path()).args(["validate", "check-buildable"]));
    assert_eq!(out.status.code(), Some(0));

    let strict = format!("{MANIFEST}    libelf:\n      buildable: false\n");
    seed_env(dir.path(), &strict);
    let out = run(spack_helpers(dir.path()).args(["--json", "validate", "check-buildable"]));
    assert_eq!(out.status.code(), Some(1));
    let report = validate_json(&out);
    assert_eq!(report.violations.len(), 1);
    assert_eq!(
        report.violations[0].node.as_ref().map(|n| n.name.as_str()),
        Some("libelf")
    );
}

#[test]
fn stale_lockfile_is_an_observation_not_a_failure() {
    let dir = tempfile::tempdir().expect("temp env");
    seed_env(
        dir.path(),
        "spack:\n  specs:\n  - libdwarf\n  - hdf5+mpi\n",
    );
    let out = run(spack_helpers(dir.path()).args([
        "--json",
        "validate",
        "check-duplicates",
        "--ignore-package",
        "zlib",
    ]));
    assert_eq!(out.status.code(), Some(0));
    let report = validate_json(&out);
    assert!(report.ok);
    assert_eq!(report.observations.len(), 1);
    assert_eq!(report.observations[0].code, "env.not_fully_concretized");
}

#[test]
fn missing_environment_is_an_operational_error() {
    let out = run(Command::new(env!("CARGO_BIN_EXE_spack-helpers"))
        .args(["--json", "validate", "check-duplicates"])
        .env_remove("SPACK_ENV"));
    assert_eq!(out.status.code(), Some(1));
    let report = validate_json(&out);
    let error = report.error.expect("error object");
    assert_eq!(error.code, "config.no_active_environment");

    let dir = tempfile::tempdir().expect("temp env");
    std::fs::write(dir.path().join("spack.yaml"), MANIFEST).expect("write spack.yaml");
    let out = run(spack_helpers(dir.path()).args(["--json", "validate", "check-buildable"]));
    assert_eq!(out.status.code(), Some(1));
    let report = validate_json(&out);
    assert_eq!(
        report.error.map(|e| e.code),
        Some("graph.lockfile_read_failed".to_string())
    );
}

#[test]
fn spack_env_variable_selects_the_environment() {
    let dir = tempfile::tempdir().expect("temp env");
    seed_env(dir.path(), MANIFEST);
    let out = run(Command::new(env!("CARGO_BIN_EXE_spack-helpers"))
        .args(["validate", "check-duplicates", "--ignore-package", "zlib"])
        .env("SPACK_ENV", dir.path()));
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn policy_file_runs_every_configured_check() {
    let dir = tempfile::tempdir().expect("temp env");
    seed_env(dir.path(), MANIFEST);
    let policy = dir.path().join("policy.toml");
    std::fs::write(
        &policy,
        r#"
[duplicates]
ignore = ["zlib"]

[[compiler_usage]]
compiler = "gcc"
allowed = ["libdwarf"]

[allowed_compilers]
compilers = ["gcc@11.2.0"]

[buildable]
"#,
    )
    .expect("write policy");

    let out = run(spack_helpers(dir.path())
        .args(["--json", "validate", "run", "--policy"])
        .arg(&policy));
    assert_eq!(out.status.code(), Some(1));
    let report = validate_json(&out);
    assert_eq!(
        report.checks_run,
        vec!["duplicates", "compiler_usage:gcc", "allowed_compilers", "buildable"]
    );
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].code, "compiler_usage.not_allowed");

    std::fs::write(&policy, "[unknown]\n").expect("write policy");
    let out = run(spack_helpers(dir.path())
        .args(["--json", "validate", "run", "--policy"])
        .arg(&policy));
    assert_eq!(out.status.code(), Some(1));
    let report = validate_json(&out);
    assert_eq!(
        report.error.map(|e| e.code),
        Some("config.policy_parse_failed".to_string())
    );
}

#[test]
fn filter_compilers_rewrites_the_manifest() {
    let dir = tempfile::tempdir().expect("temp env");
    seed_env(dir.path(), MANIFEST);

    let out = run(spack_helpers(dir.path()).args([
        "--json",
        "filter-compilers",
        "gcc@11.2.0",
        "--keep-only",
        "--backup",
    ]));
    assert_eq!(
        out.status.code(),
        Some(0),
        "stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    let report: FilterOutput = serde_json::from_slice(&out.stdout).expect("parse FilterOutput");
    assert!(report.ok);
    assert_eq!(report.modified_count, 1);
    assert_eq!(report.modified, vec!["gcc"]);
    assert!(report.manifest_written);

    let written = std::fs::read_to_string(dir.path().join("spack.yaml")).expect("read manifest");
    assert!(!written.contains("gcc@10.3.0"));
    assert!(written.contains("gcc@11.2.0"));
    assert!(written.contains("libdwarf"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("spack.yaml.bkp")).expect("read backup"),
        MANIFEST
    );
}

#[test]
fn allow_only_approved_pkgs_sets_buildability() {
    let dir = tempfile::tempdir().expect("temp env");
    seed_env(dir.path(), MANIFEST);

    let out = run(spack_helpers(dir.path()).args([
        "allow-only-approved-pkgs",
        "--packages",
        "libdwarf",
        "gcc",
    ]));
    assert_eq!(out.status.code(), Some(0));

    let raw = std::fs::read_to_string(dir.path().join("spack.yaml")).expect("read manifest");
    let doc: serde_yaml::Value = serde_yaml::from_str(&raw).expect("yaml");
    let packages = &doc["spack"]["packages"];
    assert_eq!(packages["all"]["buildable"], serde_yaml::Value::Bool(false));
    assert_eq!(packages["libdwarf"]["buildable"], serde_yaml::Value::Bool(true));
    assert_eq!(packages["gcc"]["buildable"], serde_yaml::Value::Bool(false));
    assert!(String::from_utf8_lossy(&out.stderr).contains("spack concretize -f"));
}

#[test]
fn fetch_deps_without_consumers_is_a_no_op() {
    let dir = tempfile::tempdir().expect("temp env");
    seed_env(dir.path(), MANIFEST);
    let out = run(spack_helpers(dir.path())
        .args(["--json", "fetch-deps", "go", "--spack", "/nonexistent/spack"])
        .env("GOMODCACHE", dir.path()));
    assert_eq!(out.status.code(), Some(0));
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse report");
    assert_eq!(report["fetched"], serde_json::json!([]));
}

#[test]
fn schema_and_usage_errors() {
    let out = run(Command::new(env!("CARGO_BIN_EXE_spack-helpers")).args(["schema", "policy"]));
    assert_eq!(out.status.code(), Some(0));
    let schema: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse schema");
    assert!(schema["properties"]["compiler_usage"].is_object());

    let out = run(Command::new(env!("CARGO_BIN_EXE_spack-helpers")).args(["validate", "--bogus"]));
    assert_eq!(out.status.code(), Some(2));
}
