//! Handlers behind each subcommand. Reports go to stdout (text or `--json`),
//! diagnostics go through `tracing` to stderr.

use crate::cli::{
    AllowOnlyApprovedArgs, Cli, Command, FetchArgs, FetchDepsCommand, FilterCompilersArgs,
    SchemaKind, ValidateCommand,
};
use serde::Serialize;
use serde_json::json;
use spack_helpers::allowlist::resolve_names;
use spack_helpers::api::{ApiError, FilterOutput, ValidateOutput, Violation};
use spack_helpers::approve::{ApproveOutcome, allow_only_approved_packages};
use spack_helpers::checks::{
    allowed_compilers::run_allowed_compilers_check, approved::run_approved_packages_check,
    buildable::run_buildable_check, compiler_usage::run_compiler_usage_check,
    duplicates::run_duplicates_check,
};
use spack_helpers::config::{ConfigError, ConfigLayer, EnvManifest, SaveOptions};
use spack_helpers::env::{ConcretizationGap, Environment};
use spack_helpers::fetch::{
    DependencyFetcher, FetchError, FetchOptions, FetchReport, Language, ProcessRunner,
    RunnerLimits, SpackCli, select_nodes, warn_if_cache_unset,
};
use spack_helpers::filter::{FilterMode, FilterReport, FilterRequest, filter_compiler_packages};
use spack_helpers::graph::{GraphError, Lockfile};
use spack_helpers::policy::{PolicyConfig, run_policy};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{error, warn};

#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed to render JSON output: {0}")]
    Render(#[from] serde_json::Error),
}

impl CliError {
    pub(crate) fn code(&self) -> &'static str {
        match self {
            CliError::Config(e) => e.code(),
            CliError::Graph(e) => e.code(),
            CliError::Fetch(e) => e.code(),
            CliError::Render(_) => "cli.render_failed",
        }
    }
}

/// Runs the parsed command and returns the process exit code.
pub(crate) async fn run(cli: Cli) -> i32 {
    match &cli.command {
        Command::Validate(command) => validate(&cli, command),
        Command::FilterCompilers(args) => filter_compilers(&cli, args),
        Command::AllowOnlyApprovedPkgs(args) => allow_only_approved(&cli, args),
        Command::FetchDeps(command) => fetch_deps(&cli, command).await,
        Command::Schema { kind } => print_schema(*kind),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(ok: bool) -> i32 {
    if ok { 0 } else { 1 }
}

fn lower_scopes(cli: &Cli) -> Result<Vec<ConfigLayer>, ConfigError> {
    cli.config_scopes
        .iter()
        .map(|path| EnvManifest::load(path).map(|m| m.layer()))
        .collect()
}

fn validate(cli: &Cli, command: &ValidateCommand) -> i32 {
    let mut out = ValidateOutput::new(None);
    if let Err(e) = run_validate(cli, command, &mut out) {
        error!(code = e.code(), "{e}");
        out.fail(e.code(), e.to_string());
    }
    if cli.json
        && let Err(e) = print_json(&out)
    {
        error!(code = e.code(), "{e}");
        return 1;
    }
    exit_code(out.ok)
}

struct ConcretizedEnv {
    env: Environment,
    manifest: EnvManifest,
    lockfile: Lockfile,
}

fn load_concretized(cli: &Cli, out: &mut ValidateOutput) -> Result<ConcretizedEnv, CliError> {
    let env = Environment::discover(cli.env.as_deref())?;
    out.env_root = Some(env.root().display().to_string());
    let manifest = env.manifest()?;
    let lockfile = env.lockfile()?;
    out.lockfile_sha256 = Some(lockfile.sha256.clone());

    let gap = ConcretizationGap::between(&manifest.user_specs(), &lockfile.root_specs);
    gap.warn_if_incomplete();
    if !gap.is_empty() {
        out.observations.push(Violation::observation(
            "env.not_fully_concretized",
            "environment may not be fully concretized; run 'spack concretize' to update",
            None,
            Some(json!({
                "unconcretized": gap.unconcretized,
                "stale": gap.stale,
            })),
        ));
    }
    Ok(ConcretizedEnv {
        env,
        manifest,
        lockfile,
    })
}

fn print_listing(headline: &str, lines: &[String]) {
    println!("{headline}");
    for line in lines {
        println!("  {line}");
    }
}

fn run_validate(
    cli: &Cli,
    command: &ValidateCommand,
    out: &mut ValidateOutput,
) -> Result<(), CliError> {
    let loaded = load_concretized(cli, out)?;
    let graph = &loaded.lockfile.graph;
    let text = !cli.json;

    match command {
        ValidateCommand::CheckDuplicates {
            ignore_packages,
            ignore_build_deps,
        } => {
            let ignore: BTreeSet<String> = ignore_packages.iter().cloned().collect();
            let r = run_duplicates_check(graph, &ignore, *ignore_build_deps);
            if text {
                if r.duplicates.is_empty() {
                    println!("No duplicates found.");
                } else {
                    println!("Duplicates found!");
                    for (name, nodes) in &r.duplicates {
                        println!("\nPackage: {name}");
                        for node in nodes {
                            println!("  {node}");
                        }
                    }
                }
            }
            out.extend("duplicates", r.violations);
        }
        ValidateCommand::AllowPkgsForCompiler {
            compiler,
            packages,
            pkgs_from_file,
        } => {
            let allowed: BTreeSet<String> = resolve_names(packages, pkgs_from_file.as_deref())?
                .into_iter()
                .collect();
            let r = run_compiler_usage_check(graph, compiler, &allowed);
            if text {
                if r.offenders.is_empty() {
                    println!("All packages using compiler '{compiler}' are in the allowed list.");
                } else {
                    let lines: Vec<String> = r
                        .offenders
                        .iter()
                        .map(|n| format!("{n} (compiler: {compiler})"))
                        .collect();
                    print_listing(
                        &format!(
                            "Found {} package(s) using compiler '{compiler}' that are not in the allowed list!",
                            r.offenders.len()
                        ),
                        &lines,
                    );
                }
            }
            out.extend(&format!("compiler_usage:{compiler}"), r.violations);
        }
        ValidateCommand::Compilers { compilers } => {
            let r = run_allowed_compilers_check(graph, compilers);
            if r.patterns.is_empty() {
                return Err(ConfigError::NoCompilersSpecified.into());
            }
            if text {
                if r.violations.is_empty() {
                    println!("All specs use allowed compilers.");
                } else {
                    let lines: Vec<String> = r.violations.iter().map(|v| v.message.clone()).collect();
                    print_listing(
                        &format!(
                            "Found {} spec(s) using disallowed compiler(s)!",
                            r.violations.len()
                        ),
                        &lines,
                    );
                }
            }
            out.extend("allowed_compilers", r.violations);
        }
        ValidateCommand::CheckApprovedPkgs(list) => {
            let approved: BTreeSet<String> =
                resolve_names(&list.packages, list.pkgs_from_file.as_deref())?
                    .into_iter()
                    .collect();
            if approved.is_empty() {
                return Err(ConfigError::NoPackagesSpecified.into());
            }
            let r = run_approved_packages_check(graph, &approved);
            if text {
                if r.unauthorized.is_empty() {
                    println!("All packages are approved.");
                } else {
                    let lines: Vec<String> = r.unauthorized.iter().map(ToString::to_string).collect();
                    print_listing(
                        &format!("Found {} unauthorized package(s)!", r.unauthorized.len()),
                        &lines,
                    );
                }
            }
            out.extend("approved_packages", r.violations);
        }
        ValidateCommand::CheckBuildable => {
            let stack = loaded
                .env
                .config_stack(&loaded.manifest, &cli.config_scopes)?;
            let r = run_buildable_check(graph, &stack.effective_packages());
            if text {
                if r.offenders.is_empty() {
                    println!("All buildable:false packages come from externals.");
                } else {
                    let lines: Vec<String> = r.offenders.iter().map(ToString::to_string).collect();
                    print_listing(
                        &format!(
                            "Found {} package(s) built from source despite buildable:false!",
                            r.offenders.len()
                        ),
                        &lines,
                    );
                }
            }
            out.extend("buildable", r.violations);
        }
        ValidateCommand::Run { policy } => {
            let config = PolicyConfig::load(policy)?;
            if config.is_empty() {
                warn!(policy = %policy.display(), "policy configures no checks");
            }
            let base_dir = policy.parent().unwrap_or(Path::new("."));
            let stack = loaded
                .env
                .config_stack(&loaded.manifest, &cli.config_scopes)?;
            run_policy(&config, graph, &stack.effective_packages(), base_dir, out)?;
            if text {
                if out.violations.is_empty() {
                    println!("All {} policy check(s) passed.", out.checks_run.len());
                } else {
                    let lines: Vec<String> =
                        out.violations.iter().map(|v| v.message.clone()).collect();
                    print_listing(
                        &format!(
                            "Found {} violation(s) across {} check(s)!",
                            out.violations.len(),
                            out.checks_run.len()
                        ),
                        &lines,
                    );
                }
            }
        }
    }
    Ok(())
}

fn filter_compilers(cli: &Cli, args: &FilterCompilersArgs) -> i32 {
    let out = match run_filter(cli, args) {
        Ok(report) => FilterOutput {
            ok: true,
            error: None,
            modified_count: report.outcome.modified_count(),
            modified: report.outcome.overrides.keys().cloned().collect(),
            manifest_written: report.manifest_written,
        },
        Err(e) => {
            error!(code = e.code(), "error filtering compiler packages: {e}");
            FilterOutput {
                ok: false,
                error: Some(ApiError {
                    code: e.code().to_string(),
                    message: e.to_string(),
                }),
                modified_count: 0,
                modified: vec![],
                manifest_written: false,
            }
        }
    };
    if cli.json
        && let Err(e) = print_json(&out)
    {
        error!(code = e.code(), "{e}");
        return 1;
    }
    exit_code(out.ok)
}

fn run_filter(cli: &Cli, args: &FilterCompilersArgs) -> Result<FilterReport, CliError> {
    let env = Environment::discover(cli.env.as_deref())?;
    let mut manifest = env.manifest()?;
    let lower = lower_scopes(cli)?;
    let mode = if args.keep_only {
        FilterMode::KeepOnly
    } else {
        FilterMode::Remove
    };
    let request = FilterRequest {
        patterns: args.compiler_specs.clone(),
        mode,
        all_compilers_unbuildable: args.all_compilers_unbuildable,
        save: SaveOptions {
            backup: args.backup,
        },
    };
    Ok(filter_compiler_packages(&mut manifest, &lower, &request)?)
}

fn allow_only_approved(cli: &Cli, args: &AllowOnlyApprovedArgs) -> i32 {
    match run_allow_only_approved(cli, args) {
        Ok(outcome) => {
            if cli.json
                && let Err(e) = print_json(&outcome)
            {
                error!(code = e.code(), "{e}");
                return 1;
            }
            0
        }
        Err(e) => {
            error!(code = e.code(), "{e}");
            1
        }
    }
}

fn run_allow_only_approved(
    cli: &Cli,
    args: &AllowOnlyApprovedArgs,
) -> Result<ApproveOutcome, CliError> {
    let env = Environment::discover(cli.env.as_deref())?;
    let mut manifest = env.manifest()?;
    let approved = resolve_names(&args.list.packages, args.list.pkgs_from_file.as_deref())?;
    let outcome = allow_only_approved_packages(
        &mut manifest,
        &approved,
        env.is_concretized(),
        SaveOptions {
            backup: args.backup,
        },
    )?;
    Ok(outcome)
}

async fn fetch_deps(cli: &Cli, command: &FetchDepsCommand) -> i32 {
    let (language, common, use_spack) = match command {
        FetchDepsCommand::Go {
            common,
            use_spack_go,
        } => (Language::Go, common, *use_spack_go),
        FetchDepsCommand::Rust {
            common,
            use_spack_rust,
        } => (Language::Rust, common, *use_spack_rust),
    };
    match run_fetch(cli, language, common, use_spack).await {
        Ok(report) => {
            if cli.json
                && let Err(e) = print_json(&report)
            {
                error!(code = e.code(), "{e}");
                return 1;
            }
            0
        }
        Err(e) => {
            error!(
                code = e.code(),
                "failed to fetch {} dependencies: {e}",
                language.dependency()
            );
            1
        }
    }
}

async fn run_fetch(
    cli: &Cli,
    language: Language,
    common: &FetchArgs,
    use_spack: bool,
) -> Result<FetchReport, CliError> {
    let env = Environment::discover(cli.env.as_deref())?;
    let lockfile = env.lockfile()?;
    warn_if_cache_unset(language, std::env::var_os(language.cache_env()).as_ref());

    let nodes = select_nodes(&lockfile.graph, language, &common.specs);
    if nodes.is_empty() {
        warn!("no specs found to process");
        return Ok(FetchReport::default());
    }

    let runner = ProcessRunner {
        limits: RunnerLimits {
            timeout_ms: common.timeout_ms,
            ..RunnerLimits::default()
        },
    };
    let spack = SpackCli::new(common.spack.clone(), env.root(), runner.clone());
    let fetcher = DependencyFetcher::new(&lockfile.graph, &spack, &spack, &runner);
    let options = FetchOptions {
        language,
        patterns: common.specs.clone(),
        use_spack,
        search_path: std::env::var_os("PATH"),
    };
    Ok(fetcher.fetch(&nodes, &options).await?)
}

fn print_schema(kind: SchemaKind) -> i32 {
    let schema = match kind {
        SchemaKind::ValidateOutput => schemars::schema_for!(ValidateOutput),
        SchemaKind::FilterOutput => schemars::schema_for!(FilterOutput),
        SchemaKind::Policy => schemars::schema_for!(PolicyConfig),
    };
    match print_json(&schema) {
        Ok(()) => 0,
        Err(e) => {
            error!(code = e.code(), "{e}");
            1
        }
    }
}
