use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Policy checks and configuration helpers for Spack environments.
#[derive(Parser, Debug)]
#[command(name = "spack-helpers", version, about)]
pub(crate) struct Cli {
    /// Environment directory (default: $SPACK_ENV)
    #[arg(short = 'e', long = "env", global = true, value_name = "DIR")]
    pub env: Option<PathBuf>,

    /// Extra packages.yaml / spack.yaml scope, lowest precedence first; the
    /// environment manifest always wins
    #[arg(long = "config-scope", global = true, value_name = "FILE")]
    pub config_scopes: Vec<PathBuf>,

    /// Print a JSON report on stdout instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Validate a concretized environment
    #[command(subcommand)]
    Validate(ValidateCommand),
    /// Filter compiler externals in the environment's packages configuration
    FilterCompilers(FilterCompilersArgs),
    /// Make only approved packages buildable
    AllowOnlyApprovedPkgs(AllowOnlyApprovedArgs),
    /// Fetch language dependencies for staged packages
    #[command(subcommand)]
    FetchDeps(FetchDepsCommand),
    /// Print a JSON schema
    Schema {
        #[arg(value_enum, default_value_t = SchemaKind::ValidateOutput)]
        kind: SchemaKind,
    },
}

#[derive(Subcommand, Debug)]
pub(crate) enum ValidateCommand {
    /// Check for duplicate package installations
    CheckDuplicates {
        /// Package name to ignore (repeatable)
        #[arg(short = 'i', long = "ignore-package", value_name = "NAME")]
        ignore_packages: Vec<String>,
        /// Ignore packages that are only used as build dependencies
        #[arg(long)]
        ignore_build_deps: bool,
    },
    /// Ensure only the listed packages use a given compiler
    AllowPkgsForCompiler {
        /// Compiler package name (e.g. gcc, llvm)
        compiler: String,
        /// Packages allowed to use the compiler
        #[arg(required_unless_present = "pkgs_from_file")]
        packages: Vec<String>,
        /// Newline-delimited file of allowed package names
        #[arg(long, value_name = "FILE")]
        pkgs_from_file: Option<PathBuf>,
    },
    /// Ensure only the given compilers appear in the environment
    Compilers {
        /// Allowed compiler specs (e.g. gcc@11.2.0 llvm@17:)
        #[arg(required = true)]
        compilers: Vec<String>,
    },
    /// Ensure only approved packages appear in the environment
    CheckApprovedPkgs(PackageListArgs),
    /// Ensure buildable:false packages come from externals
    CheckBuildable,
    /// Run every check configured in a policy file
    Run {
        #[arg(long, value_name = "FILE")]
        policy: PathBuf,
    },
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("source").required(true).args(["packages", "pkgs_from_file"])))]
pub(crate) struct PackageListArgs {
    /// Approved package names
    #[arg(long, num_args = 1..)]
    pub packages: Vec<String>,
    /// Newline-delimited file of approved package names
    #[arg(long, value_name = "FILE")]
    pub pkgs_from_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct AllowOnlyApprovedArgs {
    #[command(flatten)]
    pub list: PackageListArgs,
    /// Keep a .bkp copy of the manifest before rewriting it
    #[arg(long)]
    pub backup: bool,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("mode").required(true).args(["remove", "keep_only"])))]
pub(crate) struct FilterCompilersArgs {
    /// Compiler specs to filter (e.g. gcc@11.2.0 clang@14)
    #[arg(required = true)]
    pub compiler_specs: Vec<String>,
    /// Remove the given compiler specs
    #[arg(long)]
    pub remove: bool,
    /// Keep only the given compiler specs
    #[arg(long)]
    pub keep_only: bool,
    /// Also mark the c, cxx and fortran virtuals unbuildable
    #[arg(long)]
    pub all_compilers_unbuildable: bool,
    /// Keep a .bkp copy of the manifest before rewriting it
    #[arg(long)]
    pub backup: bool,
}

#[derive(Subcommand, Debug)]
pub(crate) enum FetchDepsCommand {
    /// Fetch Go module dependencies
    Go {
        #[command(flatten)]
        common: FetchArgs,
        /// Install and use go from Spack instead of the system PATH
        #[arg(long)]
        use_spack_go: bool,
    },
    /// Fetch Rust/Cargo dependencies
    Rust {
        #[command(flatten)]
        common: FetchArgs,
        /// Install and use rust from Spack instead of the system PATH
        #[arg(long)]
        use_spack_rust: bool,
    },
}

#[derive(Args, Debug)]
pub(crate) struct FetchArgs {
    /// Specs to fetch for (default: every spec depending on the toolchain)
    pub specs: Vec<String>,
    /// Spack executable
    #[arg(long, default_value = "spack", value_name = "PATH")]
    pub spack: PathBuf,
    /// Per-command timeout
    #[arg(long, default_value_t = 1_800_000, value_name = "MS")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum SchemaKind {
    ValidateOutput,
    FilterOutput,
    Policy,
}
