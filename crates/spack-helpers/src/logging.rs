//! Diagnostics go to stderr through `tracing`; stdout is reserved for reports.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_DIRECTIVE: &str = "spack_helpers=info";

/// Filter directive for the given flags. `verbose` wins over `quiet`; with
/// neither, `RUST_LOG` applies when set.
pub fn filter_directive(verbose: bool, quiet: bool, rust_log: Option<&str>) -> String {
    if verbose {
        "spack_helpers=debug".to_string()
    } else if quiet {
        "spack_helpers=error".to_string()
    } else {
        match rust_log {
            Some(v) if !v.trim().is_empty() => v.to_string(),
            _ => DEFAULT_DIRECTIVE.to_string(),
        }
    }
}

/// Installs the global subscriber. Call once, before any logging.
pub fn init_logger(verbose: bool, quiet: bool) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let directive = filter_directive(verbose, quiet, rust_log.as_deref());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_ansi(std::env::var_os("NO_COLOR").is_none())
        .compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_flags_override_rust_log() {
        assert_eq!(filter_directive(true, true, Some("warn")), "spack_helpers=debug");
        assert_eq!(filter_directive(false, true, Some("warn")), "spack_helpers=error");
        assert_eq!(filter_directive(false, false, Some("warn")), "warn");
        assert_eq!(filter_directive(false, false, Some("  ")), DEFAULT_DIRECTIVE);
        assert_eq!(filter_directive(false, false, None), DEFAULT_DIRECTIVE);
    }
}
