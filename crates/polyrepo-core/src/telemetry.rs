//! Log output of the polyrepo binary.
//!
//! Everything goes to stderr; stdout is left for the lines CI jobs read back
//! (`status=...`, `TAG_NAME=...`). Subprocess output is logged under the
//! `polyrepo::subprocess` target and stays visible without `--verbose`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
///
/// `--verbose` adds the command lines and step details logged at debug
/// level by polyrepo itself; other crates stay at info.
pub fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "info,polyrepo=debug"
    } else {
        "info"
    }
}

/// Install the global subscriber. Returns false when one was already set.
pub fn init_tracing(json: bool, verbose: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    let (plain, json) = if json {
        (
            None,
            Some(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .json(),
            ),
        )
    } else {
        (
            Some(fmt::layer().with_writer(std::io::stderr).with_target(false)),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .try_init()
        .is_ok()
}
