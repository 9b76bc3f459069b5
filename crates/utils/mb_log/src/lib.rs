//! Text logging used by all mesh-builder telemetry crates.
//!
//! Library crates only ever *emit* log records through the re-exported macros:
//!
//! ```
//! mb_log::info!("Session started");
//! mb_log::warn_once!("Probe unavailable, reporting zeros");
//! ```
//!
//! Binaries call [`setup_logging`] once at the top of `main`.

use std::collections::HashSet;
use std::sync::LazyLock;

use parking_lot::Mutex;

pub use log::{Level, LevelFilter, debug, error, info, trace, warn};

/// The filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Like [`warn!`], but only logs each distinct message once per process.
#[macro_export]
macro_rules! warn_once {
    ($($arg:tt)+) => {{
        let message = format!($($arg)+);
        if $crate::should_log_once(&message) {
            $crate::warn!("{message}");
        }
    }};
}

/// Like [`debug!`], but only logs each distinct message once per process.
#[macro_export]
macro_rules! debug_once {
    ($($arg:tt)+) => {{
        let message = format!($($arg)+);
        if $crate::should_log_once(&message) {
            $crate::debug!("{message}");
        }
    }};
}

/// Returns `true` the first time it sees `message`.
#[doc(hidden)]
pub fn should_log_once(message: &str) -> bool {
    static SEEN: LazyLock<Mutex<HashSet<String>>> = LazyLock::new(Default::default);

    let mut seen = SEEN.lock();
    if seen.contains(message) {
        false
    } else {
        seen.insert(message.to_owned());
        true
    }
}

/// The log filter, taken from `RUST_LOG` if set.
pub fn default_log_filter() -> String {
    let base = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_owned());

    // The channel logs every flush at debug level, which drowns out everything else.
    if base.contains("mb_smart_channel") {
        base
    } else {
        format!("{base},mb_smart_channel=info")
    }
}

/// Directs [`log`] calls to stderr.
///
/// Safe to call more than once; only the first call has an effect.
pub fn setup_logging() {
    static START: std::sync::Once = std::sync::Once::new();

    START.call_once(|| {
        let mut builder = env_logger::Builder::new();
        builder.parse_filters(&default_log_filter());
        if let Err(err) = builder.try_init() {
            // Someone else (e.g. a test harness) installed a logger first.
            eprintln!("mb_log: failed to install logger: {err}");
        }
    });
}
