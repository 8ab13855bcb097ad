//! Provide tracing, tailored to this service.
//!
//! The daemon calls [`init_journald_or_stdout`] once at startup to install a
//! tracing subscriber. The rest of the crate can `use crate::tracing::prelude::*`
//! for the `trace!()`, `debug!()`, `info!()`, `warn!()`, and `error!()`
//! macros.
//!
//! Both outputs share one filter: `RUST_LOG` when it parses, otherwise
//! [`DEFAULT_FILTER`], which keeps the HTTP client and server internals quiet.

use std::env;
use time::{macros::format_description, OffsetDateTime, UtcOffset};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info,hyper=warn,hyper_util=warn,reqwest=warn";

/// Initialize logging.
///
/// If running under systemd, use journald; otherwise fall back to stdout.
pub fn init_journald_or_stdout() {
    let rust_log = env::var("RUST_LOG").ok();
    let filter = build_filter(rust_log.as_deref());

    if env::var("JOURNAL_STREAM").is_ok() {
        match tracing_journald::layer() {
            Ok(layer) => tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init(),
            Err(e) => {
                use_stdout(filter);
                error!(error = %e, "Failed to initialize journald logging, using stdout.");
            }
        }
    } else {
        use_stdout(filter);
    }

    if rust_log.is_some_and(|directives| EnvFilter::try_new(directives).is_err()) {
        warn!(default = DEFAULT_FILTER, "Ignoring invalid RUST_LOG");
    }
}

/// Parse `rust_log`, falling back to [`DEFAULT_FILTER`].
pub fn build_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

fn use_stdout(filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_timer(UtcTimer))
        .init();
}

// UTC to the second, the same shape as the live data timestamps.
fn timestamp(now: OffsetDateTime) -> Result<String, time::error::Format> {
    now.to_offset(UtcOffset::UTC)
        .format(format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z"))
}

struct UtcTimer;

impl FormatTime for UtcTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let formatted = timestamp(OffsetDateTime::now_utc()).map_err(|_| std::fmt::Error)?;
        write!(w, "{}", formatted)
    }
}
