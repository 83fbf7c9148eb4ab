//! Process-wide tracing setup shared by binaries and test harnesses.

/// Initialize tracing with the format named by `FOLIO_LOG_FORMAT`
/// (`json` unless set to `pretty`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    let format = std::env::var("FOLIO_LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    tracing::init_with(format);
}

pub use self::tracing::{LogFormat, init_with};

/// Subscriber configuration (filters, formats).
pub mod tracing;
