//! Tracing and logging setup shared by binaries.

/// Tracing subscriber configuration (format, filters).
pub mod tracing;

pub use self::tracing::{LogFormat, ParseLogFormatError};

/// Initialize process-wide logging from `LOG_FORMAT` and `RUST_LOG`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    self::tracing::init();
}

/// Initialize with an explicit output format.
pub fn init_with(format: LogFormat) {
    self::tracing::init_with(format);
}
