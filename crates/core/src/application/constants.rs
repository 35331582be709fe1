// Connection-layer constants (no magic values in the retry loop)
use std::time::Duration;

/// Attempts per query, including the first one
pub const QUERY_MAX_ATTEMPTS: u32 = 10;

/// Constant delay between query attempts (1s)
pub const QUERY_FIRST_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Attempts per statement batch, including the first one
pub const EXECUTE_MAX_ATTEMPTS: u32 = 10;

/// Delay after the first failed batch attempt (2s); grows linearly afterwards
pub const EXECUTE_FIRST_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Successful operations slower than this are logged as slow (1s)
pub const SLOW_OPERATION_THRESHOLD: Duration = Duration::from_secs(1);

/// Statement and argument log fields are cut to this many bytes
pub const LOG_TRUNCATE_LEN: usize = 1024;
