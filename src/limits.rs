use crate::model::{DAY_MS, Ms};

/// 2000-01-01T00:00:00Z. Anything earlier is a client clock bug.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z. The open-ended sentinel is exempt.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// Longest closed window a single booking may cover (a yearly package).
pub const MAX_SPAN_DURATION_MS: Ms = 366 * DAY_MS;
/// Widest window an availability / free-slot query may scan.
pub const MAX_QUERY_WINDOW_MS: Ms = 400 * DAY_MS;

pub const MAX_RESOURCES_PER_BOOKING: usize = 64;
pub const MAX_RECORDS_PER_RESOURCE: usize = 100_000;
pub const MAX_SEATS: u32 = 1_000;

pub const MAX_NAME_LEN: usize = 120;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_PACKAGE_NAME_LEN: usize = 120;
pub const MAX_STAFF_ID_LEN: usize = 256;
pub const MAX_ATTEMPTS: u32 = 1_000;
