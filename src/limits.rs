//! Hard limits guarding memory use and input sanity.

use crate::model::{DAY_MS, Ms};

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_USERS: usize = 100_000;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 4_000;
pub const MAX_EQUIPMENT_ITEMS: usize = 64;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

pub const MAX_RESERVATION_DURATION_MS: Ms = 31 * DAY_MS;
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;

pub const MAX_SERIES_OCCURRENCES: u32 = 366;
pub const MAX_IN_FILTER_ITEMS: usize = 64;
