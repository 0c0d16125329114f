// SPDX-License-Identifier: MIT

//! UTC time handling with `no_std` fallback support.
//!
//! - In `std` mode, uses the system clock.
//! - In `no_std`, returns UNIX_EPOCH as fixed timestamp.

use time::OffsetDateTime;

/// Returns the current UTC time.
pub fn now_utc() -> OffsetDateTime {
    #[cfg(feature = "std")]
    {
        OffsetDateTime::now_utc()
    }

    #[cfg(not(feature = "std"))]
    {
        // Fallback: use UNIX_EPOCH (1970-01-01T00:00:00Z).
        OffsetDateTime::UNIX_EPOCH
    }
}
