//! Exit code constants for the leasehold CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid config)
//! - 2: Store failure (unreachable or corrupt record store)
//! - 3: Lease unavailable (held by another owner, wait bound elapsed)
//! - 4: Lease lost or interrupted while held

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments or invalid configuration.
pub const USER_ERROR: i32 = 1;

/// Store failure: the record store rejected or could not serve a request.
pub const STORE_FAILURE: i32 = 2;

/// The lease is held by another owner and could not be acquired in time.
pub const LOCK_UNAVAILABLE: i32 = 3;

/// The lease was invalidated or the acquisition was interrupted.
pub const LEASE_LOST: i32 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [SUCCESS, USER_ERROR, STORE_FAILURE, LOCK_UNAVAILABLE, LEASE_LOST];
        for (i, &a) in codes.iter().enumerate() {
            for (j, &b) in codes.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b, "Exit codes must be distinct");
                }
            }
        }
    }

    #[test]
    fn success_is_zero() {
        assert_eq!(SUCCESS, 0);
    }
}
