//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - configuration, IO or cluster connection failure
pub const ERROR: i32 = 1;

/// Interpolation error - a placeholder could not be resolved
pub const INTERPOLATION_ERROR: i32 = 3;

/// Resolution error - unknown alveolus, cycle or incompatible override
pub const RESOLUTION_ERROR: i32 = 4;

/// Apply error - a plan entry failed against the cluster
pub const APPLY_ERROR: i32 = 6;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
