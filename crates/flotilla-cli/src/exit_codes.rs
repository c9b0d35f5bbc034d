//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Validation error - one or more documents failed their schema
pub const VALIDATION_ERROR: i32 = 2;

/// Document error - manifest structure, references or overrides are wrong
pub const DOCUMENT_ERROR: i32 = 3;

/// Sync error - a release operation, readiness wait or lifecycle action failed
pub const SYNC_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;

/// Service unavailable - release service or cluster cannot be reached (sysexits.h)
pub const UNAVAILABLE: i32 = 69;
