//! CLI Exit Code Registry
//!
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! | Code | Description                                   |
//! |------|-----------------------------------------------|
//! | 0    | Success                                       |
//! | 1    | General error                                 |
//! | 2    | Usage error (bad arguments, bad edit spec)    |
//! | 3    | I/O error (missing or unwritable file)        |
//! | 4    | Parse error (grid or error map is not valid)  |
//! | 5    | Invalid data found (`validate --strict-exit`) |

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, malformed edit specs.
pub const EXIT_USAGE: u8 = 2;

/// A file could not be read or written.
pub const EXIT_IO: u8 = 3;

/// Input JSON did not decode.
pub const EXIT_PARSE: u8 = 4;

/// Validation found invalid cells and `--strict-exit` was given.
pub const EXIT_INVALID_DATA: u8 = 5;
