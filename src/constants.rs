/// Terminates the request target line.
pub const TARGET_TERMINATOR: u8 = b'\n';

/// Served when the target names a directory root.
pub const DEFAULT_INDEX: &str = "index.html";

/// Shown in error page footers.
pub const SERVER_NAME: &str = "ferrofile";

pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";
