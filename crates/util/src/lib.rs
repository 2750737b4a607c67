//! Helpers shared by the Signflow provider client, engine and CLI.

pub mod http;
pub mod paths;
pub mod redact;

pub use http::{JsonParseError, parse_response_json_strict, status_error_message, truncate_response_preview};
pub use paths::{STATE_DIR_ENV, default_journal_dir, expand_tilde_path};
pub use redact::{redact_sensitive, redact_sensitive_with};
