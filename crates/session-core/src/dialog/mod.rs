//! SIP dialog state

pub mod dialog_path;

pub use dialog_path::{generate_call_id, generate_tag, parse_delta_seconds, DialogPath};
