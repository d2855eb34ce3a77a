//! Utility modules for nacre-ai

pub mod delimited;
pub mod retry;
pub mod text;

pub use delimited::{read_delimited_file, RawRow};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use text::{normalize_text, token_set_ratio, tokenize};
