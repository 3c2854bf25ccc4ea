//! Fetch de-duplication and cached list views

pub mod fetch;
pub mod list;

pub use fetch::{FetchCache, FetchError, FetchHandle, FetchState};
pub use list::ListCache;
