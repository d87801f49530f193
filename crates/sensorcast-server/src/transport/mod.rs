//! Transport layer: the feed consumer, stdio feed and HTTP API.

pub mod feed;
pub mod http;
pub mod stdio;

pub use http::{router, AppState};
pub use stdio::StdioFeed;
