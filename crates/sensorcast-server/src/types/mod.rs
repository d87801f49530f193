//! Service types: errors and feed payloads.

pub mod error;
pub mod feed;

pub use error::{ServerError, ServerResult};
pub use feed::{decode_payload, parse_payload, DecodedPayload, FeedReading};
