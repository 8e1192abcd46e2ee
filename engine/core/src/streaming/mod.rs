//! Streaming Response Decoding
//!
//! Everything between raw backend bytes and [`StreamingToken`]s:
//!
//! - [`LineBuffer`]: byte chunks to complete lines
//! - [`ChunkDecoder`]: one JSON line to one fragment, per [`ChunkFormat`]
//! - [`RawTextFilter`]: noise removal for CLI stdout
//! - [`pump_response`]: the loop tying them together for HTTP bodies
//!
//! Stopping is cooperative: the loops select on a [`CancellationToken`] and
//! end with the text delivered so far.
//!
//! [`StreamingToken`]: crate::backend::StreamingToken
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

mod decoder;
mod lines;
mod pump;
mod raw_text;

pub use decoder::{ChunkDecoder, ChunkFormat, Decoded};
pub use lines::LineBuffer;
pub use pump::{pump_response, StreamEnd};
pub use raw_text::{RawLine, RawTextFilter};
