//! Frame-level I/O over the split halves of an async stream.

mod framed;

pub use framed::{FrameReader, FrameWriter};
