//! Pixforge Core - shared types for the pixforge image generation client
//!
//! - `PixforgeError` - Error taxonomy and Result alias
//! - `ContentHash` - SHA-256 digest of generated image bytes
//! - `ImageFormat` - Output encodings and their file extensions

mod error;
mod format;
mod hash;

pub use error::{PixforgeError, Result};
pub use format::ImageFormat;
pub use hash::ContentHash;
