//! Desired-state rendering and decoding
//!
//! A [`ManifestSource`] turns an artifact name into bytes; the
//! [`SchemeRegistry`] decodes those bytes into exactly one typed
//! [`DesiredObject`].

mod scheme;
mod templates;

use crate::Result;

pub use scheme::{DesiredObject, SchemeRegistry};
pub use templates::{BoundManifests, ManifestTemplates};

/// Renders named artifacts to manifest bytes
#[cfg_attr(test, mockall::automock)]
pub trait ManifestSource: Send + Sync {
    /// Render `artifact`; [`crate::Error::NotFound`] when it is unknown
    fn render(&self, artifact: &str) -> Result<Vec<u8>>;
}
