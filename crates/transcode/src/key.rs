use crate::error::{ErrorKind, Result};
use derive_more::Display;
use std::fmt::Write as _;

/// Requested output transform. An empty set of parameters means "just
/// re-encode the source".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TransformParameters {
    quality: Option<u8>,
    max_dimension: Option<u32>,
}

impl TransformParameters {
    /// Validate a requested transform.
    ///
    /// `quality` must be within `0..=100`, `max_dimension` must be positive.
    pub fn new(quality: Option<u32>, max_dimension: Option<u32>) -> Result<Self> {
        let quality = match quality {
            Some(q) if q > 100 => exn::bail!(ErrorKind::InvalidParameters(format!("quality {q} exceeds 100"))),
            // Bounds checked above.
            Some(q) => Some(q as u8),
            None => None,
        };
        if max_dimension == Some(0) {
            exn::bail!(ErrorKind::InvalidParameters("maxDimension must be positive".to_string()));
        }
        Ok(Self { quality, max_dimension })
    }

    pub fn quality(&self) -> Option<u8> {
        self.quality
    }

    pub fn max_dimension(&self) -> Option<u32> {
        self.max_dimension
    }

    pub fn is_empty(&self) -> bool {
        self.quality.is_none() && self.max_dimension.is_none()
    }
}

/// Identity of a transcode output.
///
/// Format: `<id>[_quality-<n>][_maxDimension-<n>]`, with each suffix present
/// only when the matching parameter is set. The key doubles as the cache
/// file name, so equal keys always mean byte-identical outputs.
#[derive(Debug, Clone, Display, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(id: &str, params: &TransformParameters) -> Self {
        let mut key = id.to_string();
        if let Some(quality) = params.quality {
            // Writing to a String cannot fail.
            let _ = write!(key, "_quality-{quality}");
        }
        if let Some(max_dimension) = params.max_dimension {
            let _ = write!(key, "_maxDimension-{max_dimension}");
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<std::path::Path> for CacheKey {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}
