pub type StrobeResult<T> = Result<T, StrobeError>;

#[derive(thiserror::Error, Debug)]
pub enum StrobeError {
    /// A decoder/capture device could not be opened. Fatal for that source;
    /// surfaced by `start()`.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("validation error: {0}")]
    Validation(String),

    /// A genuine I/O failure while reading from an open decoder. End of media
    /// is not an error and is reported as `Ok(None)` at the decode boundary.
    #[error("decode error: {0}")]
    Decode(String),

    /// A procedural render function or per-layer filter failed.
    #[error("render error: {0}")]
    Render(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StrobeError {
    pub fn resource_unavailable(msg: impl Into<String>) -> Self {
        Self::ResourceUnavailable(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            StrobeError::resource_unavailable("x")
                .to_string()
                .contains("resource unavailable:")
        );
        assert!(
            StrobeError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(StrobeError::decode("x").to_string().contains("decode error:"));
        assert!(StrobeError::render("x").to_string().contains("render error:"));
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = StrobeError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
