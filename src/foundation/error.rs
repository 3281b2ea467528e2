pub type HoloquiltResult<T> = Result<T, HoloquiltError>;

#[derive(thiserror::Error, Debug)]
pub enum HoloquiltError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing focal reference: {0}")]
    MissingFocalReference(String),

    #[error("service error: {0}")]
    Service(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HoloquiltError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn missing_focal_reference(msg: impl Into<String>) -> Self {
        Self::MissingFocalReference(msg.into())
    }

    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }

    /// Service and resource failures leave the pipeline usable; everything else aborts the
    /// current operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Service(_) | Self::Resource(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            HoloquiltError::config("x")
                .to_string()
                .contains("configuration error:")
        );
        assert!(
            HoloquiltError::missing_focal_reference("x")
                .to_string()
                .contains("missing focal reference:")
        );
        assert!(
            HoloquiltError::service("x")
                .to_string()
                .contains("service error:")
        );
        assert!(
            HoloquiltError::resource("x")
                .to_string()
                .contains("resource error:")
        );
        assert!(
            HoloquiltError::serde("x")
                .to_string()
                .contains("serialization error:")
        );
    }

    #[test]
    fn only_service_and_resource_are_recoverable() {
        assert!(HoloquiltError::service("x").is_recoverable());
        assert!(HoloquiltError::resource("x").is_recoverable());
        assert!(!HoloquiltError::config("x").is_recoverable());
        assert!(!HoloquiltError::missing_focal_reference("x").is_recoverable());
        assert!(!HoloquiltError::serde("x").is_recoverable());
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = HoloquiltError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
