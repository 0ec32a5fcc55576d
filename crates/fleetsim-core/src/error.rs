use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Construction(String),

    #[error("contract violation: {0}")]
    Contract(String),
}

impl SimError {
    /// Shorthand for a [`SimError::Construction`] with a formatted message.
    pub(crate) fn construction(msg: impl Into<String>) -> Self {
        SimError::Construction(msg.into())
    }

    /// Shorthand for a [`SimError::Contract`] with a formatted message.
    pub(crate) fn contract(msg: impl Into<String>) -> Self {
        SimError::Contract(msg.into())
    }
}

impl Serialize for SimError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
