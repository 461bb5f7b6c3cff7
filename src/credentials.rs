//! Credential entry codecs
//!
//! Client-authentication storage formats are a collaborator concern; the
//! cluster core only needs to turn a configured entry back into the value
//! it carries. Codecs are tagged variants selected by configuration name
//! at startup; there is no runtime discovery.

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum CredentialsError {
    #[error("Unknown credentials codec: {0}")]
    UnknownCodec(String),
}

/// Available credential entry codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialsCodec {
    /// Stored value is the password itself; encode and decode pass through
    Plain,
}

impl CredentialsCodec {
    /// Select a codec by its configured name
    pub fn from_name(name: &str) -> Result<Self, CredentialsError> {
        match name.to_ascii_lowercase().as_str() {
            "plain" => Ok(CredentialsCodec::Plain),
            other => Err(CredentialsError::UnknownCodec(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CredentialsCodec::Plain => "plain",
        }
    }

    /// Decode a stored entry into the password value
    pub fn decode(&self, stored: &str) -> String {
        match self {
            CredentialsCodec::Plain => stored.to_string(),
        }
    }

    /// Encode a password value into its stored form
    pub fn encode(&self, password: &str) -> String {
        match self {
            CredentialsCodec::Plain => password.to_string(),
        }
    }
}
