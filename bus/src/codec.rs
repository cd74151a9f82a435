//! Message encoding.
//!
//! A message file holds one JSON array of strings, e.g. `["hi","there"]`.

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// One queued message: the ordered arguments passed to every callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Vec<String>);

impl Message {
    /// Create a message from its arguments.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(args.into_iter().map(Into::into).collect())
    }

    /// The message arguments.
    pub fn args(&self) -> &[String] {
        &self.0
    }

    /// Take the message arguments.
    pub fn into_args(self) -> Vec<String> {
        self.0
    }

    /// Encode to file contents.
    pub fn encode(&self) -> Vec<u8> {
        // A Vec<String> always serializes; fall back to an empty array anyway.
        serde_json::to_vec(&self.0).unwrap_or_else(|_| b"[]".to_vec())
    }

    /// Decode file contents.
    ///
    /// Empty contents are reported separately from malformed ones, since an
    /// empty file usually means the writer has not finished yet.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(CodecError::Empty);
        }
        let args: Vec<String> = serde_json::from_slice(bytes)?;
        Ok(Self(args))
    }
}

impl From<Vec<String>> for Message {
    fn from(args: Vec<String>) -> Self {
        Self(args)
    }
}
