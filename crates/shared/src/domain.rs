use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

id_newtype!(PackId);
id_newtype!(JobId);

/// Server-side state of a conversion job.
///
/// The client never sets this itself; it only ever replaces a job with the
/// state returned by a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    /// Any status string this client does not know about.
    #[serde(other)]
    Unknown,
}

impl ConversionStatus {
    /// `true` while the server is still working on the job.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Accepts `major.minor` or `major.minor.patch` where every component is a
/// non-empty run of ASCII digits. Nothing else, not even surrounding
/// whitespace.
pub fn validate_version(input: &str) -> bool {
    let mut components = 0usize;
    for part in input.split('.') {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        components += 1;
    }
    components == 2 || components == 3
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version '{input}': expected x.y or x.y.z")]
pub struct InvalidVersion {
    pub input: String,
}

/// A game version string that passed [`validate_version`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionString(String);

impl VersionString {
    pub fn parse(input: impl Into<String>) -> Result<Self, InvalidVersion> {
        let input = input.into();
        if validate_version(&input) {
            Ok(Self(input))
        } else {
            Err(InvalidVersion { input })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VersionString {
    type Error = InvalidVersion;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<VersionString> for String {
    fn from(value: VersionString) -> Self {
        value.0
    }
}

impl AsRef<str> for VersionString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
