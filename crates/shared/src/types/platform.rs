//! Storage platform identifiers.

use serde::{Deserialize, Serialize};

/// A supported cloud object-storage platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Platform {
    /// Google Cloud Storage.
    Google,
    /// Azure Blob Storage.
    Azure,
}

impl Platform {
    /// All supported platforms, in registration order.
    pub const ALL: [Self; 2] = [Self::Azure, Self::Google];

    /// Upper-case platform name, as reported to clients.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "GOOGLE",
            Self::Azure => "AZURE",
        }
    }

    /// Marker searched for in field annotations, e.g. `AZURE-STORAGE`.
    #[must_use]
    pub const fn annotation_marker(&self) -> &'static str {
        match self {
            Self::Google => "GOOGLE-STORAGE",
            Self::Azure => "AZURE-STORAGE",
        }
    }

    /// Parse a platform name, ignoring case.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GOOGLE" => Some(Self::Google),
            "AZURE" => Some(Self::Azure),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
