//! Values stored in the content cache.

use std::fmt;

/// Why a disk load produced no file bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFailure {
    /// open(2) failed.
    NotFound,
    /// The path opened but its metadata could not be read, or it is not a
    /// regular file.
    Metadata,
    /// Reading the contents failed part way.
    Read,
}

impl LoadFailure {
    /// Short diagnostic cached in place of the file bytes.
    pub fn diagnostic(self) -> &'static str {
        match self {
            LoadFailure::NotFound => "file not found\n",
            LoadFailure::Metadata => "failed to stat\n",
            LoadFailure::Read => "failed to read\n",
        }
    }

    /// HTTP status the failure is served with.
    pub fn status(self) -> u16 {
        match self {
            LoadFailure::NotFound => 404,
            LoadFailure::Metadata | LoadFailure::Read => 500,
        }
    }
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.diagnostic().trim_end())
    }
}

/// Immutable result of one disk load. Once published into the cache it is
/// only ever read; a reload replaces the entry wholesale.
#[derive(Debug, PartialEq, Eq)]
pub enum Content {
    File(Box<[u8]>),
    Failed(LoadFailure),
}

impl Content {
    /// Bytes charged against the cache budget.
    pub fn weight(&self) -> usize {
        match self {
            Content::File(bytes) => bytes.len(),
            Content::Failed(failure) => failure.diagnostic().len(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Content::File(bytes) => bytes,
            Content::Failed(failure) => failure.diagnostic().as_bytes(),
        }
    }
}

impl From<Vec<u8>> for Content {
    fn from(bytes: Vec<u8>) -> Self {
        Content::File(bytes.into_boxed_slice())
    }
}
