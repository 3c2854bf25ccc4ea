//! Path module for the data store
//!
//! This module defines the Path structure, an ordered sequence of
//! keys addressing a location in the application state tree.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;
use serde::{Serialize, Deserialize};

/// Errors that can occur when working with paths
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PathError {
    #[error("Invalid path format: {0}")]
    InvalidFormat(String),
    #[error("Empty path")]
    EmptyPath,
}

/// A segment in a path.
///
/// Serialised untagged, so a path reads as `["data", "Advert", 0]` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    /// Array index segment (e.g., [0])
    Index(usize),
    /// Mapping key
    Key(String),
}

impl Segment {
    /// Parse one textual segment; `[n]` is an array index, anything else a key.
    pub fn parse(segment: &str) -> Self {
        if let Some(index_str) = segment.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            if let Ok(index) = index_str.parse::<usize>() {
                return Segment::Index(index);
            }
        }
        Segment::Key(segment.to_string())
    }

    /// The key this segment addresses inside a mapping
    pub fn as_key(&self) -> String {
        match self {
            Segment::Key(key) => key.clone(),
            Segment::Index(idx) => idx.to_string(),
        }
    }

    /// The position this segment addresses inside a sequence, if any.
    /// Numeric keys count, mirroring how the UI layer indexes arrays.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Index(idx) => Some(*idx),
            Segment::Key(key) => key.parse().ok(),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => write!(f, "{}", key),
            Segment::Index(idx) => write!(f, "[{}]", idx),
        }
    }
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        Segment::Key(s.to_string())
    }
}

impl From<String> for Segment {
    fn from(s: String) -> Self {
        Segment::Key(s)
    }
}

impl From<&String> for Segment {
    fn from(s: &String) -> Self {
        Segment::Key(s.clone())
    }
}

impl From<usize> for Segment {
    fn from(i: usize) -> Self {
        Segment::Index(i)
    }
}

/// A path in the store (e.g., `data.Advert.DRAFT.x1`)
///
/// Paths compare and hash by the keys they address, so `[0]` and `0` name
/// the same location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.segments.iter().map(Segment::as_key)
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.keys().eq(other.keys())
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.len().hash(state);
        for key in self.keys() {
            key.hash(state);
        }
    }
}

impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Path {
    fn cmp(&self, other: &Self) -> Ordering {
        self.keys().cmp(other.keys())
    }
}

impl Path {
    /// Create a new empty path
    pub fn new() -> Self {
        Path { segments: Vec::new() }
    }

    /// Create a path from a vector of segments
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Path { segments }
    }

    /// Add a segment to the path
    pub fn push<S: Into<Segment>>(&mut self, segment: S) {
        self.segments.push(segment.into());
    }

    /// Remove and return the last segment
    pub fn pop(&mut self) -> Option<Segment> {
        self.segments.pop()
    }

    /// A new path one level below this one
    pub fn child<S: Into<Segment>>(&self, segment: S) -> Path {
        let mut child = self.clone();
        child.push(segment);
        child
    }

    /// A new path with every segment of `tail` appended
    pub fn join(&self, tail: &Path) -> Path {
        let mut joined = self.clone();
        joined.segments.extend(tail.segments.iter().cloned());
        joined
    }

    /// The enclosing path, or None for the root
    pub fn parent(&self) -> Option<Path> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Path::from_segments(self.segments[..self.segments.len() - 1].to_vec()))
    }

    /// The final segment
    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// Get the number of segments in the path
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Check if the path is empty
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Get all segments in the path
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Get a specific segment by index
    pub fn segment(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    /// Check if this path starts with the given prefix path
    pub fn starts_with(&self, prefix: &Path) -> bool {
        prefix.len() <= self.len()
            && prefix.segments.iter().zip(&self.segments).all(|(a, b)| a.as_key() == b.as_key())
    }

    /// True when one path is a prefix of the other
    pub fn overlaps(&self, other: &Path) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }
}

impl<S: Into<Segment>, const N: usize> From<[S; N]> for Path {
    fn from(segments: [S; N]) -> Self {
        Path { segments: segments.into_iter().map(Into::into).collect() }
    }
}

impl<S: Into<Segment>> From<Vec<S>> for Path {
    fn from(segments: Vec<S>) -> Self {
        Path { segments: segments.into_iter().map(Into::into).collect() }
    }
}

/// Parse a string into a Path
impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(PathError::EmptyPath);
        }

        let mut segments = Vec::new();
        for part in s.split('.') {
            if part.is_empty() {
                return Err(PathError::InvalidFormat(s.to_string()));
            }
            segments.push(Segment::parse(part));
        }

        Ok(Path { segments })
    }
}

/// Format a Path as a string with dot separators
impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path_str = self.segments
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(".");

        write!(f, "{}", path_str)
    }
}
