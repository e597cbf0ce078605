//! # Tag Vocabulary
//!
//! Fixed bidirectional mapping between tag ids and tag strings. The last id is
//! always the reserved pad tag. Also provides BIO chunk extraction used by the
//! evaluation module.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KissakiError, Result};

/// String used for the reserved pad tag.
pub const PAD_TAG: &str = "<pad>";

/// Bidirectional tag id <-> tag string mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct TagVocab {
    id_to_tag: Vec<String>,
    tag_to_id: HashMap<String, u32>,
}

impl TagVocab {
    /// Build a vocabulary from real tags in id order. The pad tag is appended.
    pub fn from_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut id_to_tag: Vec<String> = Vec::new();
        for tag in tags {
            let tag = tag.into();
            if tag != PAD_TAG && !id_to_tag.contains(&tag) {
                id_to_tag.push(tag);
            }
        }
        id_to_tag.push(PAD_TAG.to_string());
        Self::from(id_to_tag)
    }

    /// Load a vocabulary file with one tag per line.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut tags = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if !line.is_empty() {
                tags.push(line.to_string());
            }
        }
        Ok(Self::from_tags(tags))
    }

    /// Number of tags, pad included.
    pub fn len(&self) -> usize {
        self.id_to_tag.len()
    }

    /// Whether the vocabulary holds only the pad tag.
    pub fn is_empty(&self) -> bool {
        self.id_to_tag.len() <= 1
    }

    /// Id of the reserved pad tag.
    pub fn pad_id(&self) -> u32 {
        (self.id_to_tag.len() - 1) as u32
    }

    /// Look up the id of a tag string.
    pub fn id(&self, tag: &str) -> Result<u32> {
        self.tag_to_id
            .get(tag)
            .copied()
            .ok_or_else(|| KissakiError::UnknownTag(tag.to_string()))
    }

    /// Look up the string of a tag id.
    pub fn tag(&self, id: u32) -> Option<&str> {
        self.id_to_tag.get(id as usize).map(String::as_str)
    }

    /// Real tags in id order, pad excluded.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.id_to_tag[..self.id_to_tag.len() - 1]
            .iter()
            .map(String::as_str)
    }

    /// Map a sequence of ids to tag strings; unknown ids map to the pad tag.
    pub fn decode(&self, ids: &[u32]) -> Vec<&str> {
        ids.iter().map(|&id| self.tag(id).unwrap_or(PAD_TAG)).collect()
    }

    /// Whether every real tag is `O` or carries a `B-`/`I-` prefix.
    pub fn is_bio(&self) -> bool {
        self.tags().all(|t| TagPrefix::parse(t).is_some())
    }
}

impl From<Vec<String>> for TagVocab {
    fn from(id_to_tag: Vec<String>) -> Self {
        let tag_to_id = id_to_tag
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i as u32))
            .collect();
        Self {
            id_to_tag,
            tag_to_id,
        }
    }
}

impl From<TagVocab> for Vec<String> {
    fn from(vocab: TagVocab) -> Self {
        vocab.id_to_tag
    }
}

/// BIO prefix of a tag string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagPrefix {
    Begin,
    Inside,
    Outside,
}

impl TagPrefix {
    /// Split a tag into prefix and entity type. Returns `None` for non-BIO tags.
    pub fn parse(tag: &str) -> Option<(TagPrefix, &str)> {
        if tag == "O" {
            return Some((TagPrefix::Outside, ""));
        }
        if let Some(kind) = tag.strip_prefix("B-") {
            return Some((TagPrefix::Begin, kind));
        }
        tag.strip_prefix("I-").map(|kind| (TagPrefix::Inside, kind))
    }
}

impl fmt::Display for TagPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagPrefix::Begin => write!(f, "B"),
            TagPrefix::Inside => write!(f, "I"),
            TagPrefix::Outside => write!(f, "O"),
        }
    }
}

/// A labelled span `[start, end)` over word positions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chunk {
    pub kind: String,
    pub start: usize,
    pub end: usize,
}

/// Extract chunks from a BIO tag sequence.
///
/// An `I-X` that follows `O` or a chunk of another type opens a new chunk.
/// Tags that are not BIO (including the pad tag) are treated as `O`.
pub fn chunks(tags: &[&str]) -> Vec<Chunk> {
    let mut out = Vec::new();
    let mut open: Option<(String, usize)> = None;

    for (i, tag) in tags.iter().enumerate() {
        let (prefix, kind) = TagPrefix::parse(tag).unwrap_or((TagPrefix::Outside, ""));

        let continues = prefix == TagPrefix::Inside
            && open.as_ref().is_some_and(|(k, _)| k == kind);
        if continues {
            continue;
        }

        if let Some((k, start)) = open.take() {
            out.push(Chunk {
                kind: k,
                start,
                end: i,
            });
        }
        if prefix != TagPrefix::Outside {
            open = Some((kind.to_string(), i));
        }
    }

    if let Some((kind, start)) = open {
        out.push(Chunk {
            kind,
            start,
            end: tags.len(),
        });
    }
    out
}
