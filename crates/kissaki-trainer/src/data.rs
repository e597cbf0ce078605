//! Data loading for word/tag column files.
//!
//! Tagged files hold one `word<TAB>tag` pair per line (any whitespace works;
//! the first column is the word, the last one the tag). Raw files hold one
//! word per line. In both, a blank line ends a sentence and lines starting
//! with `#` are ignored.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use candle_core::{Device, Tensor};
use kissaki_core::{capitalization, EncodedSentence, TagVocab};
use oorandom::Rand32;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Reserved word for padded positions.
pub const PAD_WORD: &str = "<pad>";
/// Reserved word for out-of-vocabulary words.
pub const UNK_WORD: &str = "<unk>";

/// A sentence as read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub words: Vec<String>,
    /// Gold tags; `None` for raw input.
    pub tags: Option<Vec<String>>,
}

impl Sentence {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Non-blank lines of one sentence with their 1-based line numbers.
type Block = Vec<(usize, String)>;

fn read_blocks<R: BufRead>(reader: R) -> Result<Vec<Block>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        current.push((n + 1, line.to_string()));
    }
    // Don't forget the last sentence
    if !current.is_empty() {
        blocks.push(current);
    }
    Ok(blocks)
}

/// Parse tagged sentences from a reader.
pub fn parse_tagged<R: BufRead>(reader: R) -> Result<Vec<Sentence>> {
    tagged_sentences(read_blocks(reader)?)
}

fn tagged_sentences(blocks: Vec<Block>) -> Result<Vec<Sentence>> {
    blocks
        .into_iter()
        .map(|block| {
            let mut words = Vec::with_capacity(block.len());
            let mut tags = Vec::with_capacity(block.len());
            for (n, line) in block {
                let columns: Vec<&str> = line.split_whitespace().collect();
                match columns.as_slice() {
                    [word, .., tag] => {
                        words.push((*word).to_string());
                        tags.push((*tag).to_string());
                    }
                    _ => bail!("line {n}: expected `word<TAB>tag`, got {line:?}"),
                }
            }
            Ok(Sentence {
                words,
                tags: Some(tags),
            })
        })
        .collect()
}

/// Parse untagged sentences from a reader. Only the first column is used.
pub fn parse_raw<R: BufRead>(reader: R) -> Result<Vec<Sentence>> {
    Ok(raw_sentences(read_blocks(reader)?))
}

fn raw_sentences(blocks: Vec<Block>) -> Vec<Sentence> {
    blocks
        .into_iter()
        .map(|block| Sentence {
            words: block
                .iter()
                .filter_map(|(_, line)| line.split_whitespace().next())
                .map(str::to_string)
                .collect(),
            tags: None,
        })
        .collect()
}

/// Parse a file that may or may not carry tags. It is read as tagged when
/// every line has at least two columns, else as raw.
pub fn parse_sentences<R: BufRead>(reader: R) -> Result<Vec<Sentence>> {
    let blocks = read_blocks(reader)?;
    let tagged = !blocks.is_empty()
        && blocks
            .iter()
            .flatten()
            .all(|(_, line)| line.split_whitespace().nth(1).is_some());
    if tagged {
        tagged_sentences(blocks)
    } else {
        Ok(raw_sentences(blocks))
    }
}

/// Load a tagged file.
pub fn load_tagged<P: AsRef<Path>>(path: P) -> Result<Vec<Sentence>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let sentences =
        parse_tagged(BufReader::new(file)).with_context(|| format!("reading {}", path.display()))?;
    info!(path = %path.display(), sentences = sentences.len(), "loaded tagged data");
    Ok(sentences)
}

/// Load a file that is either tagged or raw.
pub fn load_sentences<P: AsRef<Path>>(path: P) -> Result<Vec<Sentence>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let sentences = parse_sentences(BufReader::new(file))
        .with_context(|| format!("reading {}", path.display()))?;
    let tagged = sentences.iter().any(|s| s.tags.is_some());
    info!(path = %path.display(), sentences = sentences.len(), tagged, "loaded data");
    Ok(sentences)
}

/// Load a raw file.
pub fn load_raw<P: AsRef<Path>>(path: P) -> Result<Vec<Sentence>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let sentences =
        parse_raw(BufReader::new(file)).with_context(|| format!("reading {}", path.display()))?;
    info!(path = %path.display(), sentences = sentences.len(), "loaded raw data");
    Ok(sentences)
}

/// Collect the tag set of a dataset in first-seen order.
pub fn tag_vocab(sentences: &[Sentence]) -> TagVocab {
    TagVocab::from_tags(
        sentences
            .iter()
            .filter_map(|s| s.tags.as_ref())
            .flatten()
            .cloned(),
    )
}

/// Word vocabulary: `<pad>` is id 0 and `<unk>` id 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WordVocabRepr", into = "WordVocabRepr")]
pub struct WordVocab {
    words: Vec<String>,
    index: HashMap<String, u32>,
    lowercase: bool,
}

#[derive(Serialize, Deserialize)]
struct WordVocabRepr {
    words: Vec<String>,
    lowercase: bool,
}

impl From<WordVocabRepr> for WordVocab {
    fn from(repr: WordVocabRepr) -> Self {
        let index = repr
            .words
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i as u32))
            .collect();
        Self {
            words: repr.words,
            index,
            lowercase: repr.lowercase,
        }
    }
}

impl From<WordVocab> for WordVocabRepr {
    fn from(vocab: WordVocab) -> Self {
        Self {
            words: vocab.words,
            lowercase: vocab.lowercase,
        }
    }
}

impl WordVocab {
    /// Build from training sentences, keeping words seen at least
    /// `min_count` times.
    pub fn build(sentences: &[Sentence], min_count: usize, lowercase: bool) -> Self {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut order = Vec::new();
        for word in sentences.iter().flat_map(|s| &s.words) {
            let key = normalize(word, lowercase);
            let count = counts.entry(key.clone()).or_insert(0);
            if *count == 0 {
                order.push(key);
            }
            *count += 1;
        }
        let mut words = vec![PAD_WORD.to_string(), UNK_WORD.to_string()];
        words.extend(order.into_iter().filter(|w| {
            counts.get(w).copied().unwrap_or(0) >= min_count && w != PAD_WORD && w != UNK_WORD
        }));
        debug!(words = words.len(), min_count, "built word vocabulary");
        Self::from(WordVocabRepr { words, lowercase })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.len() <= 2
    }

    pub fn pad_id(&self) -> u32 {
        0
    }

    pub fn unk_id(&self) -> u32 {
        1
    }

    /// Id of `word`, falling back to `<unk>`.
    pub fn id(&self, word: &str) -> u32 {
        self.index
            .get(&normalize(word, self.lowercase))
            .copied()
            .unwrap_or(self.unk_id())
    }

    pub fn word(&self, id: u32) -> Option<&str> {
        self.words.get(id as usize).map(String::as_str)
    }
}

fn normalize(word: &str, lowercase: bool) -> String {
    if lowercase {
        word.to_lowercase()
    } else {
        word.to_string()
    }
}

/// Read `word v1 v2 ...` vectors for the words of `vocab`.
///
/// Words missing from the file get small uniform random vectors; the pad row
/// is left at zero. Returns the `vocab.len() × dim` table and the number of
/// words found.
pub fn read_word_vectors<R: BufRead>(
    reader: R,
    vocab: &WordVocab,
    dim: usize,
    rng: &mut Rand32,
) -> Result<(Vec<f32>, usize)> {
    let mut table: Vec<f32> = (0..vocab.len() * dim)
        .map(|_| 0.2 * rng.rand_float() - 0.1)
        .collect();
    table[..dim].fill(0.0);

    let mut found = vec![false; vocab.len()];
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        let mut fields = line.split_whitespace();
        let Some(word) = fields.next() else {
            continue;
        };
        let id = vocab.id(word);
        if id == vocab.unk_id() && word != UNK_WORD {
            continue;
        }
        if found[id as usize] {
            continue;
        }
        let values: Vec<f32> = fields
            .map(str::parse::<f32>)
            .collect::<std::result::Result<_, _>>()
            .with_context(|| format!("line {}: bad vector for {word:?}", n + 1))?;
        if values.len() != dim {
            bail!(
                "line {}: vector for {word:?} has {} values, expected {dim}",
                n + 1,
                values.len()
            );
        }
        let row = id as usize * dim;
        table[row..row + dim].copy_from_slice(&values);
        found[id as usize] = true;
    }
    Ok((table, found.iter().filter(|&&f| f).count()))
}

/// Load pretrained vectors from a file into a tensor.
pub fn load_word_vectors<P: AsRef<Path>>(
    path: P,
    vocab: &WordVocab,
    dim: usize,
    rng: &mut Rand32,
    device: &Device,
) -> Result<Tensor> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let (table, found) = read_word_vectors(BufReader::new(file), vocab, dim, rng)
        .with_context(|| format!("reading {}", path.display()))?;
    info!(
        path = %path.display(),
        found,
        vocab = vocab.len(),
        "loaded pretrained word vectors"
    );
    Ok(Tensor::from_vec(table, (vocab.len(), dim), device)?)
}

/// Map a sentence to ids. Gold tags are mapped when present.
pub fn encode(sentence: &Sentence, words: &WordVocab, tags: &TagVocab) -> Result<EncodedSentence> {
    let gold = match &sentence.tags {
        Some(gold) => Some(
            gold.iter()
                .map(|t| tags.id(t))
                .collect::<kissaki_core::Result<Vec<u32>>>()?,
        ),
        None => None,
    };
    Ok(EncodedSentence {
        words: sentence.words.iter().map(|w| words.id(w)).collect(),
        caps: sentence.words.iter().map(|w| capitalization(w)).collect(),
        tags: gold,
    })
}

/// Split `0..len` into batches of at most `batch_size` indices, shuffled when
/// `rng` is given.
pub fn batch_indices(len: usize, batch_size: usize, rng: Option<&mut Rand32>) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..len).collect();
    if let Some(rng) = rng {
        // Fisher-Yates
        for i in (1..order.len()).rev() {
            let j = rng.rand_range(0..(i as u32 + 1)) as usize;
            order.swap(i, j);
        }
    }
    order
        .chunks(batch_size.max(1))
        .map(<[usize]>::to_vec)
        .collect()
}
