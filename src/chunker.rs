//! Size-bounded chunk assembly over a [`DocumentMap`].
//!
//! Elements are walked in order and packed greedily. A chunk is flushed
//! when the next element would push it to or past the token target, or
//! when the element's title or section differs from the chunk's — chunks
//! never straddle a heading boundary. Token counts use the cl100k_base
//! encoding so the budget matches what embedding models actually see.
//!
//! Text elements must additionally pass a real-word ratio check, which
//! drops OCR noise runs before they pollute the index. Tables bypass the
//! check: their cell content is structured, not prose.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use tiktoken_rs::CoreBPE;

use crate::blob::BlobStore;
use crate::config::ChunkingConfig;
use crate::models::{Chunk, DocumentMap, ElementKind, FileClass};

/// Common-word sample backing the real-word ratio check. Supplement with
/// `chunking.dictionary_path` for domain vocabularies.
const BUILTIN_DICTIONARY: &str = "\
a about above after again all also an and any are as at back be because been \
before being below between both but by can could day did do does down during \
each end few first for from further get good great had has have he her here \
him his how however i if in into is it its just know large last left life \
like long made make many may me might more most much must my new no not now \
number of off old on once one only or other our out over own page part \
people place right said same see she should small so some still such table \
than that the their them then there these they this those three through time \
to too two under until up use used value very was way we well were what when \
where which while who will with without work world would year you your";

/// Word-list gate for text elements.
#[derive(Debug, Clone)]
pub struct RealWordFilter {
    words: HashSet<String>,
    threshold: f64,
}

impl RealWordFilter {
    pub fn new(config: &ChunkingConfig) -> Result<Self> {
        let mut words: HashSet<String> =
            BUILTIN_DICTIONARY.split_whitespace().map(str::to_string).collect();
        if let Some(path) = &config.dictionary_path {
            let extra = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read dictionary {}", path.display()))?;
            words.extend(extra.split_whitespace().map(|w| w.to_lowercase()));
        }
        Ok(Self {
            words,
            threshold: config.real_word_threshold,
        })
    }

    /// True when at least `threshold` of the whitespace-separated words are
    /// dictionary words or plain numbers. Wordless text never passes.
    pub fn passes(&self, text: &str) -> bool {
        let mut total = 0usize;
        let mut real = 0usize;
        for raw in text.split_whitespace() {
            let word: String = raw
                .chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect();
            if word.is_empty() {
                continue;
            }
            total += 1;
            if self.words.contains(&word) || word.chars().all(|c| c.is_ascii_digit()) {
                real += 1;
            }
        }
        total > 0 && (real as f64 / total as f64) >= self.threshold
    }
}

pub struct Chunker {
    bpe: CoreBPE,
    target_tokens: usize,
    filter: RealWordFilter,
}

struct PendingChunk {
    content: String,
    tokens: usize,
    pages: Vec<u32>,
    title: String,
    section: String,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Result<Self> {
        Ok(Self {
            bpe: tiktoken_rs::cl100k_base().context("Failed to load cl100k_base encoding")?,
            target_tokens: config.target_tokens,
            filter: RealWordFilter::new(config)?,
        })
    }

    pub fn token_count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    /// Pack a document map into ordered chunks.
    pub fn build(&self, map: &DocumentMap, file_name: &str, file_uri: &str) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut current: Option<PendingChunk> = None;

        for element in &map.elements {
            if element.kind == ElementKind::Text && !self.filter.passes(&element.text) {
                continue;
            }
            let element_tokens = self.token_count(&element.text);

            if let Some(pending) = &current {
                let heading_changed =
                    pending.title != element.title || pending.section != element.section;
                let would_cross = pending.tokens + element_tokens >= self.target_tokens;
                if heading_changed || would_cross {
                    let pending = current.take().unwrap();
                    chunks.push(self.finish(pending, chunks.len(), file_name, file_uri));
                }
            }

            match &mut current {
                Some(pending) => {
                    pending.content.push('\n');
                    pending.content.push_str(&element.text);
                    pending.tokens += element_tokens;
                    if !pending.pages.contains(&element.page) {
                        pending.pages.push(element.page);
                    }
                }
                None => {
                    current = Some(PendingChunk {
                        content: element.text.clone(),
                        tokens: element_tokens,
                        pages: vec![element.page],
                        title: element.title.clone(),
                        section: element.section.clone(),
                    });
                }
            }
        }

        if let Some(pending) = current {
            chunks.push(self.finish(pending, chunks.len(), file_name, file_uri));
        }
        chunks
    }

    fn finish(
        &self,
        pending: PendingChunk,
        index: usize,
        file_name: &str,
        file_uri: &str,
    ) -> Chunk {
        Chunk {
            file_name: file_name.to_string(),
            file_uri: file_uri.to_string(),
            chunk_index: index,
            token_count: pending.tokens,
            content: pending.content,
            pages: pending.pages,
            title: pending.title,
            section: pending.section,
            processed_at: Utc::now(),
            file_class: FileClass::Text,
            language: None,
            translated_content: None,
            translated_title: None,
            translated_section: None,
        }
    }
}

/// Blob name of one chunk: `{source path}/{index}.json` in the chunk
/// container.
pub fn chunk_blob_name(file_name: &str, index: usize) -> String {
    format!("{file_name}/{index}.json")
}

/// Prefix under which all of a document's chunks live.
pub fn chunk_blob_prefix(file_name: &str) -> String {
    format!("{file_name}/")
}

/// Persist a document's chunk set, replacing any previous run.
///
/// Indexes are overwritten in place; stale blobs from an earlier run that
/// produced more chunks are deleted so reprocessing converges on exactly
/// the new set.
pub fn write_chunks(store: &BlobStore, container: &str, chunks: &[Chunk]) -> Result<usize> {
    let Some(first) = chunks.first() else {
        return Ok(0);
    };

    let fresh: HashSet<String> = chunks
        .iter()
        .map(|c| chunk_blob_name(&c.file_name, c.chunk_index))
        .collect();
    let stale: Vec<String> = store
        .list(container, &chunk_blob_prefix(&first.file_name), true)?
        .into_iter()
        .map(|entry| entry.name)
        .filter(|name| !fresh.contains(name))
        .collect();
    for batch in stale.chunks(store.delete_batch_max()) {
        store.delete_batch(container, batch)?;
    }

    for chunk in chunks {
        let name = chunk_blob_name(&chunk.file_name, chunk.chunk_index);
        store.put(container, &name, &serde_json::to_vec(chunk)?)?;
    }
    Ok(chunks.len())
}
