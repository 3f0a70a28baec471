//! Long-term memory behind a narrow trait.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub trait Memory {
    fn store(&mut self, text: &str, embedding: Vec<f32>);
    /// Up to `k` stored texts most similar to `text`, best first.
    fn query(&self, text: &str, k: usize) -> Vec<String>;
}

pub type Embedder = fn(&str) -> Vec<f32>;

const HASHED_DIMS: usize = 256;

/// Session-local memory ranked by cosine similarity.
pub struct InMemoryMemory {
    entries: Vec<(String, Vec<f32>)>,
    embed: Embedder,
}

impl Default for InMemoryMemory {
    fn default() -> Self {
        Self::new(hashed_bag_of_words)
    }
}

impl InMemoryMemory {
    pub fn new(embed: Embedder) -> Self {
        Self {
            entries: Vec::new(),
            embed,
        }
    }

    /// Store `text` using this memory's own embedder.
    pub fn remember(&mut self, text: &str) {
        let embedding = (self.embed)(text);
        self.store(text, embedding);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Memory for InMemoryMemory {
    fn store(&mut self, text: &str, embedding: Vec<f32>) {
        if text.trim().is_empty() || self.entries.iter().any(|(existing, _)| existing == text) {
            return;
        }
        self.entries.push((text.to_string(), embedding));
    }

    fn query(&self, text: &str, k: usize) -> Vec<String> {
        let query = (self.embed)(text);
        let mut scored: Vec<(f32, &str)> = self
            .entries
            .iter()
            .map(|(entry, embedding)| (cosine(&query, embedding), entry.as_str()))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
            .into_iter()
            .take(k)
            .map(|(_, entry)| entry.to_string())
            .collect()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Deterministic embedding: lowercase word counts hashed into a fixed vector.
pub fn hashed_bag_of_words(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; HASHED_DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.len() > 2)
    {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        let slot = (hasher.finish() % HASHED_DIMS as u64) as usize;
        vector[slot] += 1.0;
    }
    vector
}
