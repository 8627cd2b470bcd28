//! Chunk task: rune-aware split of a Document's text into overlapping Chunks.

use cuber_types::Chunk;

/// Chunks below this length (in `char`s) are not useful retrieval units.
pub const MIN_CHUNK_SIZE: usize = 25;

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk_size must be at least {MIN_CHUNK_SIZE} characters, got {0}")]
    ChunkSizeTooSmall(usize),
    #[error("chunk_overlap must be smaller than chunk_size")]
    OverlapTooLarge,
}

#[derive(Debug, Clone)]
pub struct ChunkInput {
    pub document_id: String,
    pub memory_group: String,
    pub text: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

/// Split `input.text` into overlapping chunks over its `char` sequence (not bytes, so
/// multi-byte runes never get sliced in half). Chunk ids are deterministic so repeat
/// absorbs of identical text upsert rather than accumulate duplicate rows.
pub fn chunk_text(input: ChunkInput) -> Result<Vec<Chunk>, ChunkError> {
    if input.chunk_size < MIN_CHUNK_SIZE {
        return Err(ChunkError::ChunkSizeTooSmall(input.chunk_size));
    }
    if input.chunk_overlap >= input.chunk_size {
        return Err(ChunkError::OverlapTooLarge);
    }

    let runes: Vec<char> = input.text.chars().collect();
    if runes.is_empty() {
        return Ok(Vec::new());
    }

    let stride = input.chunk_size - input.chunk_overlap;
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0u32;
    loop {
        let end = (start + input.chunk_size).min(runes.len());
        let text: String = runes[start..end].iter().collect();
        let token_count = text.split_whitespace().count() as u32;
        chunks.push(Chunk {
            id: format!("{}-c{index}", input.document_id),
            memory_group: input.memory_group.clone(),
            document_id: input.document_id.clone(),
            text,
            token_count,
            chunk_index: index,
            embedding: Vec::new(),
        });
        if end == runes.len() {
            break;
        }
        index += 1;
        start += stride;
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(text: &str, size: usize, overlap: usize) -> ChunkInput {
        ChunkInput {
            document_id: "doc-1".into(),
            memory_group: "g".into(),
            text: text.into(),
            chunk_size: size,
            chunk_overlap: overlap,
        }
    }

    #[test]
    fn rejects_chunk_size_below_minimum() {
        let err = chunk_text(input("hello world", 10, 0)).unwrap_err();
        assert!(matches!(err, ChunkError::ChunkSizeTooSmall(10)));
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        let err = chunk_text(input(&"a".repeat(100), 30, 30)).unwrap_err();
        assert!(matches!(err, ChunkError::OverlapTooLarge));
    }

    #[test]
    fn short_text_produces_a_single_chunk() {
        let text = "a".repeat(30);
        let chunks = chunk_text(input(&text, 40, 5)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].id, "doc-1-c0");
    }

    #[test]
    fn overlapping_windows_cover_the_whole_text_without_truncation() {
        let text = "x".repeat(100);
        let chunks = chunk_text(input(&text, 30, 10)).unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(chunks.last().unwrap().text.len(), {
            let stride = 30 - 10;
            let last_start = (chunks.len() - 1) * stride;
            100 - last_start
        });
        for window in chunks.windows(2) {
            assert_eq!(window[0].chunk_index + 1, window[1].chunk_index);
        }
    }

    #[test]
    fn chunking_the_same_text_twice_is_deterministic() {
        let text = "y".repeat(80);
        let a = chunk_text(input(&text, 30, 5)).unwrap();
        let b = chunk_text(input(&text, 30, 5)).unwrap();
        assert_eq!(
            a.iter().map(|c| &c.id).collect::<Vec<_>>(),
            b.iter().map(|c| &c.id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn empty_text_produces_no_chunks() {
        assert!(chunk_text(input("", 40, 5)).unwrap().is_empty());
    }

    #[test]
    fn multibyte_runes_are_not_split_mid_character() {
        let text = "あ".repeat(60);
        let chunks = chunk_text(input(&text, 30, 5)).unwrap();
        for chunk in &chunks {
            assert!(chunk.text.chars().all(|c| c == 'あ'));
        }
    }
}
