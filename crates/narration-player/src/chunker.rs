//! Text segmentation.
//!
//! Splits narration input into paragraphs on blank lines, then hard-splits any
//! paragraph longer than the configured limit into fixed-size slices.

/// One playable segment of the source text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the chunk in the sequence, starting at 0.
    pub index: usize,
    /// Non-empty chunk text.
    pub text: String,
}

/// Split `text` into ordered, non-empty chunks of at most `max_chars` characters.
///
/// Lengths are counted in Unicode scalar values. A `max_chars` of 0 is treated as 1.
pub fn split_text(text: &str, max_chars: usize) -> Vec<Chunk> {
    let max_chars = max_chars.max(1);
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut chunks = Vec::new();
    for paragraph in paragraphs(&normalized) {
        for piece in hard_split(&paragraph, max_chars) {
            chunks.push(Chunk {
                index: chunks.len(),
                text: piece,
            });
        }
    }
    chunks
}

fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.split('\n') {
        if line.trim().is_empty() {
            push_paragraph(&mut out, &current);
            current.clear();
        } else {
            current.push(line);
        }
    }
    push_paragraph(&mut out, &current);
    out
}

fn push_paragraph(out: &mut Vec<String>, lines: &[&str]) {
    let joined = lines.join("\n");
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn hard_split(paragraph: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = paragraph.chars().collect();
    chars
        .chunks(max_chars)
        .map(|slice| slice.iter().collect())
        .collect()
}
