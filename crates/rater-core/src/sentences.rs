use std::sync::LazyLock;

use regex::Regex;

/// Abbreviations that end a piece without ending the sentence.
const NON_TERMINAL_SUFFIXES: &[&str] = &[
    "et al.", "e.g.", "i.e.", "Fig.", "vs.", "Eq.", "Dr.", "Mr.", "Mrs.", ".NET", ". NET",
];

/// Pieces that continue the previous sentence (".NET" split at its dot).
const CONTINUATION_PREFIXES: &[&str] = &[".NET", ". NET", "NET"];

/// A sentence ends at a newline, or at `.`/`!`/`?` plus whitespace when an
/// ASCII capital or Hangul syllable follows. Group 1 is the gap to cut.
static SENTENCE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?](\s+)[A-Z가-힣]|\n").expect("valid sentence break pattern"));

/// Split essay text into sentences the same way the backend does, for
/// essays that arrive without a sentence list. Pieces ending in a known
/// abbreviation are glued to the piece that follows.
pub fn split_sentences(content: &str) -> Vec<String> {
    let raw = content.trim();

    let mut pieces: Vec<&str> = Vec::new();
    let mut start = 0;
    for caps in SENTENCE_BREAK.captures_iter(raw) {
        if let Some(cut) = caps.get(1).or_else(|| caps.get(0)) {
            pieces.push(&raw[start..cut.start()]);
            start = cut.end();
        }
    }
    pieces.push(&raw[start..]);

    let mut sentences: Vec<String> = Vec::new();
    for piece in pieces.into_iter().map(str::trim).filter(|p| !p.is_empty()) {
        if let Some(prev) = sentences.last_mut() {
            let glue = NON_TERMINAL_SUFFIXES.iter().any(|s| prev.ends_with(s))
                || CONTINUATION_PREFIXES.iter().any(|p| piece.starts_with(p));
            if glue {
                prev.push(' ');
                prev.push_str(piece);
                continue;
            }
        }
        sentences.push(piece.to_string());
    }
    sentences
}
