use unicode_segmentation::UnicodeSegmentation;

/// Words up to this many characters are left alone.
pub const MAX_WORD_LEN: usize = 20;
/// Long words are cut into chunks of this many characters.
pub const CHUNK_LEN: usize = 19;

/// Breaks words longer than [`MAX_WORD_LEN`] into hyphenated chunks so they can
/// wrap on narrow displays.
///
/// Splitting happens on single spaces, so runs of spaces survive as empty
/// tokens. Characters are counted as grapheme clusters. The result is not
/// idempotent: feed it raw item text only, never its own output.
pub fn wrap(text: &str) -> String {
    if text.trim().is_empty() {
        return text.to_string();
    }

    let mut words: Vec<String> = Vec::new();
    for word in text.split(' ') {
        let graphemes = word.graphemes(true).collect::<Vec<_>>();
        if graphemes.len() <= MAX_WORD_LEN {
            words.push(word.to_string());
            continue;
        }
        let mut chunks = graphemes.chunks(CHUNK_LEN).peekable();
        while let Some(chunk) = chunks.next() {
            let mut piece = chunk.concat();
            if chunks.peek().is_some() {
                piece.push('-');
            }
            words.push(piece);
        }
    }
    words.join(" ")
}
