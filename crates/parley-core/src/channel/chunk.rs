//! Length-limited message chunking.
//!
//! Platforms cap the size of a single message (Discord: 2000 characters).
//! A reply segment longer than that is split at paragraph or line boundaries,
//! falling back to a hard cut, and a Markdown code fence left open at a split
//! is closed in one chunk and reopened in the next.

const FENCE: &str = "```";
/// Room reserved for the `\n```` closing a fence at the end of a chunk.
const FENCE_CLOSE_LEN: usize = 4;
/// Smallest limit that still leaves space for content next to fence markup.
const MIN_LIMIT: usize = 32;

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Empty text yields no chunks; text within the limit is returned unchanged.
pub fn chunk_message(text: &str, max_chars: usize) -> Vec<String> {
    let limit = max_chars.max(MIN_LIMIT);

    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut pending = text.to_string();
    // Length of a fence opener carried over from the previous chunk.
    let mut reopened_len = 0;

    loop {
        if pending.chars().count() <= limit {
            if !pending.trim().is_empty() {
                chunks.push(pending);
            }
            break;
        }

        let budget = limit - FENCE_CLOSE_LEN;
        let cut = byte_offset_of_char(&pending, budget);
        let split_at = find_split_point(&pending[..cut], reopened_len).unwrap_or(cut);

        let head = &pending[..split_at];
        let rest = pending[split_at..].trim_start_matches(['\n', '\r']);

        match open_fence_lang(head) {
            Some(lang) => {
                chunks.push(format!("{head}\n{FENCE}"));
                let opener = format!("{FENCE}{lang}\n");
                reopened_len = opener.len();
                pending = format!("{opener}{rest}");
            }
            None => {
                chunks.push(head.to_string());
                reopened_len = 0;
                pending = rest.to_string();
            }
        }
    }

    chunks
}

fn byte_offset_of_char(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// Prefer the last paragraph break, then the last line break, past `floor`.
fn find_split_point(window: &str, floor: usize) -> Option<usize> {
    window
        .rfind("\n\n")
        .filter(|&pos| pos > floor)
        .or_else(|| window.rfind('\n').filter(|&pos| pos > floor))
}

/// Language tag of a fence still open at the end of `text`, if any.
fn open_fence_lang(text: &str) -> Option<String> {
    let mut open: Option<String> = None;
    for line in text.lines() {
        let Some(after) = line.trim_start().strip_prefix(FENCE) else {
            continue;
        };
        open = match open {
            Some(_) => None,
            None => Some(after.split_whitespace().next().unwrap_or("").to_string()),
        };
    }
    open
}
