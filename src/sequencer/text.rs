use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz";

/// How the sequencer treats one normalized character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharClass {
    /// Whitespace: a timed pause, no actuation
    Pause,
    /// Displayable on a module
    Glyph(char),
    /// Outside the alphabet: skipped without delay
    Unsupported(char),
}

/// Set of characters the modules can display (lowercase only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alphabet {
    chars: Vec<char>,
}

impl Alphabet {
    pub fn new(chars: &str) -> Self {
        let mut chars: Vec<char> = chars.chars().collect();
        chars.sort_unstable();
        chars.dedup();
        Self { chars }
    }

    pub fn contains(&self, c: char) -> bool {
        self.chars.binary_search(&c).is_ok()
    }

    pub fn classify(&self, c: char) -> CharClass {
        if c.is_whitespace() {
            CharClass::Pause
        } else if self.contains(c) {
            CharClass::Glyph(c)
        } else {
            CharClass::Unsupported(c)
        }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHABET)
    }
}

/// Case-fold and turn line breaks into single pauses.
///
/// A CRLF pair becomes one space, as does a lone CR, LF or tab. Other
/// whitespace is kept as-is and each character stays its own position.
pub fn normalize(text: &str) -> Vec<char> {
    let folded = text.to_lowercase();
    let mut out = Vec::with_capacity(folded.len());
    let mut chars = folded.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push(' ');
            }
            '\n' | '\t' => out.push(' '),
            other => out.push(other),
        }
    }
    out
}

/// Time a job would take: every displayable or whitespace position costs
/// one `display_duration`; unsupported characters cost nothing.
pub fn estimate_duration(text: &str, display_duration: Duration) -> Duration {
    estimate_duration_with(text, &Alphabet::default(), display_duration)
}

pub fn estimate_duration_with(
    text: &str,
    alphabet: &Alphabet,
    display_duration: Duration,
) -> Duration {
    let timed = normalize(text)
        .into_iter()
        .filter(|&c| !matches!(alphabet.classify(c), CharClass::Unsupported(_)))
        .count();
    display_duration * timed as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_case_and_line_breaks() {
        assert_eq!(normalize("Hi\r\nYo"), vec!['h', 'i', ' ', 'y', 'o']);
        assert_eq!(normalize("a\nb\rc\td"), vec!['a', ' ', 'b', ' ', 'c', ' ', 'd']);
        assert_eq!(normalize("A  B"), vec!['a', ' ', ' ', 'b']);
        assert!(normalize("").is_empty());
    }

    #[test]
    fn classify_against_default_alphabet() {
        let alphabet = Alphabet::default();
        assert_eq!(alphabet.len(), 26);
        assert_eq!(alphabet.classify('q'), CharClass::Glyph('q'));
        assert_eq!(alphabet.classify(' '), CharClass::Pause);
        assert_eq!(alphabet.classify('7'), CharClass::Unsupported('7'));
        assert_eq!(alphabet.classify('ñ'), CharClass::Unsupported('ñ'));
        assert_eq!(alphabet.classify('Q'), CharClass::Unsupported('Q'));
    }

    #[test]
    fn custom_alphabet() {
        let alphabet = Alphabet::new("abcñ");
        assert_eq!(alphabet.classify('ñ'), CharClass::Glyph('ñ'));
        assert_eq!(alphabet.classify('d'), CharClass::Unsupported('d'));
    }

    #[test]
    fn estimate_counts_glyphs_and_pauses_only() {
        let t = Duration::from_secs(2);
        assert_eq!(estimate_duration("ab cd", t), Duration::from_secs(10));
        assert_eq!(estimate_duration("a1!b", t), Duration::from_secs(4));
        assert_eq!(estimate_duration("Hi\r\n", t), Duration::from_secs(6));
        assert_eq!(estimate_duration("", t), Duration::ZERO);
    }
}
