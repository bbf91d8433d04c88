//! Split a tokenized command into independently authorized segments.

use crate::auth::tokenizer::{Token, TokenKind, tokenize};

/// One command between chain/pipe operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Words in order, excluding redirect operators and their targets.
    pub words: Vec<String>,
    /// Every token of the segment (redirects included) re-joined with single spaces.
    pub text: String,
}

impl Segment {
    /// The program this segment runs, path-stripped, skipping `VAR=value` prefixes.
    pub fn program(&self) -> Option<String> {
        self.words
            .iter()
            .find(|word| !is_assignment(word))
            .map(|word| program_name(word))
    }

    /// Arguments after the program word.
    pub fn args(&self) -> &[String] {
        let start = self
            .words
            .iter()
            .position(|word| !is_assignment(word))
            .map(|idx| idx + 1)
            .unwrap_or(self.words.len());
        &self.words[start..]
    }

    /// The program word as written (before path stripping).
    pub fn raw_program(&self) -> Option<&str> {
        self.words
            .iter()
            .find(|word| !is_assignment(word))
            .map(String::as_str)
    }
}

/// Split tokens at `|`, `||`, `&&`, `;` and `&`. Empty segments are dropped.
pub fn split_segments(tokens: &[Token]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut words = Vec::new();
    let mut parts: Vec<&str> = Vec::new();
    let mut skip_redirect_target = false;

    for token in tokens {
        match token.kind {
            TokenKind::Operator => {
                push_segment(&mut segments, &mut words, &mut parts);
                skip_redirect_target = false;
            }
            TokenKind::Redirect => {
                parts.push(&token.text);
                // `2>&1` style duplications still take a target word.
                skip_redirect_target = true;
            }
            TokenKind::Word => {
                parts.push(&token.text);
                if skip_redirect_target {
                    skip_redirect_target = false;
                } else {
                    words.push(token.text.clone());
                }
            }
        }
    }
    push_segment(&mut segments, &mut words, &mut parts);
    segments
}

/// Tokenize and split in one step.
pub fn segment_command(command: &str) -> Vec<Segment> {
    split_segments(&tokenize(command))
}

fn push_segment(segments: &mut Vec<Segment>, words: &mut Vec<String>, parts: &mut Vec<&str>) {
    if !words.is_empty() || !parts.is_empty() {
        segments.push(Segment {
            words: std::mem::take(words),
            text: parts.join(" "),
        });
    }
    parts.clear();
}

/// `NAME=value` where NAME is a shell identifier.
pub fn is_assignment(word: &str) -> bool {
    let Some((name, _)) = word.split_once('=') else {
        return false;
    };
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Strip any directory prefix: `/usr/bin/python3` becomes `python3`.
pub fn program_name(word: &str) -> String {
    word.rsplit('/').next().unwrap_or(word).to_string()
}
