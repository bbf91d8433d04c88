//! Detection of explicit completion narration in executor output.

/// Phrases accepted when the config does not override them.
pub const DEFAULT_COMPLETION_PHRASES: &[&str] = &[
    "all tasks complete",
    "all tasks are complete",
    "all tasks have been completed",
    "project is complete",
    "implementation is complete",
];

/// Return the first phrase found in `text`, case-insensitively.
pub fn find_completion_phrase<'a, S: AsRef<str>>(text: &str, phrases: &'a [S]) -> Option<&'a str> {
    let haystack = text.to_lowercase();
    phrases
        .iter()
        .map(|phrase| phrase.as_ref())
        .find(|phrase| !phrase.trim().is_empty() && haystack.contains(&phrase.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_case_insensitively() {
        let found = find_completion_phrase("Done. ALL TASKS COMPLETE!", DEFAULT_COMPLETION_PHRASES);
        assert_eq!(found, Some("all tasks complete"));
    }

    #[test]
    fn blank_phrases_never_match() {
        let phrases = vec![String::new(), "  ".to_string()];
        assert_eq!(find_completion_phrase("anything", &phrases), None);
    }

    #[test]
    fn no_match_returns_none() {
        assert_eq!(
            find_completion_phrase("still working on task 3", DEFAULT_COMPLETION_PHRASES),
            None
        );
    }
}
