use regex::Regex;

/// Word-boundary blocklist applied to inbound messages and, on the unary
/// path, to generated responses.
pub struct ContentFilter {
    blocklist: Regex,
}

pub const BLOCKED_REASON: &str = "Content contains inappropriate language";

impl ContentFilter {
    pub fn new() -> Self {
        Self {
            // The pattern is a compile-time constant; construction cannot fail.
            blocklist: Regex::new(r"(?i)\b(spam|inappropriate|offensive)\b")
                .expect("blocklist pattern is valid"),
        }
    }

    /// Returns the rejection reason when `text` trips the blocklist.
    pub fn check(&self, text: &str) -> Option<&'static str> {
        self.blocklist.is_match(text).then_some(BLOCKED_REASON)
    }
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_listed_words_case_insensitively() {
        let filter = ContentFilter::new();
        assert!(filter.check("this is SPAM").is_some());
        assert!(filter.check("that was Offensive.").is_some());
        assert!(filter.check("wholly inappropriate content").is_some());
    }

    #[test]
    fn requires_word_boundaries() {
        let filter = ContentFilter::new();
        assert!(filter.check("spammy marketing copy").is_none());
        assert!(filter.check("antispam measures").is_none());
    }

    #[test]
    fn passes_clean_text() {
        let filter = ContentFilter::new();
        assert!(filter.check("hello, how are you?").is_none());
    }
}
