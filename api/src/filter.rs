/// Read-time denylist moderation. Filtered posts stay stored; the post index
/// skips them while collecting search results.
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    terms: Vec<String>,
}

impl ContentFilter {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            terms: terms
                .into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// Case-insensitive substring match against every denylisted term.
    pub fn is_filtered(&self, text: &str) -> bool {
        if self.terms.is_empty() {
            return false;
        }
        let text = text.to_lowercase();
        self.terms.iter().any(|term| text.contains(term.as_str()))
    }
}
