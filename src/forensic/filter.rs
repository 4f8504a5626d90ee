use crate::forensic::segment::Segment;

pub const DEFAULT_MAX_SEGMENTS: usize = 50;

/// Keyword pre-selection for targeted re-analysis. Matching is case-insensitive substring search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordFilter {
    keywords: Vec<String>,
    match_all: bool,
    max_segments: usize,
}

impl KeywordFilter {
    /// `raw` is a comma-separated list; blank entries are ignored.
    pub fn new(raw: &str, match_all: bool, max_segments: usize) -> Self {
        Self {
            keywords: raw
                .split(',')
                .map(|kw| kw.trim().to_lowercase())
                .filter(|kw| !kw.is_empty())
                .collect(),
            match_all,
            max_segments: max_segments.max(1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn matches(&self, text: &str) -> bool {
        if self.keywords.is_empty() {
            return false;
        }
        let lower = text.to_lowercase();
        if self.match_all {
            self.keywords.iter().all(|kw| lower.contains(kw.as_str()))
        } else {
            self.keywords.iter().any(|kw| lower.contains(kw.as_str()))
        }
    }

    /// Matching segments in order, capped at the configured maximum.
    pub fn select(&self, segments: &[Segment]) -> Vec<Segment> {
        segments
            .iter()
            .filter(|s| self.matches(&s.text))
            .take(self.max_segments)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(id: u32, text: &str) -> Segment {
        Segment {
            id,
            page_range: (id, id),
            pages: vec![id],
            text: text.to_string(),
            char_count: text.len(),
            media_refs: Vec::new(),
            fingerprint: String::new(),
        }
    }

    #[test]
    fn any_and_all_modes() {
        let any = KeywordFilter::new("Money, gun ,", false, 10);
        assert_eq!(any.keywords(), ["money", "gun"]);
        assert!(any.matches("send the MONEY"));
        assert!(!any.matches("nothing relevant"));

        let all = KeywordFilter::new("money,gun", true, 10);
        assert!(!all.matches("send the money"));
        assert!(all.matches("money for the Gun"));
    }

    #[test]
    fn selection_is_capped() {
        let segments: Vec<Segment> = (1..=5).map(|i| segment(i, "cash drop")).collect();
        let picked = KeywordFilter::new("cash", false, 2).select(&segments);
        assert_eq!(picked.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn empty_filter_matches_nothing() {
        let filter = KeywordFilter::new(" , ", false, 5);
        assert!(filter.is_empty());
        assert!(!filter.matches("anything"));
    }
}
