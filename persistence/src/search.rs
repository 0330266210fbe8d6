//! Content search and composable filters over stored sessions.
//!
//! Search is linear over the index with a metadata pre-filter; message
//! bodies are only loaded from storage when content search is requested.
//! Matches carry a `**…**` highlight on the first occurrence and a bounded
//! context window.

use crate::error::Result;
use crate::storage::SessionStorage;
use crate::storage::StorageBackend;
use crate::types::Session;
use crate::types::SessionMetadata;
use chrono::DateTime;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Confidence assigned per matched field.
const TITLE_CONFIDENCE: f64 = 0.9;
const TAGS_CONFIDENCE: f64 = 0.8;
const CONTENT_CONFIDENCE: f64 = 0.8;
const PREVIEW_CONFIDENCE: f64 = 0.7;
const NOTES_CONFIDENCE: f64 = 0.7;
const FILENAME_CONFIDENCE: f64 = 0.6;

/// Characters kept on each side of a match in the context window.
const CONTEXT_RADIUS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSort {
    Relevance,
    LastModified,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub min_relevance: f64,
    pub include_content: bool,
    pub include_metadata: bool,
    pub include_filenames: bool,
    pub case_sensitive: bool,
    pub fuzzy_match: bool,
    pub sort_by: SearchSort,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            min_relevance: 0.1,
            include_content: true,
            include_metadata: true,
            include_filenames: true,
            case_sensitive: false,
            fuzzy_match: false,
            sort_by: SearchSort::Relevance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Message,
    Title,
    Tags,
    Filename,
    Notes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Content,
    Metadata,
    Filename,
    Mixed,
}

#[derive(Debug, Clone)]
pub struct SearchMatch {
    pub kind: MatchKind,
    /// Matched field text with the first occurrence wrapped in `**…**`.
    pub text: String,
    /// Window around the match, elided with `...` where truncated.
    pub context: String,
    pub position: usize,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub session: SessionMetadata,
    pub relevance_score: f64,
    pub matches: Vec<SearchMatch>,
    pub match_type: MatchType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provenance {
    Metadata,
    Content,
    Filename,
}

/// Inclusive time window on `lastModified`.
#[derive(Debug, Clone, Default)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct FilterCriteria {
    /// Exact model match.
    pub model: Option<String>,
    pub date_range: Option<DateRange>,
    /// Session matches when it carries any of these tags.
    pub tags: Option<Vec<String>>,
    pub min_messages: Option<usize>,
    pub min_tokens: Option<u64>,
    pub workspace_root: Option<PathBuf>,
    /// AND (default) requires every predicate; OR accepts any.
    pub combine_with_and: bool,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            model: None,
            date_range: None,
            tags: None,
            min_messages: None,
            min_tokens: None,
            workspace_root: None,
            combine_with_and: true,
        }
    }
}

pub struct SearchEngine {
    storage: Arc<SessionStorage>,
}

impl SearchEngine {
    pub fn new(storage: Arc<SessionStorage>) -> Self {
        Self { storage }
    }

    /// Rank sessions matching `query`. An empty query yields no results.
    pub async fn search_sessions(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|term| {
                if options.case_sensitive {
                    term.to_string()
                } else {
                    term.to_lowercase()
                }
            })
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let index = self.storage.get_index().await?;
        let mut results = Vec::new();

        for metadata in index.sessions.values() {
            let session = if options.include_content {
                match self.storage.read_session(metadata.id).await {
                    Ok(session) => Some(session),
                    Err(err) => {
                        debug!(session = %metadata.id, %err, "skipping content search");
                        None
                    }
                }
            } else {
                None
            };

            let mut matches: Vec<(SearchMatch, Provenance)> = Vec::new();
            for term in &terms {
                collect_term_matches(term, metadata, session.as_ref(), options, &mut matches);
            }
            if matches.is_empty() {
                continue;
            }

            let total_confidence: f64 = matches.iter().map(|(m, _)| m.confidence).sum();
            let relevance = (total_confidence / (2.0 * terms.len() as f64)).min(1.0);
            if relevance < options.min_relevance {
                continue;
            }

            let match_type = classify(&matches);
            results.push(SearchResult {
                session: metadata.clone(),
                relevance_score: relevance,
                matches: matches.into_iter().map(|(m, _)| m).collect(),
                match_type,
            });
        }

        match options.sort_by {
            SearchSort::Relevance => results.sort_by(|a, b| {
                b.relevance_score
                    .partial_cmp(&a.relevance_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.session.last_modified.cmp(&a.session.last_modified))
            }),
            SearchSort::LastModified => {
                results.sort_by(|a, b| b.session.last_modified.cmp(&a.session.last_modified));
            }
        }
        results.truncate(options.limit);
        Ok(results)
    }

    /// Composable predicate filter. Empty criteria return all sessions.
    pub async fn filter_sessions(
        &self,
        criteria: &FilterCriteria,
    ) -> Result<Vec<SessionMetadata>> {
        let index = self.storage.get_index().await?;
        let mut sessions: Vec<SessionMetadata> = index
            .sessions
            .values()
            .filter(|metadata| matches_criteria(metadata, criteria))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(sessions)
    }
}

fn matches_criteria(metadata: &SessionMetadata, criteria: &FilterCriteria) -> bool {
    let mut checks: Vec<bool> = Vec::new();

    if let Some(model) = &criteria.model {
        checks.push(metadata.model == *model);
    }
    if let Some(range) = &criteria.date_range {
        let after_start = range.start.is_none_or(|start| metadata.last_modified >= start);
        let before_end = range.end.is_none_or(|end| metadata.last_modified <= end);
        checks.push(after_start && before_end);
    }
    if let Some(tags) = &criteria.tags {
        checks.push(tags.iter().any(|tag| metadata.tags.contains(tag)));
    }
    if let Some(min_messages) = criteria.min_messages {
        checks.push(metadata.message_count >= min_messages);
    }
    if let Some(min_tokens) = criteria.min_tokens {
        checks.push(metadata.token_count.total >= min_tokens);
    }
    if let Some(workspace_root) = &criteria.workspace_root {
        checks.push(metadata.workspace_root == *workspace_root);
    }

    if checks.is_empty() {
        return true;
    }
    if criteria.combine_with_and {
        checks.iter().all(|c| *c)
    } else {
        checks.iter().any(|c| *c)
    }
}

fn collect_term_matches(
    term: &str,
    metadata: &SessionMetadata,
    session: Option<&Session>,
    options: &SearchOptions,
    matches: &mut Vec<(SearchMatch, Provenance)>,
) {
    if options.include_metadata {
        if let Some(title) = &metadata.title
            && let Some(found) =
                make_match(title, term, options, MatchKind::Title, TITLE_CONFIDENCE)
        {
            matches.push((found, Provenance::Metadata));
        }
        for tag in &metadata.tags {
            if let Some(found) = make_match(tag, term, options, MatchKind::Tags, TAGS_CONFIDENCE)
            {
                matches.push((found, Provenance::Metadata));
                break;
            }
        }
        if session.is_none()
            && let Some(preview) = &metadata.preview
            && let Some(found) =
                make_match(preview, term, options, MatchKind::Message, PREVIEW_CONFIDENCE)
        {
            matches.push((found, Provenance::Metadata));
        }
    }

    if options.include_filenames {
        for file in &metadata.context_files {
            let name = file.to_string_lossy();
            if let Some(found) =
                make_match(&name, term, options, MatchKind::Filename, FILENAME_CONFIDENCE)
            {
                matches.push((found, Provenance::Filename));
            }
        }
    }

    if let Some(session) = session {
        for message in &session.messages {
            let text = message.content.visible_text();
            if let Some(found) =
                make_match(&text, term, options, MatchKind::Message, CONTENT_CONFIDENCE)
            {
                matches.push((found, Provenance::Content));
            }
        }
        if let Some(notes) = &session.notes
            && let Some(found) = make_match(notes, term, options, MatchKind::Notes, NOTES_CONFIDENCE)
        {
            matches.push((found, Provenance::Content));
        }
    }
}

fn classify(matches: &[(SearchMatch, Provenance)]) -> MatchType {
    let mut provenances: Vec<Provenance> = matches.iter().map(|(_, p)| *p).collect();
    provenances.sort_by_key(|p| *p as u8);
    provenances.dedup();
    match provenances.as_slice() {
        [Provenance::Metadata] => MatchType::Metadata,
        [Provenance::Content] => MatchType::Content,
        [Provenance::Filename] => MatchType::Filename,
        _ => MatchType::Mixed,
    }
}

fn make_match(
    haystack: &str,
    term: &str,
    options: &SearchOptions,
    kind: MatchKind,
    confidence: f64,
) -> Option<SearchMatch> {
    if let Some((position, len)) = find_term(haystack, term, options.case_sensitive) {
        let text = format!(
            "{}**{}**{}",
            &haystack[..position],
            &haystack[position..position + len],
            &haystack[position + len..]
        );
        let context = context_window(haystack, position, len);
        return Some(SearchMatch {
            kind,
            text,
            context,
            position,
            confidence,
        });
    }
    if options.fuzzy_match && fuzzy_subsequence(haystack, term) {
        // No contiguous occurrence to highlight.
        return Some(SearchMatch {
            kind,
            text: haystack.to_string(),
            context: context_window(haystack, 0, 0),
            position: 0,
            confidence: confidence * 0.8,
        });
    }
    None
}

/// Byte position and length of the first occurrence, `None` when absent or
/// when case folding makes the offsets unreliable for slicing.
fn find_term(haystack: &str, term: &str, case_sensitive: bool) -> Option<(usize, usize)> {
    if case_sensitive {
        return haystack.find(term).map(|pos| (pos, term.len()));
    }
    let hay_lower = haystack.to_lowercase();
    let term_lower = term.to_lowercase();
    let pos = hay_lower.find(&term_lower)?;
    let end = pos + term_lower.len();
    if hay_lower.len() == haystack.len()
        && haystack.is_char_boundary(pos)
        && haystack.is_char_boundary(end)
    {
        Some((pos, term_lower.len()))
    } else {
        None
    }
}

/// All of `term`'s characters appear in order (not necessarily adjacent).
fn fuzzy_subsequence(haystack: &str, term: &str) -> bool {
    let mut hay = haystack.chars().flat_map(char::to_lowercase);
    'term: for wanted in term.chars().flat_map(char::to_lowercase) {
        for candidate in hay.by_ref() {
            if candidate == wanted {
                continue 'term;
            }
        }
        return false;
    }
    true
}

/// Window of up to `CONTEXT_RADIUS` characters on either side of the match,
/// with `...` where text was cut.
fn context_window(text: &str, position: usize, match_len: usize) -> String {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let total = chars.len();
    let start_char = chars
        .iter()
        .position(|(byte, _)| *byte >= position)
        .unwrap_or(total);
    let match_chars = text[position..(position + match_len).min(text.len())]
        .chars()
        .count();

    let window_start = start_char.saturating_sub(CONTEXT_RADIUS);
    let window_end = (start_char + match_chars + CONTEXT_RADIUS).min(total);

    let mut out = String::new();
    if window_start > 0 {
        out.push_str("...");
    }
    out.extend(chars[window_start..window_end].iter().map(|(_, c)| c));
    if window_end < total {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenCount;

    fn metadata(title: Option<&str>, tags: &[&str]) -> SessionMetadata {
        let now = Utc::now();
        SessionMetadata {
            id: uuid::Uuid::new_v4(),
            created: now,
            last_modified: now,
            model: "gpt-4o".into(),
            message_count: 0,
            token_count: TokenCount::default(),
            workspace_root: PathBuf::from("/w"),
            context_files: Vec::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            title: title.map(String::from),
            preview: None,
            last_message: None,
        }
    }

    #[test]
    fn find_term_is_case_insensitive_by_default() {
        assert_eq!(find_term("Authentication flow", "authentication", false), Some((0, 14)));
        assert_eq!(find_term("Authentication flow", "authentication", true), None);
    }

    #[test]
    fn highlight_wraps_first_occurrence() {
        let options = SearchOptions::default();
        let found = make_match(
            "enable authentication here",
            "authentication",
            &options,
            MatchKind::Title,
            TITLE_CONFIDENCE,
        )
        .unwrap();
        assert_eq!(found.text, "enable **authentication** here");
        assert_eq!(found.position, 7);
    }

    #[test]
    fn context_window_elides_long_text() {
        let long = format!("{}needle{}", "a".repeat(200), "b".repeat(200));
        let window = context_window(&long, 200, 6);
        assert!(window.starts_with("..."));
        assert!(window.ends_with("..."));
        assert!(window.contains("needle"));
        assert!(window.chars().count() <= 6 + 2 * CONTEXT_RADIUS + 6);
    }

    #[test]
    fn fuzzy_subsequence_matches_gaps() {
        assert!(fuzzy_subsequence("authentication", "athn"));
        assert!(!fuzzy_subsequence("authentication", "xyz"));
    }

    #[test]
    fn criteria_and_or_semantics() {
        let mut a = metadata(None, &["rust"]);
        a.model = "gpt-4o".into();
        let mut b = metadata(None, &["python"]);
        b.model = "o3".into();

        let both = FilterCriteria {
            model: Some("gpt-4o".into()),
            tags: Some(vec!["python".into()]),
            ..FilterCriteria::default()
        };
        assert!(!matches_criteria(&a, &both));
        assert!(!matches_criteria(&b, &both));

        let either = FilterCriteria {
            combine_with_and: false,
            ..both
        };
        assert!(matches_criteria(&a, &either));
        assert!(matches_criteria(&b, &either));
    }

    #[test]
    fn empty_criteria_match_everything() {
        let criteria = FilterCriteria::default();
        assert!(matches_criteria(&metadata(None, &[]), &criteria));
        let or_criteria = FilterCriteria {
            combine_with_and: false,
            ..FilterCriteria::default()
        };
        assert!(matches_criteria(&metadata(None, &[]), &or_criteria));
    }

    #[test]
    fn title_match_outranks_filename_match() {
        let options = SearchOptions::default();
        let title = make_match("auth notes", "auth", &options, MatchKind::Title, TITLE_CONFIDENCE)
            .unwrap();
        let file = make_match(
            "src/auth.rs",
            "auth",
            &options,
            MatchKind::Filename,
            FILENAME_CONFIDENCE,
        )
        .unwrap();
        assert!(title.confidence > file.confidence);
    }
}
