// crates/apprentice-server/src/search/query.rs
// FTS MATCH construction and query-term extraction

/// Stopwords ignored by the term-match boost.
const STOP_WORDS: &[&str] = &["the", "a", "an", "is", "of", "to", "in"];

/// Rewrite a user query into an OR of quoted phrase-prefix terms.
///
/// Each whitespace-delimited term is stripped of embedded double quotes
/// (so user input can never break out of the phrase), quoted, and given a
/// `*` prefix-match suffix. A trailing literal `*` is preserved as the
/// prefix operator rather than swallowed into the phrase. Empty queries
/// return None; callers fall back to timestamp-ordered selection.
pub fn build_match_expr(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .filter_map(|term| {
            let cleaned = term.replace('"', "");
            let cleaned = cleaned.trim_end_matches('*');
            if cleaned.is_empty() {
                None
            } else {
                Some(format!("\"{cleaned}\"*"))
            }
        })
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// Extract the boost terms of a query: case-folded, quoted phrases kept
/// whole, stopwords and single-character terms dropped.
pub fn extract_query_terms(query: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut rest = query;

    // pull out quoted phrases first
    let mut remainder = String::new();
    while let Some(start) = rest.find('"') {
        remainder.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('"') {
            Some(end) => {
                let phrase = after[..end].trim().to_lowercase();
                if !phrase.is_empty() {
                    terms.push(phrase);
                }
                rest = &after[end + 1..];
            }
            None => {
                // unbalanced quote: treat the tail as plain words
                remainder.push_str(after);
                rest = "";
            }
        }
    }
    remainder.push_str(rest);

    for word in remainder.split_whitespace() {
        let word = word.trim_matches('*').to_lowercase();
        if word.len() <= 1 || STOP_WORDS.contains(&word.as_str()) {
            continue;
        }
        terms.push(word);
    }
    terms
}

/// Fraction of query terms appearing as substrings of `text` (case-folded).
pub fn term_match_ratio(terms: &[String], text: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let haystack = text.to_lowercase();
    let matched = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    matched as f64 / terms.len() as f64
}
