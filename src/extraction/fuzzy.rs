// Loose matching of extracted values against known options

use std::collections::HashSet;

/// Find the option that best matches `term`
///
/// Tries, in order: case-insensitive equality, substring containment in
/// either direction, then the largest word overlap.
pub fn find_best_match<'a, S: AsRef<str>>(term: &str, options: &'a [S]) -> Option<&'a str> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    let names: Vec<&'a str> = options.iter().map(AsRef::<str>::as_ref).collect();

    if let Some(exact) = names.iter().find(|name| name.to_lowercase() == needle) {
        tracing::debug!(term, matched = *exact, "Exact match found");
        return Some(*exact);
    }

    if let Some(partial) = names.iter().find(|name| {
        let candidate = name.to_lowercase();
        !candidate.is_empty() && (needle.contains(&candidate) || candidate.contains(&needle))
    }) {
        tracing::debug!(term, matched = *partial, "Substring match found");
        return Some(*partial);
    }

    let words: HashSet<&str> = needle.split_whitespace().collect();
    let mut best: Option<&'a str> = None;
    let mut best_score = 0;
    for name in &names {
        let lower = name.to_lowercase();
        let score = lower
            .split_whitespace()
            .filter(|w| words.contains(w))
            .collect::<HashSet<_>>()
            .len();
        if score > best_score {
            best_score = score;
            best = Some(*name);
        }
    }

    if let Some(matched) = best {
        tracing::debug!(term, matched, score = best_score, "Word overlap match found");
    }
    best
}
