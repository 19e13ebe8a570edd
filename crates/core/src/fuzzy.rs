//! Scored symbol matcher used by `where_used` and entity resolution:
//! exact > case-insensitive > suffix > substring.
//!
//! A tiered comparison ladder rather than a general fuzzy-ranking
//! algorithm — it only needs to disambiguate among entities sharing (or
//! nearly sharing) one name, not rank an open-ended candidate pool.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchTier {
    Substring = 0,
    Suffix = 1,
    CaseInsensitive = 2,
    Exact = 3,
}

#[derive(Debug, Clone)]
pub struct ScoredMatch<'a> {
    pub candidate: &'a str,
    pub tier: MatchTier,
}

/// Classifies how `candidate` relates to `query`, or `None` if it doesn't
/// match at all.
pub fn classify(query: &str, candidate: &str) -> Option<MatchTier> {
    if candidate == query {
        return Some(MatchTier::Exact);
    }
    if candidate.eq_ignore_ascii_case(query) {
        return Some(MatchTier::CaseInsensitive);
    }
    if candidate.ends_with(query) || candidate.to_lowercase().ends_with(&query.to_lowercase()) {
        return Some(MatchTier::Suffix);
    }
    if candidate.to_lowercase().contains(&query.to_lowercase()) {
        return Some(MatchTier::Substring);
    }
    None
}

/// Returns every matching candidate, best tier first; ties keep input order.
pub fn rank<'a, I: IntoIterator<Item = &'a str>>(query: &str, candidates: I) -> Vec<ScoredMatch<'a>> {
    let mut matches: Vec<ScoredMatch<'a>> = candidates
        .into_iter()
        .filter_map(|c| classify(query, c).map(|tier| ScoredMatch { candidate: c, tier }))
        .collect();
    matches.sort_by(|a, b| b.tier.cmp(&a.tier));
    matches
}
