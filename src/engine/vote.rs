//! Vote parsing, weighted tallies, and tie-breaking

use std::collections::HashMap;

/// Parse one ballot. Accepts the bare slot name, optionally behind a
/// `vote:` prefix; anything else is discarded.
pub fn parse_ballot(raw: &str, enabled_slots: &[String]) -> Option<String> {
    let mut candidate = raw.trim().to_lowercase();
    if let Some(rest) = candidate.strip_prefix("vote:") {
        candidate = rest.trim().to_string();
    }
    enabled_slots.iter().find(|s| **s == candidate).cloned()
}

#[derive(Debug, Clone)]
pub struct TallyOutcome {
    /// Winning slot after the ineligibility rule and tie-breaks. None when no
    /// eligible slot received a valid vote.
    pub winner: Option<String>,
    /// Weighted totals per voted slot, dexter included.
    pub totals: HashMap<String, f64>,
}

/// Tally ballots, each weighted by its voter.
///
/// `ineligible` names the slot that may receive votes but can never win (the
/// chief orchestrator speaks for the team regardless). Ties break by highest
/// configured weight, then lexicographic slot name.
pub fn tally<W>(ballots: &HashMap<String, String>, weight_of: W, ineligible: &str) -> TallyOutcome
where
    W: Fn(&str) -> f64,
{
    let mut totals: HashMap<String, f64> = HashMap::new();
    for (voter, voted) in ballots {
        *totals.entry(voted.clone()).or_insert(0.0) += weight_of(voter);
    }

    let winner = pick_winner(&totals, &weight_of, ineligible);
    TallyOutcome { winner, totals }
}

fn pick_winner<W>(totals: &HashMap<String, f64>, weight_of: &W, ineligible: &str) -> Option<String>
where
    W: Fn(&str) -> f64,
{
    let eligible: Vec<(&String, f64)> = totals
        .iter()
        .filter(|(name, _)| name.as_str() != ineligible)
        .map(|(name, total)| (name, *total))
        .collect();

    let top = eligible
        .iter()
        .map(|(_, total)| *total)
        .fold(f64::NEG_INFINITY, f64::max);
    if !top.is_finite() {
        return None;
    }

    let mut tied: Vec<&String> = eligible
        .iter()
        .filter(|(_, total)| *total == top)
        .map(|(name, _)| *name)
        .collect();

    tied.sort_by(|a, b| {
        weight_of(b)
            .partial_cmp(&weight_of(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(b))
    });
    tied.first().map(|s| s.to_string())
}

/// Tie-break over candidates that received no votes at all: highest weight,
/// then lexicographic name. Used to pick a fallback answer when the vote
/// phase produced nothing usable.
pub fn best_by_weight<'a, W>(candidates: impl Iterator<Item = &'a String>, weight_of: W) -> Option<String>
where
    W: Fn(&str) -> f64,
{
    let mut names: Vec<&String> = candidates.collect();
    names.sort_by(|a, b| {
        weight_of(b)
            .partial_cmp(&weight_of(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(b))
    });
    names.first().map(|s| s.to_string())
}
