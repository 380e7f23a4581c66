//! Plurality voting over parallel deliberation samples.

use std::sync::Arc;

use serde_json::Value;

/// Merges the reasons of all winning samples into one.
pub type ReasonAggregator = Arc<dyn Fn(&[String]) -> String + Send + Sync>;

/// Default aggregation: the longest reason, earliest on ties.
pub fn longest_reason(reasons: &[String]) -> String {
    reasons
        .iter()
        .fold(None::<&String>, |best, reason| match best {
            Some(best) if best.chars().count() >= reason.chars().count() => Some(best),
            _ => Some(reason),
        })
        .cloned()
        .unwrap_or_default()
}

pub fn default_aggregator() -> ReasonAggregator {
    Arc::new(longest_reason)
}

/// Ballot of a response when voting on its raw `vote_field` value. Responses
/// missing the field vote for `null`.
pub fn field_vote(response: &Value, vote_field: &str) -> String {
    response.get(vote_field).unwrap_or(&Value::Null).to_string()
}

/// Indices of the samples whose ballot won the plurality.
///
/// `ballots[i]` is the vote of sample `i`. Ties go to the ballot that
/// appeared first.
pub fn plurality_winners(ballots: &[String]) -> Vec<usize> {
    // (ballot, count), in order of first appearance.
    let mut tally: Vec<(&str, usize)> = Vec::new();
    for ballot in ballots {
        match tally.iter_mut().find(|(seen, _)| *seen == ballot.as_str()) {
            Some((_, count)) => *count += 1,
            None => tally.push((ballot.as_str(), 1)),
        }
    }

    let Some(&(winner, _)) = tally
        .iter()
        .fold(None::<&(&str, usize)>, |best, entry| match best {
            Some(best) if best.1 >= entry.1 => Some(best),
            _ => Some(entry),
        })
    else {
        return Vec::new();
    };

    ballots
        .iter()
        .enumerate()
        .filter(|(_, ballot)| ballot.as_str() == winner)
        .map(|(idx, _)| idx)
        .collect()
}

/// Collapse samples into one synthetic response.
///
/// The result is the first winning sample with its reason field replaced by
/// the aggregation of every winning sample's reason.
pub fn aggregate(
    samples: &[Value],
    ballots: &[String],
    reason_field: Option<&str>,
    aggregator: &ReasonAggregator,
) -> Option<Value> {
    let winners = plurality_winners(ballots);
    let mut merged = samples.get(*winners.first()?)?.clone();

    if let Some(field) = reason_field {
        let reasons: Vec<String> = winners
            .iter()
            .filter_map(|&idx| samples[idx].get(field).and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        if let Some(object) = merged.as_object_mut() {
            object.insert(field.to_string(), Value::String(aggregator(&reasons)));
        }
    }

    Some(merged)
}
