//! Version-aware instance resolution shared by every discovery backend.
//!
//! Versions split into segments on any non-alphanumeric character. Numeric
//! segments compare numerically, other segments compare lexically ignoring
//! case, and a numeric segment sorts above a non-numeric one. A missing
//! trailing segment counts as `0`, so `1.0 == 1` and `1.0-SNAPSHOT < 1.0`.

use crate::error::{RegistryError, Result};
use crate::instance::ServiceInstance;
use crate::query::InstanceQuery;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Digits with leading zeros removed ("0" stays "0").
    Number(String),
    Text(String),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        if raw.bytes().all(|b| b.is_ascii_digit()) {
            let trimmed = raw.trim_start_matches('0');
            Segment::Number(if trimmed.is_empty() { "0" } else { trimmed }.to_string())
        } else {
            Segment::Text(raw.to_lowercase())
        }
    }
}

const ZERO: &Segment = &Segment::Number(String::new());

fn segments(version: &str) -> Vec<Segment> {
    version
        .split(|c: char| !c.is_alphanumeric())
        .filter(|raw| !raw.is_empty())
        .map(Segment::parse)
        .collect()
}

/// Numbers of any length: longer (after zero trimming) is larger.
fn compare_numbers(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.trim_start_matches('0'), b.trim_start_matches('0'));
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_segments(a: &Segment, b: &Segment) -> Ordering {
    match (a, b) {
        (Segment::Number(x), Segment::Number(y)) => compare_numbers(x, y),
        (Segment::Text(x), Segment::Text(y)) => x.cmp(y),
        (Segment::Number(_), Segment::Text(_)) => Ordering::Greater,
        (Segment::Text(_), Segment::Number(_)) => Ordering::Less,
    }
}

/// Total order over version strings.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (left, right) = (segments(a), segments(b));
    let len = left.len().max(right.len());
    (0..len)
        .map(|i| {
            compare_segments(
                left.get(i).unwrap_or(ZERO),
                right.get(i).unwrap_or(ZERO),
            )
        })
        .find(|ordering| *ordering != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

fn version_of(instance: &ServiceInstance) -> Result<&str> {
    instance
        .version()
        .ok_or_else(|| RegistryError::MissingVersion(instance.instance_id().to_string()))
}

/// Whether the instance runs `minimum` or anything newer.
pub fn version_is_at_least(instance: &ServiceInstance, minimum: &str) -> Result<bool> {
    Ok(compare_versions(version_of(instance)?, minimum) != Ordering::Less)
}

fn version_matches(instance: &ServiceInstance, expected: &str) -> bool {
    instance
        .version()
        .is_some_and(|version| version.eq_ignore_ascii_case(expected))
}

/// Narrows `candidates` to the instances satisfying the query's version hints.
///
/// Instances below the minimum are dropped. Among the rest, those running the
/// preferred version win; if none do, the instances running the newest
/// version are returned instead, so a missing preferred version never empties
/// the result on its own.
pub fn resolve(candidates: &[ServiceInstance], query: &InstanceQuery) -> Result<Vec<ServiceInstance>> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    if query.has_no_minimum() && query.has_no_preferred() {
        return Ok(candidates.to_vec());
    }

    let eligible: Vec<&ServiceInstance> = match query.minimum_version() {
        Some(minimum) => {
            let mut eligible = Vec::with_capacity(candidates.len());
            for candidate in candidates {
                if version_is_at_least(candidate, minimum)? {
                    eligible.push(candidate);
                }
            }
            eligible
        }
        None => candidates.iter().collect(),
    };
    if eligible.is_empty() {
        return Ok(Vec::new());
    }

    let Some(preferred) = query.preferred_version() else {
        return Ok(eligible.into_iter().cloned().collect());
    };

    let preferred_matches: Vec<ServiceInstance> = eligible
        .iter()
        .filter(|instance| version_matches(instance, preferred))
        .map(|instance| (*instance).clone())
        .collect();
    if !preferred_matches.is_empty() {
        return Ok(preferred_matches);
    }

    let mut newest = version_of(eligible[0])?;
    for instance in &eligible[1..] {
        let version = version_of(instance)?;
        if compare_versions(version, newest) == Ordering::Greater {
            newest = version;
        }
    }

    // "1.4" and "1.4.0" are the same release; return both spellings
    let mut newest_instances = Vec::new();
    for instance in eligible {
        if compare_versions(version_of(instance)?, newest) == Ordering::Equal {
            newest_instances.push(instance.clone());
        }
    }
    Ok(newest_instances)
}
