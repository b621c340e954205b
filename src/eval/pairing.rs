//! One-to-one pairing of expected and actual tool calls.
//!
//! Only calls sharing a tool name are candidates, so each tool name is paired
//! independently. Small groups are searched exhaustively for the assignment
//! with the most passing pairs, then the highest total argument score; ties
//! keep the assignment that gives earlier expected calls earlier actual
//! calls. Groups larger than `MAX_EXHAUSTIVE` fall back to claiming ranked
//! candidates greedily.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::matcher::match_arguments;
use super::types::{ArgumentMatch, CallMatchResult, MatchLevel, ToolCallSpec};

/// Largest per-name group (on either side) searched exhaustively.
const MAX_EXHAUSTIVE: usize = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct Pairing {
    /// Pairs ordered by expected index.
    pub matched: Vec<CallMatchResult>,
    /// Unpaired expected calls, in expected order.
    pub missing: Vec<ToolCallSpec>,
    /// Unpaired actual calls, in actual order.
    pub extra: Vec<ToolCallSpec>,
}

impl Pairing {
    /// Strict verdict: nothing missing, nothing extra, every pair passed.
    pub fn passed(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.matched.iter().all(|m| m.passed)
    }
}

struct Candidate {
    expected_idx: usize,
    actual_idx: usize,
    result: ArgumentMatch,
}

fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.result
        .passed
        .cmp(&a.result.passed)
        .then_with(|| b.result.score.total_cmp(&a.result.score))
        .then_with(|| a.expected_idx.cmp(&b.expected_idx))
        .then_with(|| a.actual_idx.cmp(&b.actual_idx))
}

/// Expected and actual indices of calls sharing one tool name.
#[derive(Default)]
struct NameGroup {
    expected: Vec<usize>,
    actual: Vec<usize>,
}

pub fn resolve(expected: &[ToolCallSpec], actual: &[ToolCallSpec], level: MatchLevel) -> Pairing {
    let mut groups: BTreeMap<&str, NameGroup> = BTreeMap::new();
    for (idx, call) in expected.iter().enumerate() {
        groups.entry(call.name.as_str()).or_default().expected.push(idx);
    }
    for (idx, call) in actual.iter().enumerate() {
        if let Some(group) = groups.get_mut(call.name.as_str()) {
            group.actual.push(idx);
        }
    }

    let mut pairs = Vec::new();
    for group in groups.values() {
        if group.expected.is_empty() || group.actual.is_empty() {
            continue;
        }
        let candidates = group
            .expected
            .iter()
            .map(|&expected_idx| {
                group
                    .actual
                    .iter()
                    .map(|&actual_idx| Candidate {
                        expected_idx,
                        actual_idx,
                        result: match_arguments(
                            &expected[expected_idx].arguments,
                            &actual[actual_idx].arguments,
                            level,
                        ),
                    })
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        if group.expected.len() <= MAX_EXHAUSTIVE && group.actual.len() <= MAX_EXHAUSTIVE {
            pairs.extend(best_assignment(candidates));
        } else {
            pairs.extend(greedy_assignment(candidates));
        }
    }
    pairs.sort_by_key(|c| c.expected_idx);

    let mut expected_claimed = vec![false; expected.len()];
    let mut actual_claimed = vec![false; actual.len()];
    for pair in &pairs {
        expected_claimed[pair.expected_idx] = true;
        actual_claimed[pair.actual_idx] = true;
    }

    let matched = pairs
        .into_iter()
        .map(|c| {
            let exp = &expected[c.expected_idx];
            let act = &actual[c.actual_idx];
            CallMatchResult {
                expected: exp.clone(),
                actual: act.clone(),
                name_matched: true,
                argument_score: c.result.score,
                passed: c.result.passed,
                fields: c.result.fields,
                unexpected_arguments: unexpected_arguments(exp, act),
            }
        })
        .collect();

    let missing = expected
        .iter()
        .zip(&expected_claimed)
        .filter(|(_, claimed)| !**claimed)
        .map(|(call, _)| call.clone())
        .collect();
    let extra = actual
        .iter()
        .zip(&actual_claimed)
        .filter(|(_, claimed)| !**claimed)
        .map(|(call, _)| call.clone())
        .collect();

    Pairing {
        matched,
        missing,
        extra,
    }
}

/// Claims ranked candidates while both sides are unclaimed.
fn greedy_assignment(rows: Vec<Vec<Candidate>>) -> Vec<Candidate> {
    let mut candidates = rows.into_iter().flatten().collect::<Vec<_>>();
    candidates.sort_by(rank);

    let mut pairs: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let taken = pairs.iter().any(|p| {
            p.expected_idx == candidate.expected_idx || p.actual_idx == candidate.actual_idx
        });
        if !taken {
            pairs.push(candidate);
        }
    }
    pairs
}

#[derive(Clone, Copy, PartialEq)]
struct AssignmentScore {
    passed: usize,
    score: f64,
}

impl AssignmentScore {
    fn beats(&self, other: &Self) -> bool {
        self.passed > other.passed || (self.passed == other.passed && self.score > other.score)
    }
}

struct Search<'a> {
    rows: &'a [Vec<Candidate>],
    /// Expected calls that may stay unpaired; the group always pairs as
    /// many calls as the smaller side allows.
    skips: usize,
    current: Vec<Option<usize>>,
    used: Vec<bool>,
    best: Option<(AssignmentScore, Vec<Option<usize>>)>,
}

impl Search<'_> {
    fn visit(&mut self, row: usize, skipped: usize, so_far: AssignmentScore) {
        if row == self.rows.len() {
            let improves = match &self.best {
                Some((best, _)) => so_far.beats(best),
                None => true,
            };
            if improves {
                self.best = Some((so_far, self.current.clone()));
            }
            return;
        }

        for col in 0..self.used.len() {
            if self.used[col] {
                continue;
            }
            let result = &self.rows[row][col].result;
            let next = AssignmentScore {
                passed: so_far.passed + usize::from(result.passed),
                score: so_far.score + result.score,
            };
            self.used[col] = true;
            self.current.push(Some(col));
            self.visit(row + 1, skipped, next);
            self.current.pop();
            self.used[col] = false;
        }

        if skipped < self.skips {
            self.current.push(None);
            self.visit(row + 1, skipped + 1, so_far);
            self.current.pop();
        }
    }
}

/// Exhaustive search over one-to-one assignments of a small group. Search
/// order visits lower actual indices first for earlier expected calls, and
/// only a strictly better assignment replaces the first one found.
fn best_assignment(rows: Vec<Vec<Candidate>>) -> Vec<Candidate> {
    let columns = rows.first().map_or(0, Vec::len);
    let mut search = Search {
        rows: &rows,
        skips: rows.len().saturating_sub(columns),
        current: Vec::with_capacity(rows.len()),
        used: vec![false; columns],
        best: None,
    };
    search.visit(
        0,
        0,
        AssignmentScore {
            passed: 0,
            score: 0.0,
        },
    );
    let chosen = search.best.map(|(_, cols)| cols).unwrap_or_default();

    rows.into_iter()
        .zip(chosen)
        .filter_map(|(row, col)| col.and_then(|col| row.into_iter().nth(col)))
        .collect()
}

fn unexpected_arguments(expected: &ToolCallSpec, actual: &ToolCallSpec) -> Vec<String> {
    let mut keys = actual
        .arguments
        .keys()
        .filter(|key| !expected.arguments.contains_key(*key))
        .cloned()
        .collect::<Vec<_>>();
    keys.sort();
    keys
}
