//! Sorted set (Redis ZSET)
//!
//! The member map sits behind its own lock so rank and range queries can run
//! against a shared entry without taking the shard lock for writing.

use crate::cache::data_structures::normalize_range;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Member with its score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

#[derive(Debug, Default)]
pub struct SortedSetValue {
    members: RwLock<HashMap<String, f64>>,
}

impl SortedSetValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a member, returns true if the member is new
    pub fn add(&self, member: impl Into<String>, score: f64) -> bool {
        self.members.write().insert(member.into(), score).is_none()
    }

    pub fn remove(&self, member: &str) -> bool {
        self.members.write().remove(member).is_some()
    }

    pub fn score(&self, member: &str) -> Option<f64> {
        self.members.read().get(member).copied()
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Members between ranks `start` and `stop` inclusive
    pub fn range_by_rank(&self, start: i64, stop: i64, reverse: bool) -> Vec<ScoredMember> {
        let sorted = self.sorted(reverse);
        match normalize_range(start, stop, sorted.len()) {
            Some((from, to)) => sorted[from..=to].to_vec(),
            None => Vec::new(),
        }
    }

    /// Zero-based rank of `member`
    pub fn rank(&self, member: &str, reverse: bool) -> Option<usize> {
        self.sorted(reverse).iter().position(|e| e.member == member)
    }

    /// Number of members with `min <= score <= max`
    pub fn count(&self, min: f64, max: f64) -> usize {
        self.members
            .read()
            .values()
            .filter(|score| **score >= min && **score <= max)
            .count()
    }

    pub fn range_by_score(&self, min: f64, max: f64, reverse: bool) -> Vec<ScoredMember> {
        let mut entries: Vec<ScoredMember> = self
            .members
            .read()
            .iter()
            .filter(|(_, score)| **score >= min && **score <= max)
            .map(|(member, score)| ScoredMember {
                member: member.clone(),
                score: *score,
            })
            .collect();
        sort_entries(&mut entries, reverse);
        entries
    }

    /// Remove members between ranks `start` and `stop`, returns the count removed
    pub fn remove_range_by_rank(&self, start: i64, stop: i64) -> usize {
        let mut members = self.members.write();
        let mut sorted = snapshot(&members);
        sort_entries(&mut sorted, false);

        let Some((from, to)) = normalize_range(start, stop, sorted.len()) else {
            return 0;
        };
        for entry in &sorted[from..=to] {
            members.remove(&entry.member);
        }
        to - from + 1
    }

    pub fn remove_range_by_score(&self, min: f64, max: f64) -> usize {
        let mut members = self.members.write();
        let before = members.len();
        members.retain(|_, score| !(*score >= min && *score <= max));
        before - members.len()
    }

    pub fn size_of(&self) -> i64 {
        self.members
            .read()
            .keys()
            .map(|m| m.len() as i64 + 16 + 80)
            .sum::<i64>()
            + 48
    }

    fn sorted(&self, reverse: bool) -> Vec<ScoredMember> {
        let mut entries = snapshot(&self.members.read());
        sort_entries(&mut entries, reverse);
        entries
    }
}

impl Clone for SortedSetValue {
    fn clone(&self) -> Self {
        Self {
            members: RwLock::new(self.members.read().clone()),
        }
    }
}

fn snapshot(members: &HashMap<String, f64>) -> Vec<ScoredMember> {
    members
        .iter()
        .map(|(member, score)| ScoredMember {
            member: member.clone(),
            score: *score,
        })
        .collect()
}

// Ascending by score, ties broken by member
fn compare(a: &ScoredMember, b: &ScoredMember) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then_with(|| a.member.cmp(&b.member))
}

fn sort_entries(entries: &mut [ScoredMember], reverse: bool) {
    if reverse {
        entries.sort_by(|a, b| compare(b, a));
    } else {
        entries.sort_by(compare);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaderboard() -> SortedSetValue {
        let zset = SortedSetValue::new();
        zset.add("alice", 100.0);
        zset.add("bob", 85.0);
        zset.add("charlie", 95.0);
        zset
    }

    #[test]
    fn test_sorted_set_operations() {
        let zset = leaderboard();

        assert_eq!(zset.len(), 3);
        assert_eq!(zset.score("alice"), Some(100.0));
        assert!(!zset.add("alice", 101.0));
        assert_eq!(zset.score("alice"), Some(101.0));

        let range = zset.range_by_rank(0, 1, false);
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].member, "bob");
        assert_eq!(range[1].member, "charlie");

        let by_score = zset.range_by_score(90.0, 100.0, false);
        assert_eq!(by_score.len(), 1);
        assert_eq!(by_score[0].member, "charlie");
    }

    #[test]
    fn test_rank_and_reverse() {
        let zset = leaderboard();

        assert_eq!(zset.rank("bob", false), Some(0));
        assert_eq!(zset.rank("bob", true), Some(2));
        assert_eq!(zset.rank("nobody", false), None);

        let top = zset.range_by_rank(0, 0, true);
        assert_eq!(top[0].member, "alice");
        assert_eq!(zset.range_by_rank(-1, -1, false)[0].member, "alice");
    }

    #[test]
    fn test_ties_ordered_by_member() {
        let zset = SortedSetValue::new();
        zset.add("b", 1.0);
        zset.add("a", 1.0);
        let range = zset.range_by_rank(0, -1, false);
        assert_eq!(range[0].member, "a");
        assert_eq!(range[1].member, "b");
    }

    #[test]
    fn test_remove_ranges() {
        let zset = leaderboard();
        assert_eq!(zset.count(0.0, 200.0), 3);

        assert_eq!(zset.remove_range_by_rank(0, 0), 1);
        assert_eq!(zset.score("bob"), None);

        assert_eq!(zset.remove_range_by_score(90.0, 96.0), 1);
        assert_eq!(zset.len(), 1);
        assert_eq!(zset.remove_range_by_rank(5, 10), 0);
    }

    #[test]
    fn test_clone_is_independent() {
        let zset = leaderboard();
        let copy = zset.clone();
        copy.add("dave", 1.0);
        assert_eq!(zset.len(), 3);
        assert_eq!(copy.len(), 4);
    }

    #[test]
    fn test_size() {
        let zset = SortedSetValue::new();
        assert_eq!(zset.size_of(), 48);
        zset.add("abc", 1.0);
        assert_eq!(zset.size_of(), 48 + 3 + 16 + 80);
    }
}
