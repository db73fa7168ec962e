//! Like/dislike bookkeeping for comments.
//!
//! A user holds at most one vote per comment. [`apply_vote`] decides what the
//! vote row becomes and how the counters stored on the comment move; the
//! database layer applies both in one transaction.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VoteType {
    #[serde(alias = "like")]
    Like,
    #[serde(alias = "dislike")]
    Dislike,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::Like => "LIKE",
            VoteType::Dislike => "DISLIKE",
        }
    }
}

impl FromStr for VoteType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LIKE" => Ok(VoteType::Like),
            "DISLIKE" => Ok(VoteType::Dislike),
            _ => Err(()),
        }
    }
}

/// What happens to the vote row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteChange {
    Create(VoteType),
    Update(VoteType),
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteOutcome {
    pub change: VoteChange,
    /// The caller's vote once the change is applied.
    pub new_state: Option<VoteType>,
    pub like_delta: i64,
    pub dislike_delta: i64,
}

fn delta(vote: VoteType, amount: i64) -> (i64, i64) {
    match vote {
        VoteType::Like => (amount, 0),
        VoteType::Dislike => (0, amount),
    }
}

/// Repeating the vote already held toggles it off.
pub fn apply_vote(existing: Option<VoteType>, requested: VoteType) -> VoteOutcome {
    match existing {
        None => {
            let (like_delta, dislike_delta) = delta(requested, 1);
            VoteOutcome {
                change: VoteChange::Create(requested),
                new_state: Some(requested),
                like_delta,
                dislike_delta,
            }
        }
        Some(previous) if previous == requested => {
            let (like_delta, dislike_delta) = delta(requested, -1);
            VoteOutcome {
                change: VoteChange::Delete,
                new_state: None,
                like_delta,
                dislike_delta,
            }
        }
        Some(previous) => {
            let (old_like, old_dislike) = delta(previous, -1);
            let (new_like, new_dislike) = delta(requested, 1);
            VoteOutcome {
                change: VoteChange::Update(requested),
                new_state: Some(requested),
                like_delta: old_like + new_like,
                dislike_delta: old_dislike + new_dislike,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_vote_counts_once() {
        let outcome = apply_vote(None, VoteType::Like);
        assert_eq!(outcome.change, VoteChange::Create(VoteType::Like));
        assert_eq!((outcome.like_delta, outcome.dislike_delta), (1, 0));

        let outcome = apply_vote(None, VoteType::Dislike);
        assert_eq!(outcome.new_state, Some(VoteType::Dislike));
        assert_eq!((outcome.like_delta, outcome.dislike_delta), (0, 1));
    }

    #[test]
    fn switching_moves_one_vote_between_counters() {
        let outcome = apply_vote(Some(VoteType::Dislike), VoteType::Like);
        assert_eq!(outcome.change, VoteChange::Update(VoteType::Like));
        assert_eq!((outcome.like_delta, outcome.dislike_delta), (1, -1));
        assert_eq!(outcome.like_delta + outcome.dislike_delta, 0);

        let outcome = apply_vote(Some(VoteType::Like), VoteType::Dislike);
        assert_eq!((outcome.like_delta, outcome.dislike_delta), (-1, 1));
    }

    #[test]
    fn repeating_a_vote_withdraws_it() {
        let outcome = apply_vote(Some(VoteType::Like), VoteType::Like);
        assert_eq!(outcome.change, VoteChange::Delete);
        assert_eq!(outcome.new_state, None);
        assert_eq!((outcome.like_delta, outcome.dislike_delta), (-1, 0));
    }

    #[test]
    fn vote_type_accepts_either_case() {
        assert_eq!("like".parse::<VoteType>(), Ok(VoteType::Like));
        assert_eq!("DISLIKE".parse::<VoteType>(), Ok(VoteType::Dislike));
        assert!("meh".parse::<VoteType>().is_err());
        let parsed: VoteType = serde_json::from_str("\"dislike\"").unwrap();
        assert_eq!(parsed, VoteType::Dislike);
    }
}
