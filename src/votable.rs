//! Vote counters and edit flags shared by posts, comments and messages.
//!
//! `votes` is never written on its own: every mutation goes through
//! [`Tally::apply`], which bumps one counter and recomputes the net score in
//! the same step. The Postgres schema mirrors this with a generated column.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Comment, Message, Post};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Tally {
    pub votes: i64,
    pub upvotes: i64,
    pub downvotes: i64,
}

impl Tally {
    /// Records one vote and returns the new net score.
    pub fn apply(&mut self, vote: Vote) -> i64 {
        match vote {
            Vote::Up => self.upvotes += 1,
            Vote::Down => self.downvotes += 1,
        }
        self.votes = self.upvotes - self.downvotes;
        self.votes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct EditState {
    pub created_at: DateTime<Utc>,
    pub is_edited: bool,
    pub last_edited: Option<DateTime<Utc>>,
}

impl EditState {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self { created_at, is_edited: false, last_edited: None }
    }
}

pub trait Votable {
    fn tally(&self) -> &Tally;
    fn tally_mut(&mut self) -> &mut Tally;

    fn upvote(&mut self) -> i64 {
        self.tally_mut().apply(Vote::Up)
    }

    fn downvote(&mut self) -> i64 {
        self.tally_mut().apply(Vote::Down)
    }

    fn cast(&mut self, vote: Vote) -> i64 {
        self.tally_mut().apply(vote)
    }
}

/// Content carrying an "edited" flag. No prior versions are kept and the
/// content is not diffed: an edit with identical text still counts.
pub trait Editable {
    fn content_mut(&mut self) -> &mut String;
    fn edit_state_mut(&mut self) -> &mut EditState;

    fn edit(&mut self, content: String, at: DateTime<Utc>) {
        *self.content_mut() = content;
        let state = self.edit_state_mut();
        state.is_edited = true;
        state.last_edited = Some(at);
    }
}

impl Votable for Post {
    fn tally(&self) -> &Tally { &self.tally }
    fn tally_mut(&mut self) -> &mut Tally { &mut self.tally }
}

impl Votable for Comment {
    fn tally(&self) -> &Tally { &self.tally }
    fn tally_mut(&mut self) -> &mut Tally { &mut self.tally }
}

impl Editable for Post {
    fn content_mut(&mut self) -> &mut String { &mut self.statement }
    fn edit_state_mut(&mut self) -> &mut EditState { &mut self.edits }
}

impl Editable for Comment {
    fn content_mut(&mut self) -> &mut String { &mut self.statement }
    fn edit_state_mut(&mut self) -> &mut EditState { &mut self.edits }
}

impl Editable for Message {
    fn content_mut(&mut self) -> &mut String { &mut self.body }
    fn edit_state_mut(&mut self) -> &mut EditState { &mut self.edits }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(up: i64, down: i64) -> Post {
        Post {
            id: 1,
            author: None,
            title: "t".into(),
            statement: "s".into(),
            tally: Tally { votes: up - down, upvotes: up, downvotes: down },
            slug: "abc".into(),
            edits: EditState::new(Utc::now()),
            reported: false,
            controversial: false,
            trending: false,
        }
    }

    #[test]
    fn downvote_recomputes_net_score() {
        let mut p = post(3, 1);
        assert_eq!(p.tally().votes, 2);
        assert_eq!(p.downvote(), 1);
        assert_eq!(p.tally, Tally { votes: 1, upvotes: 3, downvotes: 2 });
    }

    #[test]
    fn votes_track_counters_for_any_sequence() {
        let mut p = post(0, 0);
        let seq = [Vote::Up, Vote::Down, Vote::Down, Vote::Up, Vote::Up, Vote::Down, Vote::Down, Vote::Down];
        for v in seq {
            let net = p.cast(v);
            assert_eq!(net, p.tally.upvotes - p.tally.downvotes);
            assert_eq!(net, p.tally.votes);
        }
        assert_eq!(p.tally, Tally { votes: -2, upvotes: 3, downvotes: 5 });
    }

    #[test]
    fn edit_sets_flag_even_when_unchanged() {
        let mut p = post(0, 0);
        let first = Utc::now();
        p.edit("s".into(), first);
        assert!(p.edits.is_edited);
        assert_eq!(p.statement, "s");
        assert_eq!(p.edits.last_edited, Some(first));

        let later = first + chrono::Duration::seconds(5);
        p.edit("s".into(), later);
        assert_eq!(p.edits.last_edited, Some(later));
    }
}
