use serde::{Deserialize, Serialize};

pub mod draw;
pub mod group;
pub mod service;
pub mod store;

pub use draw::{
    run_draw, run_draw_with, shuffle, DrawError, Pairing, MAX_DRAW_ATTEMPTS, MIN_PARTICIPANTS,
};
pub use group::{invite_token, Group, GroupDetails, GroupError, JoinError, JoinRequest};
pub use service::{
    commit_draw, draw_failure_message, draw_group, draw_notice, prepare_draw, Notice,
    NoticeLevel, Notifier,
};
pub use store::{GroupStore, MemoryStore, StoreError};

pub type ParticipantId = String;
pub type GroupId = String;
pub type OwnerId = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub email: String,
    pub gift_hints: Option<String>,
    pub joined_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assignment {
    pub giver_id: ParticipantId,
    pub receiver_id: ParticipantId,
}

// Assignments and timestamp are always written together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrawRecord {
    pub assignments: Vec<Assignment>,
    pub drawn_at: u64,
}

impl DrawRecord {
    pub fn from_pairings(pairings: &[Pairing<'_>], drawn_at: u64) -> Self {
        Self {
            assignments: pairings.iter().map(Pairing::assignment).collect(),
            drawn_at,
        }
    }

    pub fn covers(&self, participants: &[Participant]) -> bool {
        if self.assignments.len() != participants.len() {
            return false;
        }
        let givers_match = self
            .assignments
            .iter()
            .zip(participants)
            .all(|(assignment, participant)| assignment.giver_id == participant.id);
        let mut receivers: Vec<&str> = self
            .assignments
            .iter()
            .map(|a| a.receiver_id.as_str())
            .collect();
        let mut ids: Vec<&str> = participants.iter().map(|p| p.id.as_str()).collect();
        receivers.sort_unstable();
        ids.sort_unstable();
        givers_match && receivers == ids
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum GroupEvent {
    ParticipantJoined {
        participant_id: ParticipantId,
        name: String,
    },
    DrawCompleted {
        drawn_at: u64,
        participant_count: usize,
    },
}
