use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::draw::{run_draw, DrawError, MIN_PARTICIPANTS};
use crate::group::Group;
use crate::store::GroupStore;
use crate::{DrawRecord, GroupId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub group_id: GroupId,
    pub message: String,
}

pub trait Notifier {
    fn notify(&self, notice: Notice);
}

impl<F> Notifier for F
where
    F: Fn(Notice),
{
    fn notify(&self, notice: Notice) {
        self(notice)
    }
}

// nothing is written; the record still has to go through commit_draw
pub fn prepare_draw<R: Rng + ?Sized>(
    group: &Group,
    owner_id: &str,
    rng: &mut R,
    now: u64,
) -> Result<DrawRecord, DrawError> {
    group.check_drawable(owner_id)?;
    let pairings = run_draw(&group.participants, rng)?;
    Ok(DrawRecord::from_pairings(&pairings, now))
}

pub fn commit_draw<S: GroupStore + ?Sized>(
    store: &mut S,
    group_id: &str,
    record: DrawRecord,
) -> Result<Group, DrawError> {
    let group = store.set_draw_if_absent(group_id, record)?;
    info!(
        group_id,
        participants = group.participants.len(),
        "draw committed"
    );
    Ok(group)
}

pub fn draw_group<S, N, R>(
    store: &mut S,
    notifier: &N,
    owner_id: &str,
    group_id: &str,
    rng: &mut R,
    now: u64,
) -> Result<Group, DrawError>
where
    S: GroupStore + ?Sized,
    N: Notifier + ?Sized,
    R: Rng + ?Sized,
{
    let outcome = store
        .group(group_id)
        .ok_or(DrawError::GroupNotFound)
        .and_then(|group| prepare_draw(&group, owner_id, rng, now))
        .and_then(|record| commit_draw(store, group_id, record));
    notifier.notify(draw_notice(group_id, &outcome));
    outcome
}

pub fn draw_notice(group_id: &str, outcome: &Result<Group, DrawError>) -> Notice {
    match outcome {
        Ok(group) => Notice {
            level: NoticeLevel::Success,
            group_id: group_id.to_string(),
            message: format!(
                "Draw complete! All {} participants now have their Secret Santa.",
                group.participants.len()
            ),
        },
        Err(err) => {
            warn!(group_id, error = %err, "draw failed");
            Notice {
                level: NoticeLevel::Failure,
                group_id: group_id.to_string(),
                message: draw_failure_message(err),
            }
        }
    }
}

pub fn draw_failure_message(err: &DrawError) -> String {
    match err {
        DrawError::InsufficientParticipants { found } => format!(
            "At least {MIN_PARTICIPANTS} participants are needed for the draw \
             (currently {found}). Invite more people and try again."
        ),
        DrawError::DrawExhausted { .. } => {
            "The draw could not find a valid assignment this time. Please try again.".to_string()
        }
        DrawError::ConcurrentDrawConflict => "The group was changed in another session while \
             the draw was running. Refresh to see the latest state."
            .to_string(),
        DrawError::AlreadyDrawn => "The draw for this group has already been performed.".to_string(),
        DrawError::GroupNotFound => "Group not found.".to_string(),
        DrawError::NotOwner => "Only the group organizer can run the draw.".to_string(),
        DrawError::Store(err) => format!("The draw could not be saved: {err}. Please try again."),
    }
}
