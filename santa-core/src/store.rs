use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::draw::DrawError;
use crate::group::Group;
use crate::{DrawRecord, OwnerId, Participant};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("group not found")]
    GroupNotFound,
    #[error("group {0} already exists")]
    DuplicateGroup(String),
    #[error("invite code {0} already in use")]
    DuplicateInviteCode(String),
    #[error("a draw is already recorded for this group")]
    DrawAlreadySet,
    #[error("participants changed since the draw was prepared")]
    ParticipantsChanged,
}

pub trait GroupStore {
    fn groups_for_owner(&self, owner_id: &str) -> Vec<Group>;

    fn group(&self, group_id: &str) -> Option<Group>;

    fn find_by_invite_code(&self, invite_code: &str) -> Option<Group>;

    fn insert_group(&mut self, group: Group) -> Result<(), StoreError>;

    fn save_participants(
        &mut self,
        group_id: &str,
        participants: Vec<Participant>,
    ) -> Result<(), StoreError>;

    // Records `draw` only while the stored group has none and its
    // participants are the ones the draw was made for.
    fn set_draw_if_absent(&mut self, group_id: &str, draw: DrawRecord)
        -> Result<Group, StoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct MemoryStore {
    groups: HashMap<OwnerId, Vec<Group>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    fn all_groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values().flatten()
    }

    fn group_mut(&mut self, group_id: &str) -> Option<&mut Group> {
        self.groups
            .values_mut()
            .flat_map(|groups| groups.iter_mut())
            .find(|g| g.id == group_id)
    }
}

impl GroupStore for MemoryStore {
    fn groups_for_owner(&self, owner_id: &str) -> Vec<Group> {
        self.groups.get(owner_id).cloned().unwrap_or_default()
    }

    fn group(&self, group_id: &str) -> Option<Group> {
        self.all_groups().find(|g| g.id == group_id).cloned()
    }

    fn find_by_invite_code(&self, invite_code: &str) -> Option<Group> {
        let code = invite_code.trim();
        self.all_groups()
            .find(|g| g.invite_code.eq_ignore_ascii_case(code))
            .cloned()
    }

    fn insert_group(&mut self, group: Group) -> Result<(), StoreError> {
        if self.all_groups().any(|g| g.id == group.id) {
            return Err(StoreError::DuplicateGroup(group.id));
        }
        if self
            .all_groups()
            .any(|g| g.invite_code.eq_ignore_ascii_case(&group.invite_code))
        {
            return Err(StoreError::DuplicateInviteCode(group.invite_code));
        }
        self.groups
            .entry(group.owner_id.clone())
            .or_default()
            .push(group);
        Ok(())
    }

    fn save_participants(
        &mut self,
        group_id: &str,
        participants: Vec<Participant>,
    ) -> Result<(), StoreError> {
        let group = self.group_mut(group_id).ok_or(StoreError::GroupNotFound)?;
        group.participants = participants;
        Ok(())
    }

    fn set_draw_if_absent(
        &mut self,
        group_id: &str,
        draw: DrawRecord,
    ) -> Result<Group, StoreError> {
        let group = self.group_mut(group_id).ok_or(StoreError::GroupNotFound)?;
        group.record_draw(draw).map_err(|err| match err {
            DrawError::ConcurrentDrawConflict => StoreError::ParticipantsChanged,
            _ => StoreError::DrawAlreadySet,
        })?;
        Ok(group.clone())
    }
}
