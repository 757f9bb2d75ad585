use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::draw::{DrawError, MIN_PARTICIPANTS};
use crate::{Assignment, DrawRecord, GroupEvent, GroupId, OwnerId, Participant, ParticipantId};

pub const INVITE_TOKEN_LEN: usize = 6;
const INVITE_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const MIN_NAME_LEN: usize = 2;
const MIN_GROUP_NAME_LEN: usize = 3;
const MIN_DESCRIPTION_LEN: usize = 10;
pub const MIN_PRICE_LIMIT_CENTS: u64 = 100;

pub fn invite_token<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..INVITE_TOKEN_LEN)
        .map(|_| INVITE_ALPHABET[rng.gen_range(0..INVITE_ALPHABET.len())] as char)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupDetails {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub exchange_date: Option<String>,
    #[serde(default)]
    pub price_limit_cents: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    pub owner_id: OwnerId,
    pub details: GroupDetails,
    pub invite_code: String,
    pub invite_password: String,
    pub participants: Vec<Participant>,
    pub draw_result: Option<Vec<Assignment>>,
    pub draw_date: Option<u64>,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub gift_hints: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroupError {
    #[error("group name must have at least 3 characters")]
    NameTooShort,
    #[error("description must have at least 10 characters")]
    DescriptionTooShort,
    #[error("exchange date required")]
    ExchangeDateRequired,
    #[error("price limit must be at least 1.00")]
    InvalidPriceLimit,
    #[error("owner id required")]
    OwnerRequired,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("no group with that invite code")]
    GroupNotFound,
    #[error("incorrect group password")]
    WrongPassword,
    #[error("this email is already registered in the group")]
    DuplicateEmail,
    #[error("the draw has already been performed for this group")]
    DrawClosed,
    #[error("name must have at least 2 characters")]
    InvalidName,
    #[error("invalid email")]
    InvalidEmail,
}

impl Group {
    pub fn new<R: Rng + ?Sized>(
        id: impl Into<GroupId>,
        owner_id: impl Into<OwnerId>,
        details: GroupDetails,
        rng: &mut R,
        created_at: u64,
    ) -> Result<Self, GroupError> {
        let owner_id = owner_id.into();
        if owner_id.trim().is_empty() {
            return Err(GroupError::OwnerRequired);
        }
        let name = details.name.trim().to_string();
        if name.chars().count() < MIN_GROUP_NAME_LEN {
            return Err(GroupError::NameTooShort);
        }
        let description = details.description.trim().to_string();
        if description.chars().count() < MIN_DESCRIPTION_LEN {
            return Err(GroupError::DescriptionTooShort);
        }
        let exchange_date = details
            .exchange_date
            .map(|date| date.trim().to_string())
            .filter(|date| !date.is_empty())
            .ok_or(GroupError::ExchangeDateRequired)?;
        let price_limit_cents = details
            .price_limit_cents
            .filter(|cents| *cents >= MIN_PRICE_LIMIT_CENTS)
            .ok_or(GroupError::InvalidPriceLimit)?;

        let details = GroupDetails {
            name,
            description,
            exchange_date: Some(exchange_date),
            price_limit_cents: Some(price_limit_cents),
        };

        Ok(Self {
            id: id.into(),
            owner_id,
            details,
            invite_code: invite_token(rng),
            invite_password: invite_token(rng),
            participants: Vec::new(),
            draw_result: None,
            draw_date: None,
            created_at,
        })
    }

    pub fn is_drawn(&self) -> bool {
        self.draw_result.is_some()
    }

    pub fn ensure_owner(&self, owner_id: &str) -> Result<(), DrawError> {
        if self.owner_id == owner_id {
            Ok(())
        } else {
            Err(DrawError::NotOwner)
        }
    }

    pub fn join(
        &mut self,
        request: JoinRequest,
        participant_id: impl Into<ParticipantId>,
        joined_at: u64,
    ) -> Result<GroupEvent, JoinError> {
        let name = request.name.trim();
        if name.chars().count() < MIN_NAME_LEN {
            return Err(JoinError::InvalidName);
        }
        let email = request.email.trim();
        if !looks_like_email(email) {
            return Err(JoinError::InvalidEmail);
        }

        if request.password.trim() != self.invite_password {
            return Err(JoinError::WrongPassword);
        }
        if self.is_drawn() {
            return Err(JoinError::DrawClosed);
        }
        if self
            .participants
            .iter()
            .any(|p| p.email.eq_ignore_ascii_case(email))
        {
            return Err(JoinError::DuplicateEmail);
        }

        let gift_hints = request
            .gift_hints
            .map(|hints| hints.trim().to_string())
            .filter(|hints| !hints.is_empty());

        let participant = Participant {
            id: participant_id.into(),
            name: name.to_string(),
            email: email.to_string(),
            gift_hints,
            joined_at,
        };
        let event = GroupEvent::ParticipantJoined {
            participant_id: participant.id.clone(),
            name: participant.name.clone(),
        };
        self.participants.push(participant);
        Ok(event)
    }

    pub fn check_drawable(&self, owner_id: &str) -> Result<(), DrawError> {
        self.ensure_owner(owner_id)?;
        if self.is_drawn() {
            return Err(DrawError::AlreadyDrawn);
        }
        if self.participants.len() < MIN_PARTICIPANTS {
            return Err(DrawError::InsufficientParticipants {
                found: self.participants.len(),
            });
        }
        Ok(())
    }

    // never overwrites; refuses a record drawn for other participants
    pub fn record_draw(&mut self, record: DrawRecord) -> Result<GroupEvent, DrawError> {
        if self.is_drawn() {
            return Err(DrawError::AlreadyDrawn);
        }
        if !record.covers(&self.participants) {
            return Err(DrawError::ConcurrentDrawConflict);
        }
        let participant_count = record.assignments.len();
        self.draw_date = Some(record.drawn_at);
        self.draw_result = Some(record.assignments);
        Ok(GroupEvent::DrawCompleted {
            drawn_at: record.drawn_at,
            participant_count,
        })
    }

    pub fn participant(&self, participant_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == participant_id)
    }

    pub fn assignment_for(&self, participant_id: &str) -> Option<&Participant> {
        let receiver_id = self
            .draw_result
            .as_ref()?
            .iter()
            .find(|a| a.giver_id == participant_id)
            .map(|a| &a.receiver_id)?;
        self.participant(receiver_id)
    }
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
