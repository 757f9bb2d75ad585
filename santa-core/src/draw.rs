use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::store::StoreError;
use crate::{Assignment, Participant};

// two-person exchanges are not offered
pub const MIN_PARTICIPANTS: usize = 3;

pub const MAX_DRAW_ATTEMPTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pairing<'a> {
    pub giver: &'a Participant,
    pub receiver: &'a Participant,
}

impl Pairing<'_> {
    pub fn assignment(&self) -> Assignment {
        Assignment {
            giver_id: self.giver.id.clone(),
            receiver_id: self.receiver.id.clone(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DrawError {
    #[error("at least 3 participants are required, found {found}")]
    InsufficientParticipants { found: usize },
    #[error("no valid assignment found after {attempts} attempts")]
    DrawExhausted { attempts: usize },
    #[error("group changed by another session while drawing")]
    ConcurrentDrawConflict,
    #[error("draw already performed")]
    AlreadyDrawn,
    #[error("group not found")]
    GroupNotFound,
    #[error("only the group owner can run the draw")]
    NotOwner,
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for DrawError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DrawAlreadySet | StoreError::ParticipantsChanged => {
                DrawError::ConcurrentDrawConflict
            }
            StoreError::GroupNotFound => DrawError::GroupNotFound,
            other => DrawError::Store(other),
        }
    }
}

enum DrawState<'a> {
    Sampling { attempt: usize },
    Success(Vec<&'a Participant>),
    Exhausted,
}

// Fisher–Yates
pub fn shuffle<T, R: Rng + ?Sized>(items: &mut [T], rng: &mut R) {
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

pub fn run_draw<'a, R: Rng + ?Sized>(
    participants: &'a [Participant],
    rng: &mut R,
) -> Result<Vec<Pairing<'a>>, DrawError> {
    run_draw_with(participants, MAX_DRAW_ATTEMPTS, |candidate| {
        shuffle(candidate, rng)
    })
}

// `shuffler` must leave its slice a permutation of what it was given.
pub fn run_draw_with<'a, F>(
    participants: &'a [Participant],
    max_attempts: usize,
    mut shuffler: F,
) -> Result<Vec<Pairing<'a>>, DrawError>
where
    F: FnMut(&mut [&'a Participant]),
{
    if participants.len() < MIN_PARTICIPANTS {
        return Err(DrawError::InsufficientParticipants {
            found: participants.len(),
        });
    }

    let givers: Vec<&Participant> = participants.iter().collect();
    let mut state = DrawState::Sampling { attempt: 1 };

    loop {
        state = match state {
            DrawState::Sampling { attempt } if attempt > max_attempts => DrawState::Exhausted,
            DrawState::Sampling { attempt } => {
                let mut receivers = givers.clone();
                shuffler(&mut receivers);
                match first_self_assignment(&givers, &receivers) {
                    None => {
                        debug!(attempt, "draw candidate accepted");
                        DrawState::Success(receivers)
                    }
                    Some(index) => {
                        debug!(attempt, index, "draw candidate rejected");
                        DrawState::Sampling {
                            attempt: attempt + 1,
                        }
                    }
                }
            }
            DrawState::Success(receivers) => {
                return Ok(givers
                    .iter()
                    .zip(receivers)
                    .map(|(giver, receiver)| Pairing {
                        giver: *giver,
                        receiver,
                    })
                    .collect());
            }
            DrawState::Exhausted => {
                return Err(DrawError::DrawExhausted {
                    attempts: max_attempts,
                });
            }
        };
    }
}

fn first_self_assignment(givers: &[&Participant], receivers: &[&Participant]) -> Option<usize> {
    givers
        .iter()
        .zip(receivers)
        .position(|(giver, receiver)| giver.id == receiver.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashMap;

    fn participant(id: &str) -> Participant {
        Participant {
            id: id.to_string(),
            name: id.to_uppercase(),
            email: format!("{id}@example.com"),
            gift_hints: None,
            joined_at: 0,
        }
    }

    fn participants(ids: &[&str]) -> Vec<Participant> {
        ids.iter().map(|id| participant(id)).collect()
    }

    fn assert_valid_draw(input: &[Participant], pairs: &[Pairing<'_>]) {
        assert_eq!(pairs.len(), input.len());
        for (pair, expected_giver) in pairs.iter().zip(input) {
            assert_eq!(pair.giver.id, expected_giver.id, "pairs follow giver order");
            assert_ne!(pair.giver.id, pair.receiver.id, "self-assignment");
        }
        let mut givers: Vec<&str> = pairs.iter().map(|p| p.giver.id.as_str()).collect();
        let mut receivers: Vec<&str> = pairs.iter().map(|p| p.receiver.id.as_str()).collect();
        givers.sort_unstable();
        receivers.sort_unstable();
        assert_eq!(givers, receivers, "every participant receives exactly once");
    }

    #[test]
    fn three_participants_always_get_a_valid_draw() {
        let people = participants(&["a", "b", "c"]);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..500 {
            let pairs = run_draw(&people, &mut rng).unwrap();
            assert_valid_draw(&people, &pairs);
        }
    }

    #[test]
    fn larger_groups_get_a_valid_draw() {
        let ids: Vec<String> = (0..40).map(|i| format!("p{i}")).collect();
        let people: Vec<Participant> = ids.iter().map(|id| participant(id)).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(2024);
        for _ in 0..50 {
            let pairs = run_draw(&people, &mut rng).unwrap();
            assert_valid_draw(&people, &pairs);
        }
    }

    #[test]
    fn fewer_than_three_participants_are_refused() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for ids in [&[][..], &["a"][..], &["a", "b"][..]] {
            let people = participants(ids);
            let err = run_draw(&people, &mut rng).unwrap_err();
            assert_eq!(
                err,
                DrawError::InsufficientParticipants { found: ids.len() }
            );
        }
    }

    #[test]
    fn two_participants_refused_even_with_a_swapping_shuffler() {
        let people = participants(&["a", "b"]);
        let mut calls = 0;
        let err = run_draw_with(&people, MAX_DRAW_ATTEMPTS, |c| {
            calls += 1;
            c.swap(0, 1);
        })
        .unwrap_err();
        assert_eq!(err, DrawError::InsufficientParticipants { found: 2 });
        assert_eq!(calls, 0);
    }

    #[test]
    fn shuffle_returns_a_permutation() {
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let original: Vec<u32> = (0..25).collect();
        for _ in 0..100 {
            let mut shuffled = original.clone();
            shuffle(&mut shuffled, &mut rng);
            let mut sorted = shuffled.clone();
            sorted.sort_unstable();
            assert_eq!(sorted, original);
        }
    }

    #[test]
    fn shuffle_handles_empty_and_single_slices() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut empty: Vec<u8> = Vec::new();
        shuffle(&mut empty, &mut rng);
        assert!(empty.is_empty());
        let mut one = vec![42];
        shuffle(&mut one, &mut rng);
        assert_eq!(one, vec![42]);
    }

    #[test]
    fn rejected_candidates_are_retried() {
        let people = participants(&["a", "b", "c", "d"]);
        let mut calls = 0;
        let pairs = run_draw_with(&people, MAX_DRAW_ATTEMPTS, |c| {
            calls += 1;
            match calls {
                // identity, then a candidate with one fixed point
                1 => {}
                2 => c.swap(0, 1),
                _ => c.rotate_left(1),
            }
        })
        .unwrap();

        assert_eq!(calls, 3);
        assert_valid_draw(&people, &pairs);
        let receivers: Vec<&str> = pairs.iter().map(|p| p.receiver.id.as_str()).collect();
        assert_eq!(receivers, vec!["b", "c", "d", "a"]);
    }

    #[test]
    fn exhaustion_is_reported_after_the_attempt_budget() {
        let people = participants(&["a", "b", "c"]);
        let mut calls = 0;
        let err = run_draw_with(&people, MAX_DRAW_ATTEMPTS, |_| calls += 1).unwrap_err();
        assert_eq!(
            err,
            DrawError::DrawExhausted {
                attempts: MAX_DRAW_ATTEMPTS
            }
        );
        assert_eq!(calls, MAX_DRAW_ATTEMPTS);
    }

    #[test]
    fn custom_budget_is_respected() {
        let people = participants(&["a", "b", "c"]);
        let mut calls = 0;
        let err = run_draw_with(&people, 5, |_| calls += 1).unwrap_err();
        assert_eq!(err, DrawError::DrawExhausted { attempts: 5 });
        assert_eq!(calls, 5);
    }

    #[test]
    fn receiver_distribution_is_roughly_uniform() {
        let people = participants(&["a", "b", "c", "d"]);
        let mut rng = ChaCha8Rng::seed_from_u64(4242);
        let mut receivers_of_a: HashMap<String, usize> = HashMap::new();

        for _ in 0..1000 {
            let pairs = run_draw(&people, &mut rng).unwrap();
            assert_valid_draw(&people, &pairs);
            *receivers_of_a
                .entry(pairs[0].receiver.id.clone())
                .or_insert(0) += 1;
        }

        assert!(!receivers_of_a.contains_key("a"));
        for id in ["b", "c", "d"] {
            let count = receivers_of_a.get(id).copied().unwrap_or(0);
            assert!(
                (250..=420).contains(&count),
                "receiver {id} drawn {count} times"
            );
        }
    }

    #[test]
    fn same_seed_gives_same_draw() {
        let people = participants(&["a", "b", "c", "d", "e"]);
        let first = run_draw(&people, &mut ChaCha8Rng::seed_from_u64(11)).unwrap();
        let second = run_draw(&people, &mut ChaCha8Rng::seed_from_u64(11)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn store_conflict_maps_to_concurrent_draw_conflict() {
        assert_eq!(
            DrawError::from(StoreError::DrawAlreadySet),
            DrawError::ConcurrentDrawConflict
        );
        assert_eq!(
            DrawError::from(StoreError::ParticipantsChanged),
            DrawError::ConcurrentDrawConflict
        );
        assert_eq!(
            DrawError::from(StoreError::GroupNotFound),
            DrawError::GroupNotFound
        );
    }
}
