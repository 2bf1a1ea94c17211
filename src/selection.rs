use crate::error::BpError;
use crate::event::Event;
use crate::program::BThreadSnapshot;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;

/// Where a selected event came from, needed by the arbiter to know whether
/// to pop the external queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Requested,
    External,
}

#[derive(Debug, Clone)]
pub struct Selected {
    pub event: Event,
    pub source: EventSource,
}

/// Computes, from the current b-threads and external queue, the set of
/// selectable events and picks one.
pub trait SelectionStrategy: Send + Sync {
    fn select(
        &self,
        bthreads: &[BThreadSnapshot],
        external_queue: &VecDeque<Event>,
    ) -> Result<Option<Selected>, BpError>;
}

/// Every event requested by a live b-thread, in `(registration_index,
/// position_in_request_list)` order, paired with whether it is blocked by
/// any live b-thread.
fn requested_in_order(bthreads: &[BThreadSnapshot]) -> Vec<(u64, Event)> {
    let mut ordered: Vec<(u64, Event)> = Vec::new();
    let mut indexed: Vec<&BThreadSnapshot> = bthreads.iter().collect();
    indexed.sort_by_key(|b| b.registration_index);
    for bt in indexed {
        if let Some(stmt) = &bt.current_statement {
            for e in &stmt.request {
                ordered.push((bt.registration_index, e.clone()));
            }
        }
    }
    ordered
}

fn is_blocked(e: &Event, bthreads: &[BThreadSnapshot]) -> Result<bool, BpError> {
    for bt in bthreads {
        if let Some(stmt) = &bt.current_statement {
            if stmt.block.contains(e)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Deterministic tie-break by `(registration_index, position_in_request_list)`;
/// external events are only considered once no internal request is
/// selectable.
pub struct PriorityStrategy;

impl SelectionStrategy for PriorityStrategy {
    fn select(
        &self,
        bthreads: &[BThreadSnapshot],
        external_queue: &VecDeque<Event>,
    ) -> Result<Option<Selected>, BpError> {
        for (_, e) in requested_in_order(bthreads) {
            if !is_blocked(&e, bthreads)? {
                return Ok(Some(Selected {
                    event: e,
                    source: EventSource::Requested,
                }));
            }
        }
        for e in external_queue {
            if !is_blocked(e, bthreads)? {
                return Ok(Some(Selected {
                    event: e.clone(),
                    source: EventSource::External,
                }));
            }
        }
        Ok(None)
    }
}

/// Picks uniformly among every selectable event (requested, unblocked
/// requests plus unblocked external events) via a seeded, deterministic
/// PRNG. Used by model-checking layers to branch over every choice; this
/// strategy only needs to expose a deterministic-given-seed pick, not the
/// branching search itself.
pub struct SeededRandomStrategy {
    rng: Mutex<ChaCha8Rng>,
}

impl SeededRandomStrategy {
    pub fn new(seed: u64) -> Self {
        SeededRandomStrategy {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    /// Every currently selectable event, in the same order `PriorityStrategy`
    /// would scan them — exposed so an external explorer can enumerate every
    /// branch rather than only the one this strategy happens to pick.
    pub fn selectable(
        bthreads: &[BThreadSnapshot],
        external_queue: &VecDeque<Event>,
    ) -> Result<Vec<Selected>, BpError> {
        let mut out = Vec::new();
        for (_, e) in requested_in_order(bthreads) {
            if !is_blocked(&e, bthreads)? {
                out.push(Selected {
                    event: e,
                    source: EventSource::Requested,
                });
            }
        }
        for e in external_queue {
            if !is_blocked(e, bthreads)? {
                out.push(Selected {
                    event: e.clone(),
                    source: EventSource::External,
                });
            }
        }
        Ok(out)
    }
}

impl SelectionStrategy for SeededRandomStrategy {
    fn select(
        &self,
        bthreads: &[BThreadSnapshot],
        external_queue: &VecDeque<Event>,
    ) -> Result<Option<Selected>, BpError> {
        let options = Self::selectable(bthreads, external_queue)?;
        if options.is_empty() {
            return Ok(None);
        }
        let mut rng = self.rng.lock();
        Ok(options.choose(&mut *rng).cloned())
    }
}
