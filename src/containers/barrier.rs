//! Leaderless round barrier.

use super::{validate_ring, Binding, Container};
use crate::error::KbResult;
use crate::knowledge::{KnowledgeBase, UpdateSettings, Variables};

/// Each participant publishes its round at `name.{id}`; the barrier is done
/// for us once every slot has reached our round.
///
/// Polling only: [`Barrier::is_done`] never blocks.
#[derive(Debug, Clone)]
pub struct Barrier {
    binding: Binding,
    id: usize,
    participants: usize,
}

impl Barrier {
    /// Bind to `name` as participant `id` of `participants`, publishing round
    /// 0 for our slot if it has no value yet.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad name or ring identity.
    pub fn new(kb: &KnowledgeBase, name: &str, id: usize, participants: usize) -> KbResult<Self> {
        validate_ring(id, participants)?;
        let barrier = Self {
            binding: Binding::bind(kb, name, UpdateSettings::default())?,
            id,
            participants,
        };
        barrier.init_slot()?;
        Ok(barrier)
    }

    fn init_slot(&self) -> KbResult<()> {
        self.binding.access(|vars| {
            let key = self.binding.key(self.id);
            if !vars.exists(&key) {
                vars.set_with(&key, 0, self.binding.settings())?;
            }
            Ok(())
        })
    }

    /// Rebind to another store or base key.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad name.
    pub fn set_name(&mut self, kb: &KnowledgeBase, name: &str) -> KbResult<()> {
        self.binding = Binding::bind(kb, name, *self.binding.settings())?;
        self.init_slot()
    }

    /// Write policy for round updates.
    pub fn set_settings(&mut self, settings: UpdateSettings) {
        self.binding.set_settings(settings);
    }

    /// This participant's id.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Number of participants.
    #[must_use]
    pub const fn participants(&self) -> usize {
        self.participants
    }

    /// Change identity or group size.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `id` is not below `participants`.
    pub fn resize(&mut self, id: usize, participants: usize) -> KbResult<()> {
        validate_ring(id, participants)?;
        self.id = id;
        self.participants = participants;
        self.init_slot()
    }

    /// Advance our round by one and return it.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the barrier has no live store.
    pub fn next(&self) -> KbResult<i64> {
        self.binding
            .access(|vars| vars.inc(&self.binding.key(self.id), 1, self.binding.settings()))
    }

    /// Our current round.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the barrier has no live store.
    pub fn get(&self) -> KbResult<i64> {
        self.binding
            .access(|vars| Ok(vars.get(&self.binding.key(self.id)).to_integer()))
    }

    fn done(&self, vars: &Variables<'_>) -> bool {
        let round = vars.get(&self.binding.key(self.id)).to_integer();
        (0..self.participants).all(|i| {
            let slot = vars.get(&self.binding.key(i));
            slot.exists() && slot.to_integer() >= round
        })
    }

    /// True once every participant has reached our round. Participants we
    /// have not heard from count as not there yet.
    ///
    /// # Errors
    ///
    /// Returns an execution error if the barrier has no live store.
    pub fn is_done(&self) -> KbResult<bool> {
        self.binding.access(|vars| Ok(self.done(vars)))
    }
}

impl Container for Barrier {
    fn name(&self) -> &str {
        self.binding.name()
    }

    fn modify(&self) -> KbResult<()> {
        self.binding.access(|vars| {
            vars.mark_modified(&self.binding.key(self.id));
            Ok(())
        })
    }

    fn is_true(&self) -> KbResult<bool> {
        self.is_done()
    }

    fn debug_info(&self) -> KbResult<String> {
        self.binding.access(|vars| {
            let rounds: Vec<String> = (0..self.participants)
                .map(|i| {
                    let slot = vars.get(&self.binding.key(i));
                    if slot.exists() {
                        slot.to_integer().to_string()
                    } else {
                        "-".to_string()
                    }
                })
                .collect();
            Ok(format!(
                "Barrier {} [id {} of {}]: rounds [{}] done {}",
                self.binding.name(),
                self.id,
                self.participants,
                rounds.join(", "),
                self.done(vars)
            ))
        })
    }

    fn ensure_bound(&self) -> KbResult<()> {
        self.binding.store().map(|_| ())
    }
}
