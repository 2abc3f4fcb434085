//! Learner role
//!
//! Tracks the highest accepted ballot this instance has heard of. The
//! holder is whoever that ballot names.

use baton_core::{Ballot, InstanceId};

/// What an incoming accepted ballot did to the learner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Learned {
    /// Lower than what we already know; ignored
    Stale,
    /// The ballot we already hold, heard again
    Repeat,
    /// A newer ballot, with the holder it replaced
    New { previous_holder: Option<InstanceId> },
}

#[derive(Debug, Clone, Default)]
pub struct Learner {
    latest: Option<Ballot>,
}

impl Learner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<&Ballot> {
        self.latest.as_ref()
    }

    pub fn holder(&self) -> Option<&InstanceId> {
        self.latest.as_ref().and_then(|b| b.winner.as_ref())
    }

    pub fn is_holder(&self, id: &InstanceId) -> bool {
        self.holder() == Some(id)
    }

    /// Adopt a ballot unless it is strictly lower than the current one
    pub fn learn(&mut self, ballot: &Ballot) -> Learned {
        match &self.latest {
            Some(latest) if ballot.id < latest.id => Learned::Stale,
            Some(latest) if ballot.id == latest.id => Learned::Repeat,
            _ => {
                let previous_holder = self.holder().cloned();
                self.latest = Some(ballot.clone());
                Learned::New { previous_holder }
            }
        }
    }

    /// Forget a holder the oracle reported gone
    pub fn forget_holder(&mut self) {
        if let Some(latest) = &mut self.latest {
            latest.winner = None;
        }
    }
}
