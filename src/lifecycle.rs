//! Entity lifecycle: NEW → OPEN ⇄ NOT_FOUND → CLOSED
//!
//! Classification is a pure function of the stored state and what the latest
//! detail fetch said. CLOSED is absorbing, and so is NOT_FOUND once it has
//! been observed `not_found_threshold` times in a row. A NOT_FOUND below the
//! threshold is transient: an OPEN observation resets the streak.
//!
//! The refetch policy decides which entities are worth another detail fetch
//! on a given run date.

use crate::config::{AmbiguityPolicy, LifecycleConfig};
use crate::source::StatusHint;
use crate::types::{Entity, EntityStatus};
use chrono::{Days, NaiveDate};

/// The part of an entity the classifier looks at
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LifecycleState {
    /// Current status
    pub status: EntityStatus,
    /// Consecutive NOT_FOUND observations
    pub not_found_streak: u32,
}

impl LifecycleState {
    /// State of an entity that has never been fetched
    pub fn new_entity() -> Self {
        Self {
            status: EntityStatus::New,
            not_found_streak: 0,
        }
    }
}

impl From<&Entity> for LifecycleState {
    fn from(entity: &Entity) -> Self {
        Self {
            status: entity.status,
            not_found_streak: entity.not_found_streak,
        }
    }
}

/// Outcome of one classification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    /// Status before
    pub from: EntityStatus,
    /// Status after
    pub to: EntityStatus,
    /// Streak after
    pub not_found_streak: u32,
    /// The new state can no longer change
    pub terminal: bool,
}

impl Transition {
    /// State after the transition
    pub fn state(&self) -> LifecycleState {
        LifecycleState {
            status: self.to,
            not_found_streak: self.not_found_streak,
        }
    }
}

/// Applies the lifecycle rules and the refetch policy
#[derive(Clone, Debug)]
pub struct Classifier {
    not_found_threshold: u32,
    ambiguous_as: AmbiguityPolicy,
    refetch_horizon_days: u32,
    refetch_interval_days: u32,
}

impl Classifier {
    /// Build a classifier from configuration
    pub fn new(config: &LifecycleConfig) -> Self {
        Self {
            not_found_threshold: config.not_found_threshold.max(1),
            ambiguous_as: config.ambiguous_as,
            refetch_horizon_days: config.refetch_horizon_days,
            refetch_interval_days: config.refetch_interval_days.max(1),
        }
    }

    /// Consecutive NOT_FOUND observations that end tracking
    pub fn not_found_threshold(&self) -> u32 {
        self.not_found_threshold
    }

    /// True when `state` can no longer change
    pub fn is_terminal(&self, state: &LifecycleState) -> bool {
        match state.status {
            EntityStatus::Closed => true,
            EntityStatus::NotFound => state.not_found_streak >= self.not_found_threshold,
            EntityStatus::New | EntityStatus::Open => false,
        }
    }

    /// Classify a detail observation
    ///
    /// A fetch that exhausted its retries is passed in as
    /// [`StatusHint::NotFound`].
    pub fn classify(&self, state: &LifecycleState, hint: StatusHint) -> Transition {
        if self.is_terminal(state) {
            return Transition {
                from: state.status,
                to: state.status,
                not_found_streak: state.not_found_streak,
                terminal: true,
            };
        }

        let hint = match hint {
            StatusHint::Ambiguous => match self.ambiguous_as {
                AmbiguityPolicy::NotFound => StatusHint::NotFound,
                AmbiguityPolicy::Closed => StatusHint::Closed,
            },
            other => other,
        };

        let (to, not_found_streak) = match hint {
            StatusHint::Open => (EntityStatus::Open, 0),
            StatusHint::Closed => (EntityStatus::Closed, state.not_found_streak),
            // Ambiguous was resolved above
            StatusHint::NotFound | StatusHint::Ambiguous => (
                EntityStatus::NotFound,
                state.not_found_streak.saturating_add(1),
            ),
        };

        let next = LifecycleState {
            status: to,
            not_found_streak,
        };
        Transition {
            from: state.status,
            to,
            not_found_streak,
            terminal: self.is_terminal(&next),
        }
    }

    /// Earliest observation date still re-fetched on `run_date`
    pub fn refetch_since(&self, run_date: NaiveDate) -> NaiveDate {
        run_date
            .checked_sub_days(Days::new(u64::from(self.refetch_horizon_days)))
            .unwrap_or(NaiveDate::MIN)
    }

    /// Whether `entity` should be re-fetched on `run_date`
    ///
    /// Never-fetched entities always are. Classified ones are sampled: only
    /// when their age in days is a multiple of the refetch interval, and
    /// never once terminal or past the horizon.
    pub fn is_due(&self, entity: &Entity, run_date: NaiveDate) -> bool {
        if self.is_terminal(&LifecycleState::from(entity)) {
            return false;
        }
        if entity.key.observed_on < self.refetch_since(run_date) {
            return false;
        }
        if entity.status == EntityStatus::New {
            return true;
        }

        let age_days = (run_date - entity.key.observed_on).num_days();
        age_days >= 0 && age_days % i64::from(self.refetch_interval_days) == 0
    }
}
