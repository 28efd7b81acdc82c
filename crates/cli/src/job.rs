//! One run's state between the preview and the final export.

use std::fmt;

use serde::{Deserialize, Serialize};
use sumrec_core::{SheetSet, Table};
use sumrec_recon::{Constants, EnrichSummary};

use crate::error::PipelineError;
use crate::store::Handle;

/// `Created → Previewed → Finalized`, with `Expired` reachable from either
/// of the first two. Nothing moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Previewed,
    Finalized,
    Expired,
}

impl JobState {
    pub fn can_advance_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Created, Previewed) | (Previewed, Finalized) | (Created, Expired) | (Previewed, Expired)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Created => write!(f, "created"),
            JobState::Previewed => write!(f, "previewed"),
            JobState::Finalized => write!(f, "finalized"),
            JobState::Expired => write!(f, "expired"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    state: JobState,
    pub constants: Constants,
    /// Cleaned usersetting (four canonical columns).
    pub roster: Table,
    /// Every Summary sheet as read, in source order.
    pub sheets: SheetSet,
    pub first_sheet: String,
    /// First sheet after stages 1-5 and 7; remarks not yet edited.
    pub enriched: Table,
    pub summary: EnrichSummary,
    pub roster_download: Handle,
}

impl Job {
    pub fn new(
        constants: Constants,
        roster: Table,
        sheets: SheetSet,
        first_sheet: String,
        enriched: Table,
        summary: EnrichSummary,
        roster_download: Handle,
    ) -> Self {
        Self {
            state: JobState::Created,
            constants,
            roster,
            sheets,
            first_sheet,
            enriched,
            summary,
            roster_download,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Fail unless `next` is a legal move from the current state.
    pub fn check(&self, next: JobState) -> Result<(), PipelineError> {
        if self.state.can_advance_to(next) {
            Ok(())
        } else {
            Err(PipelineError::InvalidTransition { from: self.state, to: next })
        }
    }

    pub fn advance(&mut self, next: JobState) -> Result<(), PipelineError> {
        self.check(next)?;
        log::debug!("job {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }
}
