// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::models::{AppointmentError, AppointmentStatus};

/// What a validated status change must do besides writing the new status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPlan {
    pub from: AppointmentStatus,
    pub to: AppointmentStatus,
    pub release_slot: bool,
    pub upsert_client: bool,
    /// Totals accumulate only when an appointment is finished.
    pub accumulate_totals: bool,
    pub notify_client: bool,
}

pub struct AppointmentLifecycleService;

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> &'static [AppointmentStatus] {
        use AppointmentStatus::*;

        match current_status {
            Scheduled => &[Confirmed, Canceled, Problem],
            Confirmed => &[Finished, Canceled, Problem],
            Problem => &[Confirmed, Finished, Canceled],
            // Terminal states
            Finished | Canceled => &[],
        }
    }

    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidStatusTransition {
                from: current_status,
                to: new_status,
            });
        }
        Ok(())
    }

    /// `None` when the appointment already has `new_status`.
    pub fn plan(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<Option<TransitionPlan>, AppointmentError> {
        if current_status == new_status {
            debug!("Status {} reapplied, nothing to do", new_status);
            return Ok(None);
        }
        self.validate_status_transition(current_status, new_status)?;

        Ok(Some(TransitionPlan {
            from: current_status,
            to: new_status,
            release_slot: current_status.occupies_slot() && !new_status.occupies_slot(),
            upsert_client: matches!(new_status, AppointmentStatus::Confirmed | AppointmentStatus::Finished),
            accumulate_totals: new_status == AppointmentStatus::Finished,
            notify_client: matches!(new_status, AppointmentStatus::Confirmed | AppointmentStatus::Canceled),
        }))
    }
}
