//! Transition state machine - per-geofence OUTSIDE / INSIDE / DWELL lifecycle
//!
//! Rules applied for each fix:
//! - inside and OUTSIDE: ENTER, status becomes INSIDE
//! - inside and INSIDE for at least the dwell time: DWELL_START, status becomes DWELL
//! - outside and INSIDE or DWELL: EXIT, status becomes OUTSIDE
//! - anything else only records the evaluation time
//!
//! ENTER and EXIT only commit after `debounce_fixes` consecutive agreeing
//! fixes, and no sooner than `status_change_delay_ms` after the opposite
//! transition. At most one transition is produced per geofence per fix.

use crate::domain::error::{GeofenceError, GeofenceResult};
use crate::domain::geofence::{GeofenceConfig, GeofenceState};
use crate::domain::types::{GeofenceStatus, LocationFix, TransitionKind};
use tracing::debug;

/// Debounce and rate limiting for ENTER / EXIT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPolicy {
    /// Consecutive agreeing fixes required to commit (1 = no debounce)
    pub debounce_fixes: u32,
    /// Minimum time between an ENTER and the following EXIT, or the reverse
    pub status_change_delay_ms: u64,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self { debounce_fixes: 1, status_change_delay_ms: 0 }
    }
}

/// Ordering guard for incoming fixes
///
/// A fix is stale when its timestamp is older than the last accepted fix, or
/// equal with a lower sequence number. Replaying the last accepted fix is
/// allowed; it produces no transitions because nothing changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixCursor {
    last: Option<(u64, u64)>,
}

impl FixCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with `StaleFix` if `fix` is older than the last accepted fix
    pub fn check(&self, fix: &LocationFix) -> GeofenceResult<()> {
        let Some((last_ts, last_seq)) = self.last else {
            return Ok(());
        };
        let stale = fix.timestamp_ms < last_ts
            || (fix.timestamp_ms == last_ts && fix.sequence < last_seq);
        if stale {
            return Err(GeofenceError::StaleFix {
                timestamp_ms: fix.timestamp_ms,
                sequence: fix.sequence,
                last_timestamp_ms: last_ts,
                last_sequence: last_seq,
            });
        }
        Ok(())
    }

    pub fn advance(&mut self, fix: &LocationFix) {
        self.last = Some((fix.timestamp_ms, fix.sequence));
    }

    /// Timestamp and sequence of the last accepted fix
    pub fn last(&self) -> Option<(u64, u64)> {
        self.last
    }
}

pub struct TransitionStateMachine {
    policy: TransitionPolicy,
}

impl TransitionStateMachine {
    pub fn new(policy: TransitionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &TransitionPolicy {
        &self.policy
    }

    /// Advance `state` with the raw containment of one fix
    ///
    /// Returns the committed transition, if any.
    pub fn step(
        &self,
        config: &GeofenceConfig,
        state: &mut GeofenceState,
        inside: bool,
        fix: &LocationFix,
    ) -> Option<TransitionKind> {
        let ts = fix.timestamp_ms;
        state.last_evaluated_ms = Some(ts);

        let desired = match (inside, state.status) {
            (true, GeofenceStatus::Outside) => Some(TransitionKind::Enter),
            (false, GeofenceStatus::Inside | GeofenceStatus::Dwell) => Some(TransitionKind::Exit),
            _ => None,
        };

        let Some(kind) = desired else {
            // Fix agrees with the current status
            state.clear_pending();
            return self.check_dwell(config, state, inside, ts);
        };

        if state.pending == Some(kind) {
            state.pending_count = state.pending_count.saturating_add(1);
        } else {
            state.pending = Some(kind);
            state.pending_count = 1;
        }

        if state.pending_count < self.policy.debounce_fixes.max(1) {
            debug!(
                geofence_id = %config.id,
                kind = %kind.as_str(),
                count = %state.pending_count,
                required = %self.policy.debounce_fixes,
                "transition_pending"
            );
            return None;
        }

        if !self.delay_elapsed(state, kind, ts) {
            debug!(
                geofence_id = %config.id,
                kind = %kind.as_str(),
                delay_ms = %self.policy.status_change_delay_ms,
                "transition_delayed"
            );
            return None;
        }

        commit(state, kind, ts);
        Some(kind)
    }

    fn check_dwell(
        &self,
        config: &GeofenceConfig,
        state: &mut GeofenceState,
        inside: bool,
        ts: u64,
    ) -> Option<TransitionKind> {
        if !inside || state.status != GeofenceStatus::Inside {
            return None;
        }
        let entered_at = state.entered_at_ms?;
        if ts.saturating_sub(entered_at) < config.dwell_ms() {
            return None;
        }
        commit(state, TransitionKind::DwellStart, ts);
        Some(TransitionKind::DwellStart)
    }

    fn delay_elapsed(&self, state: &GeofenceState, kind: TransitionKind, ts: u64) -> bool {
        let delay = self.policy.status_change_delay_ms;
        if delay == 0 {
            return true;
        }
        let reference = match kind {
            TransitionKind::Enter => state.last_transition_ms,
            TransitionKind::Exit => state.entered_at_ms,
            TransitionKind::DwellStart => None,
        };
        match reference {
            Some(at) => ts.saturating_sub(at) >= delay,
            None => true,
        }
    }
}

impl Default for TransitionStateMachine {
    fn default() -> Self {
        Self::new(TransitionPolicy::default())
    }
}

fn commit(state: &mut GeofenceState, kind: TransitionKind, ts: u64) {
    state.status = kind.target_status();
    state.last_transition_ms = Some(ts);
    match kind {
        TransitionKind::Enter => state.entered_at_ms = Some(ts),
        TransitionKind::Exit => state.entered_at_ms = None,
        TransitionKind::DwellStart => {}
    }
    state.clear_pending();
}
