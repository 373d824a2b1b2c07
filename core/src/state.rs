//! Presentation state holder.
//!
//! A `watch` channel carrying the snapshot the rendering layer paints from.
//! Reads are snapshots; every write goes through the sequence player and is
//! tagged with the epoch of the traversal performing it, so a traversal that
//! was superseded by `reset()` can no longer touch the state.

use crate::script::VisualState;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Done,
}

/// Snapshot of everything a renderer needs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PresentationState {
    pub status: RunStatus,
    pub current_line: String,
    pub visual: VisualState,
    pub show_photo: bool,
    /// 1-based index of the step being played; 0 before the first step.
    pub step_index: usize,
    pub total_steps: usize,
    /// Percentage in 0..=100, derived from `step_index / total_steps`.
    pub progress: u8,
}

impl PresentationState {
    fn recompute_progress(&mut self) {
        self.progress = progress_for(self.step_index, self.total_steps, self.status);
    }
}

/// `min(100, round(100 * step_index / total))`. An empty script reports 100
/// once done and 0 otherwise.
pub fn progress_for(step_index: usize, total: usize, status: RunStatus) -> u8 {
    if total == 0 {
        return if status == RunStatus::Done { 100 } else { 0 };
    }
    let pct = (100.0 * step_index as f64 / total as f64).round();
    pct.min(100.0) as u8
}

pub struct StateHolder {
    tx: watch::Sender<PresentationState>,
    epoch: AtomicU64,
}

impl StateHolder {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PresentationState::default());
        Self {
            tx,
            epoch: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> PresentationState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PresentationState> {
        self.tx.subscribe()
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Enter `Running` unless a traversal is already running. Returns the
    /// epoch of the new traversal.
    pub(crate) fn try_begin(&self, initial: VisualState, total_steps: usize) -> Option<u64> {
        let mut started = None;
        self.tx.send_if_modified(|s| {
            if s.status == RunStatus::Running {
                return false;
            }
            let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            *s = PresentationState {
                status: RunStatus::Running,
                current_line: String::new(),
                visual: initial,
                show_photo: false,
                step_index: 0,
                total_steps,
                progress: 0,
            };
            s.recompute_progress();
            started = Some(epoch);
            true
        });
        started
    }

    /// Apply `f` if `epoch` is still the live traversal. Returns whether the
    /// write happened.
    pub(crate) fn update(&self, epoch: u64, f: impl FnOnce(&mut PresentationState)) -> bool {
        self.tx.send_if_modified(|s| {
            if !self.is_current(epoch) {
                return false;
            }
            f(s);
            s.recompute_progress();
            true
        })
    }

    pub(crate) fn finish(&self, epoch: u64) -> bool {
        self.update(epoch, |s| s.status = RunStatus::Done)
    }

    /// Back to idle; any traversal in flight becomes stale.
    pub(crate) fn reset(&self) {
        self.tx.send_modify(|s| {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            *s = PresentationState {
                total_steps: s.total_steps,
                ..PresentationState::default()
            };
            s.recompute_progress();
        });
    }
}

impl Default for StateHolder {
    fn default() -> Self {
        Self::new()
    }
}
