//! Optimistic overlay for one `(entity, actor)` pair.
//!
//! ```text
//!            begin()                 succeed()
//! Settled(v) ───────► InFlight{v, !v} ────────► Settled(!v ⊕ buffered)
//!     ▲                    │  observe() → buffered
//!     │      fail()        │
//!     └────────────────────┘  Settled(v ⊕ buffered)
//! ```
//!
//! While in flight the visible view is the target; snapshots are merged
//! into `buffered` and only applied once the mutation settles. Patches that
//! already reflect the write are also merged into `confirmed`, which is
//! what a successful settle applies.

use serde::{Deserialize, Serialize};

/// What the UI renders for one entity: the actor's toggle state and the
/// public counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityView {
    pub on: bool,
    pub count: i64,
}

impl EntityView {
    pub fn new(on: bool, count: i64) -> Self {
        Self { on, count }
    }

    /// Flip `on` and move the counter with it. The counter never drops
    /// below zero even if the last known count was already stale.
    pub fn toggled(self) -> Self {
        if self.on {
            Self {
                on: false,
                count: (self.count - 1).max(0),
            }
        } else {
            Self {
                on: true,
                count: self.count + 1,
            }
        }
    }

    pub fn patched(self, patch: &ViewPatch) -> Self {
        Self {
            on: patch.on.unwrap_or(self.on),
            count: patch.count.unwrap_or(self.count),
        }
    }
}

/// Partial view read from a snapshot. Some snapshots only carry one half,
/// e.g. a follower counter without the relationship record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewPatch {
    pub on: Option<bool>,
    pub count: Option<i64>,
}

impl ViewPatch {
    pub fn full(view: EntityView) -> Self {
        Self {
            on: Some(view.on),
            count: Some(view.count),
        }
    }

    pub fn on(on: bool) -> Self {
        Self {
            on: Some(on),
            count: None,
        }
    }

    pub fn count(count: i64) -> Self {
        Self {
            on: None,
            count: Some(count),
        }
    }

    /// Whether this patch can only have been read after the write moved
    /// `original` to `target`. An `on` that disagrees with the target, or
    /// a bare counter still at the pre-toggle value, predates the write.
    fn confirms(&self, original: EntityView, target: EntityView) -> bool {
        match (self.on, self.count) {
            (Some(on), _) => on == target.on,
            (None, Some(count)) => count != original.count || original.count == target.count,
            (None, None) => false,
        }
    }

    /// Combine with a newer patch; the newer one wins field by field.
    pub fn merge(self, newer: ViewPatch) -> Self {
        Self {
            on: newer.on.or(self.on),
            count: newer.count.or(self.count),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.on.is_none() && self.count.is_none()
    }
}

/// Result of feeding a snapshot into an overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotEffect {
    /// Applied immediately; carries the new visible view.
    Applied(EntityView),
    /// Held until the in-flight mutation settles.
    Buffered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayState {
    Settled(EntityView),
    InFlight {
        original: EntityView,
        target: EntityView,
        /// Everything observed during flight; applied on failure.
        buffered: Option<ViewPatch>,
        /// Observed patches that postdate the write; applied on success.
        confirmed: Option<ViewPatch>,
    },
}

fn merge_into(slot: &mut Option<ViewPatch>, patch: ViewPatch) {
    *slot = Some(match slot.take() {
        Some(older) => older.merge(patch),
        None => patch,
    });
}

impl OverlayState {
    /// What the UI should show right now.
    pub fn visible(&self) -> EntityView {
        match self {
            OverlayState::Settled(view) => *view,
            OverlayState::InFlight { target, .. } => *target,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, OverlayState::InFlight { .. })
    }

    /// Start a toggle from the caller's `current_on`. Returns
    /// `(original, target)`, or `None` when a toggle is already in flight.
    pub fn begin(&mut self, current_on: bool) -> Option<(EntityView, EntityView)> {
        match self {
            OverlayState::InFlight { .. } => None,
            OverlayState::Settled(view) => {
                let original = EntityView::new(current_on, view.count);
                let target = original.toggled();
                *self = OverlayState::InFlight {
                    original,
                    target,
                    buffered: None,
                    confirmed: None,
                };
                Some((original, target))
            }
        }
    }

    /// Feed a snapshot patch.
    pub fn observe(&mut self, patch: ViewPatch) -> SnapshotEffect {
        match self {
            OverlayState::Settled(view) => {
                *view = view.patched(&patch);
                SnapshotEffect::Applied(*view)
            }
            OverlayState::InFlight {
                original,
                target,
                buffered,
                confirmed,
            } => {
                if patch.confirms(*original, *target) {
                    merge_into(confirmed, patch);
                }
                merge_into(buffered, patch);
                SnapshotEffect::Buffered
            }
        }
    }

    /// The remote write was acknowledged. Only patches that postdate the
    /// write are applied; stale ones are dropped and the store will deliver
    /// a confirming snapshot.
    pub fn succeed(&mut self) -> EntityView {
        if let OverlayState::InFlight {
            target,
            buffered,
            confirmed,
            ..
        } = self
        {
            if buffered != confirmed {
                log::debug!("Dropping stale snapshot buffered during flight");
            }
            let settled = match confirmed {
                Some(patch) => target.patched(patch),
                None => *target,
            };
            *self = OverlayState::Settled(settled);
        }
        self.visible()
    }

    /// The remote write failed: restore the pre-toggle view, then apply
    /// whatever the store reported meanwhile.
    pub fn fail(&mut self) -> EntityView {
        if let OverlayState::InFlight { original, buffered, .. } = self {
            let settled = match buffered {
                Some(patch) => original.patched(patch),
                None => *original,
            };
            *self = OverlayState::Settled(settled);
        }
        self.visible()
    }
}
