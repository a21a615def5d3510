//! Single-window timeline: one gapless history run plus vagrant ids.
//!
//! Where [`crate::HistoryEngine`] supports many independent windows per
//! partition, `PeerTimeline` models the common simple case: one contiguous
//! run of positioned ids, and a side set of "vagrant" ids known to exist
//! (replied-to messages, pinned messages) whose position is not proven yet.

use std::collections::BTreeSet;

use crate::merge::{find_descending, is_strictly_descending, merge_descending};
use crate::MsgId;

/// Outcome of [`PeerTimeline::merge_range`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The range joined the gapless history run.
    Merged,
    /// The range did not touch the run; its ids were recorded as vagrants.
    Deferred,
}

/// Gapless known history for one peer, newest first, plus unpositioned ids.
#[derive(Debug, Default, Clone)]
pub struct PeerTimeline {
    history: Vec<MsgId>,
    vagrants: BTreeSet<MsgId>,
}

impl PeerTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The positioned run, strictly descending.
    pub fn history(&self) -> &[MsgId] {
        &self.history
    }

    /// Record an id known to exist but not yet positioned. Ids already
    /// covered by the history run are ignored.
    pub fn add_vagrant(&mut self, id: MsgId) {
        if self.covered(id) {
            return;
        }
        self.vagrants.insert(id);
    }

    /// Merge a strictly descending, gap-free range of ids.
    ///
    /// The range joins the history run when it overlaps or touches it (or
    /// the run is empty). A disconnected range is not positioned relative to
    /// the run, so its ids become vagrants instead. Merging promotes every
    /// vagrant whose position the grown run now proves.
    pub fn merge_range(&mut self, ids: &[MsgId]) -> MergeOutcome {
        if ids.is_empty() {
            return MergeOutcome::Merged;
        }
        if !is_strictly_descending(ids) {
            tracing::warn!("timeline range not strictly descending; deferring ids");
            for &id in ids {
                self.add_vagrant(id);
            }
            return MergeOutcome::Deferred;
        }
        if !self.history.is_empty() && !self.connects(ids[0], ids[ids.len() - 1]) {
            for &id in ids {
                self.add_vagrant(id);
            }
            return MergeOutcome::Deferred;
        }
        self.history = merge_descending(&self.history, ids);
        self.promote_vagrants();
        MergeOutcome::Merged
    }

    /// Forget an id everywhere (deleted message).
    pub fn remove_id(&mut self, id: MsgId) {
        if let Some(pos) = find_descending(&self.history, id) {
            self.history.remove(pos);
        }
        self.vagrants.remove(&id);
    }

    /// Whether `id` is positioned in the history run.
    pub fn contains(&self, id: MsgId) -> bool {
        find_descending(&self.history, id).is_some()
    }

    /// Whether `id` is known only as a vagrant.
    pub fn is_vagrant(&self, id: MsgId) -> bool {
        self.vagrants.contains(&id)
    }

    /// Every known id, positioned or not, strictly descending.
    pub fn known_ids(&self) -> Vec<MsgId> {
        let mut vagrants: Vec<MsgId> = self.vagrants.iter().rev().copied().collect();
        vagrants = merge_descending(&self.history, &vagrants);
        vagrants
    }

    fn covered(&self, id: MsgId) -> bool {
        match (self.history.first(), self.history.last()) {
            (Some(&head), Some(&tail)) => tail <= id && id <= head,
            _ => false,
        }
    }

    fn connects(&self, newest: MsgId, oldest: MsgId) -> bool {
        match (self.history.first(), self.history.last()) {
            (Some(&head), Some(&tail)) => {
                // Overlapping or adjacent: no representable id may sit in
                // between.
                oldest <= head.saturating_add(1) && newest >= tail.saturating_sub(1)
            }
            _ => true,
        }
    }

    fn promote_vagrants(&mut self) {
        loop {
            let (Some(&head), Some(&tail)) = (self.history.first(), self.history.last()) else {
                return;
            };
            // Covered vagrants are resolved: either already positioned or
            // provably deleted.
            let covered: Vec<MsgId> = self
                .vagrants
                .range(tail..=head)
                .copied()
                .collect();
            for id in covered {
                self.vagrants.remove(&id);
            }
            // An id touching the run's edge is positioned by adjacency.
            let above = head.saturating_add(1);
            let below = tail.saturating_sub(1);
            if self.vagrants.remove(&above) {
                self.history.insert(0, above);
            } else if self.vagrants.remove(&below) {
                self.history.push(below);
            } else {
                return;
            }
        }
    }
}
