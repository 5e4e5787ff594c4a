//! Correlation of completion events with the awaitables that scheduled them.
//!
//! Explicit task ids are authoritative. A completion that names an id nobody has
//! asked for yet is buffered until the matching call opens it; a completion for
//! an id that is already closed is a duplicate and dropped. Completions without
//! an id fall back to positional matching against the smallest open id of the
//! same kind, or wait in a FIFO for the next call of that kind.

use crate::futures::{Resolution, Slot};
use crate::history::{TaskId, TaskKind};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

#[derive(Debug)]
struct OpenTask {
    kind: TaskKind,
    slot: Slot,
}

/// What happened to a delivered completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Resolved(TaskId),
    Buffered,
    Orphaned,
    Duplicate,
    KindMismatch { expected: TaskKind, actual: TaskKind },
}

#[derive(Debug, Default)]
pub(crate) struct CorrelationTable {
    open: BTreeMap<TaskId, OpenTask>,
    closed: HashSet<TaskId>,
    buffered: HashMap<TaskId, (TaskKind, Resolution)>,
    orphans: HashMap<TaskKind, VecDeque<Resolution>>,
    /// Creation-event id -> task id, for child workflows whose completions
    /// reference the creation event instead of the task id.
    aliases: HashMap<TaskId, TaskId>,
}

impl CorrelationTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Create the awaitable for `id`, resolving it right away when a matching
    /// completion already arrived.
    pub(crate) fn open(&mut self, id: TaskId, kind: TaskKind, alias: Option<TaskId>) -> Slot {
        let slot = Slot::new();
        if let Some(alias) = alias {
            self.aliases.insert(alias, id);
        }

        let early = self
            .take_buffered(id, kind)
            .or_else(|| alias.and_then(|a| self.take_buffered(a, kind)))
            .or_else(|| self.orphans.get_mut(&kind).and_then(VecDeque::pop_front));

        match early {
            Some(resolution) => {
                slot.resolve(resolution);
                self.closed.insert(id);
            }
            None => {
                self.open.insert(
                    id,
                    OpenTask {
                        kind,
                        slot: slot.clone(),
                    },
                );
            }
        }
        slot
    }

    pub(crate) fn deliver(&mut self, kind: TaskKind, task_id: Option<TaskId>, resolution: Resolution) -> Delivery {
        let Some(id) = task_id else {
            return self.deliver_positional(kind, resolution);
        };

        let id = if self.is_known(id) {
            id
        } else {
            self.aliases.get(&id).copied().unwrap_or(id)
        };

        if self.closed.contains(&id) {
            return Delivery::Duplicate;
        }
        if let Some(task) = self.open.get(&id) {
            if task.kind != kind {
                return Delivery::KindMismatch {
                    expected: task.kind,
                    actual: kind,
                };
            }
            self.close(id, resolution);
            return Delivery::Resolved(id);
        }
        if self.buffered.contains_key(&id) {
            return Delivery::Duplicate;
        }
        self.buffered.insert(id, (kind, resolution));
        Delivery::Buffered
    }

    /// Resolve an open task as canceled. Returns false if it already resolved.
    pub(crate) fn cancel(&mut self, id: TaskId, resolution: Resolution) -> bool {
        if !self.open.contains_key(&id) {
            return false;
        }
        self.close(id, resolution);
        true
    }

    /// Link a creation-event id to an already opened task.
    pub(crate) fn link_alias(&mut self, alias: TaskId, id: TaskId) {
        if alias == id {
            return;
        }
        self.aliases.insert(alias, id);
        let Some(kind) = self.open.get(&id).map(|t| t.kind) else {
            return;
        };
        if let Some(resolution) = self.take_buffered(alias, kind) {
            self.close(id, resolution);
        }
    }

    pub(crate) fn is_open(&self, id: TaskId) -> bool {
        self.open.contains_key(&id)
    }

    fn is_known(&self, id: TaskId) -> bool {
        self.open.contains_key(&id) || self.closed.contains(&id)
    }

    fn deliver_positional(&mut self, kind: TaskKind, resolution: Resolution) -> Delivery {
        let target = self
            .open
            .iter()
            .find(|(_, task)| task.kind == kind)
            .map(|(id, _)| *id);
        match target {
            Some(id) => {
                self.close(id, resolution);
                Delivery::Resolved(id)
            }
            None => {
                self.orphans.entry(kind).or_default().push_back(resolution);
                Delivery::Orphaned
            }
        }
    }

    fn take_buffered(&mut self, id: TaskId, kind: TaskKind) -> Option<Resolution> {
        match self.buffered.get(&id) {
            Some((buffered_kind, _)) if *buffered_kind == kind => self.buffered.remove(&id).map(|(_, r)| r),
            _ => None,
        }
    }

    fn close(&mut self, id: TaskId, resolution: Resolution) {
        if let Some(task) = self.open.remove(&id) {
            task.slot.resolve(resolution);
        }
        self.closed.insert(id);
    }
}
