// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Upstream → invalidation instruction edges for memoized resolver values.
use rustc_hash::{FxHashMap, FxHashSet};

use crate::ident::DataId;

/// What to do when an upstream record changes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// Remove the link `record.field` to a memo.
    Unlink {
        /// Record owning the resolver field.
        record: DataId,
        /// Storage key of the resolver field.
        field: String,
    },
    /// Delete the memo `record`; its own dependents follow transitively.
    Delete {
        /// Memo id.
        record: DataId,
    },
}

/// Edges registered per memo (the owner), keyed by upstream record.
///
/// Owners rebuild their edges on every recomputation: [`Self::remove_owner`]
/// tears down everything an owner registered before it registers again.
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    edges: FxHashMap<DataId, FxHashSet<(DataId, Instruction)>>,
    owners: FxHashMap<DataId, Vec<(DataId, Instruction)>>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that a change of `upstream` triggers `instruction` on behalf
    /// of `owner`.
    pub fn register(&mut self, owner: &DataId, upstream: DataId, instruction: Instruction) {
        let inserted = self
            .edges
            .entry(upstream.clone())
            .or_default()
            .insert((owner.clone(), instruction.clone()));
        if inserted {
            self.owners
                .entry(owner.clone())
                .or_default()
                .push((upstream, instruction));
        }
    }

    /// Drops every edge `owner` registered.
    pub fn remove_owner(&mut self, owner: &DataId) {
        let Some(registered) = self.owners.remove(owner) else {
            return;
        };
        for (upstream, instruction) in registered {
            if let Some(set) = self.edges.get_mut(&upstream) {
                set.remove(&(owner.clone(), instruction));
                if set.is_empty() {
                    self.edges.remove(&upstream);
                }
            }
        }
    }

    /// Instructions triggered by `updated`, following `Delete` edges
    /// transitively. Each instruction appears once, in discovery order.
    pub fn get_instructions_for_updated_ids<'i>(
        &self,
        updated: impl IntoIterator<Item = &'i DataId>,
    ) -> Vec<Instruction> {
        let mut worklist: Vec<DataId> = updated.into_iter().cloned().collect();
        let mut visited: FxHashSet<DataId> = FxHashSet::default();
        let mut seen: FxHashSet<Instruction> = FxHashSet::default();
        let mut instructions = Vec::new();
        while let Some(upstream) = worklist.pop() {
            if !visited.insert(upstream.clone()) {
                continue;
            }
            let Some(set) = self.edges.get(&upstream) else {
                continue;
            };
            let mut batch: Vec<&Instruction> = set.iter().map(|(_, i)| i).collect();
            batch.sort_by(|a, b| instruction_sort_key(a).cmp(&instruction_sort_key(b)));
            for instruction in batch {
                if !seen.insert(instruction.clone()) {
                    continue;
                }
                if let Instruction::Delete { record } = instruction {
                    worklist.push(record.clone());
                }
                instructions.push(instruction.clone());
            }
        }
        instructions
    }

    /// Returns `true` when no edges are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Number of upstream records with at least one edge.
    #[must_use]
    pub fn upstream_count(&self) -> usize {
        self.edges.len()
    }
}

fn instruction_sort_key(instruction: &Instruction) -> (u8, &str, &str) {
    match instruction {
        Instruction::Unlink { record, field } => (0, record.as_str(), field.as_str()),
        Instruction::Delete { record } => (1, record.as_str(), ""),
    }
}
