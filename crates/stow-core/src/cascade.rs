//! # Cascade Cleanup
//!
//! After a write scope that deleted records, dependents declared by the
//! deleted types are swept: every instance with no remaining inbound
//! reference is removed, and the sweep continues through the dependents'
//! own declarations.
//!
//! ## Ordering
//!
//! The types to sweep are the ones reachable from the deleted types over
//! `dependents` edges, discovered breadth-first. They are swept in
//! topological order over that subgraph so a type is visited after every
//! type that may orphan it. Cycles are broken by taking the earliest
//! discovered remaining type. Each type is swept at most once per pass.

use crate::schema::{Schema, SweepPolicy};
use crate::storage::RecordStore;
use crate::StowError;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Types swept, in sweep order.
    pub swept: Vec<String>,
    /// Number of orphans removed per type.
    pub removed: BTreeMap<String, usize>,
}

impl CleanupReport {
    /// Total number of records removed by the pass.
    #[must_use]
    pub fn total(&self) -> usize {
        self.removed.values().sum()
    }
}

fn dependents<'s>(schema: &'s Schema, name: &str) -> Vec<&'s str> {
    schema
        .get(name)
        .map(|t| t.dependents.iter().map(String::as_str).collect())
        .unwrap_or_default()
}

/// The cascade cleanup engine.
pub struct Cascade;

impl Cascade {
    /// Sweep order for a set of deleted types.
    ///
    /// Discovery is breadth-first, but the returned order is not the plain
    /// breadth-first visit order: types are sorted topologically over the
    /// discovered subgraph, so a dependent reachable from several owners
    /// comes after all of them even when one owner is discovered later.
    /// Among types whose owners are all swept, discovery order decides.
    ///
    /// Unknown type names are ignored.
    #[must_use]
    pub fn plan(schema: &Schema, deleted: &BTreeSet<String>) -> Vec<String> {
        let dependents_of = |name: &str| dependents(schema, name);

        // Breadth-first discovery of every type reachable over one or more edges.
        let mut discovered: Vec<&str> = Vec::new();
        let mut queue: VecDeque<&str> = deleted.iter().map(String::as_str).collect();
        while let Some(current) = queue.pop_front() {
            for dependent in dependents_of(current) {
                if !discovered.contains(&dependent) {
                    discovered.push(dependent);
                    queue.push_back(dependent);
                }
            }
        }

        let mut in_degree: BTreeMap<&str, usize> = discovered.iter().map(|t| (*t, 0)).collect();
        for from in discovered.iter().copied() {
            for to in dependents_of(from) {
                if let Some(degree) = in_degree.get_mut(to) {
                    *degree += 1;
                }
            }
        }

        let mut order = Vec::with_capacity(discovered.len());
        let mut remaining = discovered;
        while !remaining.is_empty() {
            let position = remaining
                .iter()
                .position(|t| in_degree.get(t).copied().unwrap_or(0) == 0)
                .unwrap_or(0);
            let next = remaining.remove(position);
            for to in dependents_of(next) {
                if remaining.contains(&to) {
                    if let Some(degree) = in_degree.get_mut(to) {
                        *degree = degree.saturating_sub(1);
                    }
                }
            }
            order.push(next.to_string());
        }
        order
    }

    /// Sweep orphans of every type in the plan for `deleted`.
    ///
    /// Must run inside an open write transaction; the caller commits or
    /// rolls back the whole pass.
    pub fn sweep<S>(
        store: &mut S,
        schema: &Schema,
        deleted: &BTreeSet<String>,
    ) -> Result<CleanupReport, StowError>
    where
        S: RecordStore + ?Sized,
    {
        if !store.in_transaction() {
            return Err(StowError::NotInTransaction);
        }

        let mut report = CleanupReport::default();
        for name in Self::plan(schema, deleted) {
            let record_type = schema.get(&name)?;
            let via = match &record_type.sweep {
                SweepPolicy::AnyInbound => None,
                SweepPolicy::Inbound(refs) => Some(refs.as_slice()),
            };
            let referenced = store.referenced_ids(via)?;
            let orphans: BTreeSet<_> = store
                .ids_of_type(&name)?
                .into_iter()
                .filter(|id| !referenced.contains(id))
                .collect();

            if !orphans.is_empty() {
                let removed = store.remove_all(&orphans)?.len();
                tracing::info!(record_type = %name, removed, "removed orphaned records");
                report.removed.insert(name.clone(), removed);
            }
            report.swept.push(name);
        }
        Ok(report)
    }
}

// =============================================================================
// TESTS
// =============================================================================
