//! Table directive planner
//!
//! Merges a table's fixed default projection/sort with the caller's directive
//! set into one concrete [`ReadPlan`], then executes it as a single bounded
//! read against a [`TableBackend`].
//!
//! The merge contract: explicit columns are additive and land after the
//! defaults; an explicit sort fully replaces the default sort; `take` of 0
//! or absent means 50 and all other values clamp to [-50, 50], with negative
//! values reading backward from the current position.

use std::sync::Arc;

use crate::backend::{RawRow, TableBackend};
use crate::store::Store;
use crate::types::directives::TableDirectiveSet;
use crate::types::error::{check, GraphMailError, Result};
use crate::types::property::{PropId, ResolvedPropId};
use crate::types::{EntryId, PropTag};

/// Default and maximum number of rows read in one batch.
pub const DEFAULT_TAKE: i32 = 50;

/// One concrete sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub tag: PropTag,
    pub descending: bool,
}

/// Where the read positions itself before applying the offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeekPlan {
    Beginning,
    End,
    /// Position at the row whose entry id matches the cursor.
    Find(EntryId),
}

/// A fully merged, bounded, ordered read of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadPlan {
    pub columns: Vec<PropTag>,
    pub sort: Vec<SortKey>,
    pub seek: SeekPlan,
    pub offset: i32,
    /// Clamped row count; negative reads backward.
    pub take: i32,
}

/// Planner for one directive set, optionally bound to a store context for
/// named-property resolution.
pub struct TableDirectives {
    store: Option<Arc<Store>>,
    directives: TableDirectiveSet,
}

impl TableDirectives {
    pub fn new(store: Option<Arc<Store>>, directives: &TableDirectiveSet) -> Result<Self> {
        // When both explicit columns and an explicit sort are present,
        // resolve all of their named properties in a single batched call up
        // front; the per-list resolutions below then hit the cache.
        if let (Some(store), Some(columns), Some(order_by)) =
            (&store, &directives.columns, &directives.order_by)
        {
            if !columns.is_empty() && !order_by.is_empty() {
                let mut inputs: Vec<PropId> = Vec::with_capacity(columns.len() + order_by.len());
                inputs.extend(columns.iter().map(|column| column.property.clone()));
                inputs.extend(order_by.iter().map(|order| order.property.clone()));
                store.resolve_prop_inputs(&inputs)?;
            }
        }

        Ok(Self {
            store,
            directives: directives.clone(),
        })
    }

    /// Merge the directives with the table's defaults into a concrete plan.
    pub fn plan(&self, default_columns: &[PropTag], default_sort: &[SortKey]) -> Result<ReadPlan> {
        Ok(ReadPlan {
            columns: self.columns(default_columns)?,
            sort: self.order_by(default_sort)?,
            seek: self.seek(),
            offset: self.offset(),
            take: self.take(),
        })
    }

    /// Plan and execute in one step.
    pub fn read(
        &self,
        table: &dyn TableBackend,
        default_columns: &[PropTag],
        default_sort: &[SortKey],
    ) -> Result<Vec<RawRow>> {
        let plan = self.plan(default_columns, default_sort)?;
        table.read_rows(&plan)
    }

    fn columns(&self, default_columns: &[PropTag]) -> Result<Vec<PropTag>> {
        let mut merged: Vec<PropTag> = default_columns.to_vec();

        if let Some(columns) = &self.directives.columns {
            if !columns.is_empty() {
                let inputs: Vec<PropId> =
                    columns.iter().map(|column| column.property.clone()).collect();
                let resolved = self.resolve(&inputs)?;

                check(resolved.len() == columns.len(), "column resolution count mismatch")?;
                for (column, resolved) in columns.iter().zip(resolved) {
                    // An unresolvable named column projects as id 0 and comes
                    // back from the store as an error cell, which the
                    // materializer drops.
                    let prop_id = resolved.map(|entry| entry.prop_id()).unwrap_or(0);
                    merged.push(PropTag::new(column.kind.physical_type(), prop_id));
                }
            }
        }

        Ok(merged)
    }

    fn order_by(&self, default_sort: &[SortKey]) -> Result<Vec<SortKey>> {
        let Some(order_by) = &self.directives.order_by else {
            return Ok(default_sort.to_vec());
        };

        if order_by.is_empty() {
            return Ok(default_sort.to_vec());
        }

        // An explicit sort replaces the default sort entirely.
        let inputs: Vec<PropId> = order_by.iter().map(|order| order.property.clone()).collect();
        let resolved = self.resolve(&inputs)?;

        check(resolved.len() == order_by.len(), "sort resolution count mismatch")?;
        Ok(order_by
            .iter()
            .zip(resolved)
            .map(|(order, resolved)| {
                let prop_id = resolved.map(|entry| entry.prop_id()).unwrap_or(0);
                SortKey {
                    tag: PropTag::new(order.kind.physical_type(), prop_id),
                    descending: order.descending,
                }
            })
            .collect())
    }

    fn resolve(&self, inputs: &[PropId]) -> Result<Vec<Option<ResolvedPropId>>> {
        match &self.store {
            Some(store) => store.resolve_prop_inputs(inputs),
            None => {
                // Without a store there is nothing to resolve named
                // properties against; only plain numeric ids are permitted.
                inputs
                    .iter()
                    .map(|input| match input {
                        PropId::Int(id) => Ok(Some(ResolvedPropId::numeric(*id))),
                        PropId::Named(_) => Err(GraphMailError::Invariant(
                            "named property requires a store context".to_string(),
                        )),
                    })
                    .collect()
            }
        }
    }

    fn seek(&self) -> SeekPlan {
        match &self.directives.seek {
            None => SeekPlan::Beginning,
            Some(None) => SeekPlan::End,
            Some(Some(id)) => SeekPlan::Find(id.clone()),
        }
    }

    fn offset(&self) -> i32 {
        self.directives.offset.unwrap_or(0)
    }

    fn take(&self) -> i32 {
        match self.directives.take {
            // Default to 50 if the directive is absent or 0 was specified.
            None | Some(0) => DEFAULT_TAKE,
            Some(count) => count.clamp(-DEFAULT_TAKE, DEFAULT_TAKE),
        }
    }
}
