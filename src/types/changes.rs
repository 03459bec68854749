//! Typed change payloads delivered to subscription listeners

use std::sync::Arc;

use crate::types::InstanceKey;

/// One typed change against a subscribed row window.
///
/// Indices are positions in the window as of the moment the change was
/// applied; a `Reloaded` payload replaces the whole window and carries it in
/// full. `Removed` reports the instance key the row held in the window.
#[derive(Debug)]
pub enum RowChange<R> {
    Added { index: usize, row: Arc<R> },
    Updated { index: usize, row: Arc<R> },
    Removed { index: usize, key: InstanceKey },
    Reloaded { rows: Vec<Arc<R>> },
}

// Rows are shared, never cloned, so no `R: Clone` bound.
impl<R> Clone for RowChange<R> {
    fn clone(&self) -> Self {
        match self {
            Self::Added { index, row } => Self::Added {
                index: *index,
                row: Arc::clone(row),
            },
            Self::Updated { index, row } => Self::Updated {
                index: *index,
                row: Arc::clone(row),
            },
            Self::Removed { index, key } => Self::Removed {
                index: *index,
                key: key.clone(),
            },
            Self::Reloaded { rows } => Self::Reloaded {
                rows: rows.clone(),
            },
        }
    }
}
