//! Queue state and its reducer.
//!
//! `reduce` is a pure function of the previous state and one action. Items are held
//! behind `Arc` so an update only reallocates the item it touches; every other item
//! keeps its identity, which lets readers diff snapshots by pointer.

use dalat_core::models::{ItemPatch, QueueStats, QueuedUpload, UploadStatus};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct QueueState {
    /// Insertion order.
    pub items: Vec<Arc<QueuedUpload>>,
    pub is_paused: bool,
    /// Items occupying a concurrency slot.
    pub active_count: usize,
}

#[derive(Debug, Clone)]
pub enum QueueAction {
    AddFiles(Vec<QueuedUpload>),
    UpdateItem { id: Uuid, patch: ItemPatch },
    RemoveItem(Uuid),
    SetPaused(bool),
    IncrementActive,
    DecrementActive,
    ClearCompleted,
    /// Only items in `Error` are retried; anything else is left alone.
    RetryItem { id: Uuid, reset_retry_count: bool },
    RetryAllFailed { reset_retry_count: bool },
}

impl QueueState {
    pub fn item(&self, id: Uuid) -> Option<&Arc<QueuedUpload>> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.item(id).is_some()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats::from_items(self.items.iter().map(Arc::as_ref))
    }

    /// Ids of the first `limit` queued items, in insertion order.
    pub fn next_queued(&self, limit: usize) -> Vec<Uuid> {
        self.items
            .iter()
            .filter(|item| item.status == UploadStatus::Queued)
            .take(limit)
            .map(|item| item.id)
            .collect()
    }

    /// Items currently in an active status, counted from the items themselves.
    pub fn active_items(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.status.is_active())
            .count()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            items: self.items.clone(),
            stats: self.stats(),
            is_paused: self.is_paused,
            active_count: self.active_count,
        }
    }
}

fn retried(item: &QueuedUpload, reset_retry_count: bool) -> QueuedUpload {
    let mut patch = ItemPatch::new()
        .status(UploadStatus::Queued)
        .progress(0)
        .clear_error()
        .retry_pending(false);
    if reset_retry_count {
        patch = patch.retry_count(0);
    }
    item.apply(&patch)
}

pub fn reduce(state: &QueueState, action: QueueAction) -> QueueState {
    match action {
        QueueAction::AddFiles(new_items) => {
            let mut items = state.items.clone();
            items.extend(new_items.into_iter().map(|mut item| {
                item.status = UploadStatus::Queued;
                Arc::new(item)
            }));
            QueueState {
                items,
                ..state.clone()
            }
        }
        QueueAction::UpdateItem { id, patch } => {
            if !state.contains(id) {
                return state.clone();
            }
            let items = state
                .items
                .iter()
                .map(|item| {
                    if item.id == id {
                        Arc::new(item.apply(&patch))
                    } else {
                        Arc::clone(item)
                    }
                })
                .collect();
            QueueState {
                items,
                ..state.clone()
            }
        }
        QueueAction::RemoveItem(id) => {
            if !state.contains(id) {
                return state.clone();
            }
            QueueState {
                items: state
                    .items
                    .iter()
                    .filter(|item| item.id != id)
                    .cloned()
                    .collect(),
                ..state.clone()
            }
        }
        QueueAction::SetPaused(is_paused) => QueueState {
            is_paused,
            ..state.clone()
        },
        QueueAction::IncrementActive => QueueState {
            active_count: state.active_count + 1,
            ..state.clone()
        },
        QueueAction::DecrementActive => QueueState {
            active_count: state.active_count.saturating_sub(1),
            ..state.clone()
        },
        QueueAction::ClearCompleted => QueueState {
            items: state
                .items
                .iter()
                .filter(|item| item.status != UploadStatus::Uploaded)
                .cloned()
                .collect(),
            ..state.clone()
        },
        QueueAction::RetryItem {
            id,
            reset_retry_count,
        } => {
            let items = state
                .items
                .iter()
                .map(|item| {
                    if item.id == id && item.status == UploadStatus::Error {
                        Arc::new(retried(item, reset_retry_count))
                    } else {
                        Arc::clone(item)
                    }
                })
                .collect();
            QueueState {
                items,
                ..state.clone()
            }
        }
        QueueAction::RetryAllFailed { reset_retry_count } => {
            let items = state
                .items
                .iter()
                .map(|item| {
                    if item.status == UploadStatus::Error {
                        Arc::new(retried(item, reset_retry_count))
                    } else {
                        Arc::clone(item)
                    }
                })
                .collect();
            QueueState {
                items,
                ..state.clone()
            }
        }
    }
}

/// Read-only view published to subscribers after every change.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    pub items: Vec<Arc<QueuedUpload>>,
    pub stats: QueueStats,
    pub is_paused: bool,
    pub active_count: usize,
}

impl QueueSnapshot {
    pub fn item(&self, id: Uuid) -> Option<&Arc<QueuedUpload>> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn is_complete(&self) -> bool {
        self.stats.is_complete()
    }

    pub fn has_errors(&self) -> bool {
        self.stats.has_errors()
    }

    pub fn is_uploading(&self) -> bool {
        self.stats.is_uploading()
    }

    pub fn is_settled(&self) -> bool {
        self.stats.is_settled()
    }
}
