// File: store.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::{RaceError, RaceResult};
use crate::record::ResponseRecord;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;

/// Per-batch collection of records, one write-once slot per unit.
///
/// Writers never contend: each owns exactly one slot through its
/// [`SlotHandle`]. The completion counter is the only value every writer
/// touches. The first [`snapshot`](Self::snapshot) freezes the store.
#[derive(Debug)]
pub struct ResponseRecordStore {
    slots: Vec<OnceLock<ResponseRecord>>,
    reserved: Vec<AtomicBool>,
    completed: AtomicUsize,
    frozen: AtomicBool,
    frozen_view: OnceLock<Vec<ResponseRecord>>,
    notify: Notify,
}

/// Exclusive write access to a single slot. Consumed by `write`.
#[derive(Debug)]
pub struct SlotHandle {
    store: Arc<ResponseRecordStore>,
    index: usize,
}

impl ResponseRecordStore {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            slots: (0..capacity).map(|_| OnceLock::new()).collect(),
            reserved: (0..capacity).map(|_| AtomicBool::new(false)).collect(),
            completed: AtomicUsize::new(0),
            frozen: AtomicBool::new(false),
            frozen_view: OnceLock::new(),
            notify: Notify::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn reserve_slot(self: &Arc<Self>, index: usize) -> RaceResult<SlotHandle> {
        let flag = self
            .reserved
            .get(index)
            .ok_or_else(|| RaceError::Slot(format!("slot {} out of range", index)))?;
        if flag.swap(true, Ordering::AcqRel) {
            return Err(RaceError::Slot(format!("slot {} already reserved", index)));
        }
        Ok(SlotHandle {
            store: Arc::clone(self),
            index,
        })
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.completed() >= self.capacity()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Resolves once every slot has been written.
    pub async fn wait_complete(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_complete() {
                return;
            }
            notified.await;
        }
    }

    /// Freezes the store and returns exactly `capacity` records ordered by
    /// slot index. Empty slots come back as `Timeout`. Repeated calls return
    /// the same sequence; writes that land after the first call are dropped.
    pub fn snapshot(&self) -> Vec<ResponseRecord> {
        self.frozen.store(true, Ordering::Release);
        self.frozen_view
            .get_or_init(|| {
                self.slots
                    .iter()
                    .enumerate()
                    .map(|(index, slot)| {
                        slot.get()
                            .cloned()
                            .unwrap_or_else(|| ResponseRecord::timed_out(index))
                    })
                    .collect()
            })
            .clone()
    }

    fn accept(&self, index: usize, record: ResponseRecord) -> bool {
        if self.is_frozen() {
            return false;
        }
        if self.slots[index].set(record.with_index(index)).is_err() {
            return false;
        }
        self.completed.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_one();
        true
    }
}

impl SlotHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns false when the store was already frozen.
    pub fn write(self, record: ResponseRecord) -> bool {
        self.store.accept(self.index, record)
    }
}
