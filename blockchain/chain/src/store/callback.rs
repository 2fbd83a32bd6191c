// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{ChainError, Cursor, Store};
use log::warn;
use parking_lot::RwLock;
use pharos_beacon::Beacon;
use std::sync::Arc;
use std::thread;

/// Decorates any [`Store`] with subscriber notification: every successful
/// `put` is delivered to every registered callback, off the caller's thread.
///
/// Each subscriber owns an unbounded queue drained by a dedicated worker, so
/// a blocked subscriber delays only itself; notifications are buffered, never
/// dropped, and arrive in put order per subscriber.
pub struct CallbackStore<S> {
    inner: S,
    subscribers: Arc<RwLock<Vec<flume::Sender<Beacon>>>>,
}

impl<S: Store> CallbackStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Registers a callback. It observes every `put` that succeeds after
    /// registration; appends that completed earlier are never replayed.
    pub fn add_callback<F>(&self, callback: F)
    where
        F: Fn(Beacon) + Send + 'static,
    {
        let (sender, receiver) = flume::unbounded::<Beacon>();
        thread::spawn(move || {
            while let Ok(beacon) = receiver.recv() {
                callback(beacon);
            }
        });
        self.subscribers.write().push(sender);
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn notify(&self, beacon: &Beacon) {
        for subscriber in self.subscribers.read().iter() {
            if subscriber.send(beacon.clone()).is_err() {
                warn!("dropping notification for a dead subscriber");
            }
        }
    }
}

impl<S: Store> Store for CallbackStore<S> {
    fn put(&self, beacon: &Beacon) -> Result<(), ChainError> {
        self.inner.put(beacon)?;
        self.notify(beacon);
        Ok(())
    }

    fn last(&self) -> Result<Beacon, ChainError> {
        self.inner.last()
    }

    fn get(&self, round: u64) -> Result<Beacon, ChainError> {
        self.inner.get(round)
    }

    fn len(&self) -> Result<u64, ChainError> {
        self.inner.len()
    }

    fn cursor<F, R>(&self, f: F) -> Result<R, ChainError>
    where
        F: FnOnce(&mut dyn Cursor) -> Result<R, ChainError>,
    {
        self.inner.cursor(f)
    }

    fn close(&self) -> Result<(), ChainError> {
        self.inner.close()
    }
}
