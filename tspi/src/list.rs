// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Per-kind object lists
//!
//! Every object kind lives in its own [`ObjectList`], a mutex-guarded vector of
//! records. Handles come from an allocator shared by all lists so they never
//! collide across kinds. Looking a record up with [`ObjectList::checkout`]
//! returns a [`RecordGuard`] that keeps the list locked until it is released
//! or dropped.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::{Result, TspiError};
use crate::handle::{Handle, HandleAllocator};

/// Object kinds tracked by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Context,
    Tpm,
    Policy,
    RsaKey,
    EncData,
    Pcrs,
    Hash,
    NvStore,
    DelFamily,
    MigData,
}

impl ObjectKind {
    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::Context => "context",
            ObjectKind::Tpm => "tpm",
            ObjectKind::Policy => "policy",
            ObjectKind::RsaKey => "rsakey",
            ObjectKind::EncData => "encdata",
            ObjectKind::Pcrs => "pcrs",
            ObjectKind::Hash => "hash",
            ObjectKind::NvStore => "nvstore",
            ObjectKind::DelFamily => "delfamily",
            ObjectKind::MigData => "migdata",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-record flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectFlags(u32);

impl ObjectFlags {
    /// Object carries a PCR binding
    pub const PCRS: u32 = 1 << 0;
    /// Object requires usage authorization
    pub const USAGE_AUTH: u32 = 1 << 1;
    /// Object has a migration secret
    pub const MIGRATION_AUTH: u32 = 1 << 2;
    /// Registered in the user persistent store
    pub const USER_PS: u32 = 1 << 3;
    /// Registered in the system persistent store
    pub const SYSTEM_PS: u32 = 1 << 4;
    /// Structure is final; no structural setter may succeed
    pub const KEY_SET: u32 = 1 << 5;

    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit == bit
    }

    pub fn insert(&mut self, bit: u32) {
        self.0 |= bit;
    }

    pub fn remove(&mut self, bit: u32) {
        self.0 &= !bit;
    }

    pub fn set(&mut self, bit: u32, on: bool) {
        if on {
            self.insert(bit)
        } else {
            self.remove(bit)
        }
    }

    pub fn with(mut self, bit: u32) -> Self {
        self.insert(bit);
        self
    }
}

/// One registered object
#[derive(Debug)]
pub struct Record<T> {
    pub handle: Handle,
    /// Creating context; never changes
    pub owner: Handle,
    pub flags: ObjectFlags,
    /// Additional contexts the object has been made visible to
    pub connected: Vec<Handle>,
    pub payload: T,
}

impl<T> Record<T> {
    pub fn is_visible_to(&self, ctx: Handle) -> bool {
        self.owner == ctx || self.connected.contains(&ctx)
    }

    pub fn is_key_set(&self) -> bool {
        self.flags.contains(ObjectFlags::KEY_SET)
    }

    /// Fails with `InvalidObjectAccess` once the record is structurally final
    pub fn ensure_mutable(&self) -> Result<()> {
        if self.is_key_set() {
            return Err(TspiError::InvalidObjectAccess);
        }
        Ok(())
    }
}

/// Locked access to a single record.
///
/// The list stays locked for as long as the guard lives.
pub struct RecordGuard<'a, T> {
    records: MutexGuard<'a, Vec<Record<T>>>,
    index: usize,
}

impl<T> RecordGuard<'_, T> {
    /// Check the record back in
    pub fn release(self) {}
}

impl<T> Deref for RecordGuard<'_, T> {
    type Target = Record<T>;

    fn deref(&self) -> &Record<T> {
        &self.records[self.index]
    }
}

impl<T> DerefMut for RecordGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Record<T> {
        &mut self.records[self.index]
    }
}

/// Mutex-guarded collection of records of one kind
pub struct ObjectList<T> {
    kind: ObjectKind,
    allocator: Arc<HandleAllocator>,
    records: Mutex<Vec<Record<T>>>,
}

impl<T> fmt::Debug for ObjectList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectList")
            .field("kind", &self.kind)
            .field("len", &self.len())
            .finish()
    }
}

impl<T> ObjectList<T> {
    pub fn new(kind: ObjectKind, allocator: Arc<HandleAllocator>) -> Self {
        Self {
            kind,
            allocator,
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Record<T>>> {
        // A panicking holder leaves the vector structurally intact
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `payload` under a fresh handle owned by `owner`
    pub fn add(&self, owner: Handle, flags: ObjectFlags, payload: T) -> Result<Handle> {
        let handle = self.allocator.next_handle()?;
        self.lock().push(Record {
            handle,
            owner,
            flags,
            connected: Vec::new(),
            payload,
        });
        debug!(kind = %self.kind, %handle, %owner, "object added");
        Ok(handle)
    }

    /// Register an object that owns itself (contexts)
    pub fn add_self_owned(&self, flags: ObjectFlags, payload: T) -> Result<Handle> {
        let handle = self.allocator.next_handle()?;
        self.lock().push(Record {
            handle,
            owner: handle,
            flags,
            connected: Vec::new(),
            payload,
        });
        debug!(kind = %self.kind, %handle, "self-owned object added");
        Ok(handle)
    }

    /// Lock the list and return the record for `handle`.
    ///
    /// Returns `None`, with the lock already dropped, when the handle is not
    /// in this list.
    pub fn checkout(&self, handle: Handle) -> Option<RecordGuard<'_, T>> {
        let records = self.lock();
        let index = records.iter().position(|r| r.handle == handle)?;
        Some(RecordGuard { records, index })
    }

    /// Checkout that maps a missing handle to `InvalidHandle`
    pub fn get(&self, handle: Handle) -> Result<RecordGuard<'_, T>> {
        self.checkout(handle).ok_or(TspiError::InvalidHandle)
    }

    /// Non-blocking-for-long membership probe: checkout, test, release
    pub fn contains(&self, handle: Handle) -> bool {
        self.checkout(handle).is_some()
    }

    pub fn with_record<R>(&self, handle: Handle, f: impl FnOnce(&Record<T>) -> R) -> Result<R> {
        let guard = self.get(handle)?;
        Ok(f(&guard))
    }

    pub fn with_record_mut<R>(
        &self,
        handle: Handle,
        f: impl FnOnce(&mut Record<T>) -> R,
    ) -> Result<R> {
        let mut guard = self.get(handle)?;
        Ok(f(&mut guard))
    }

    /// Remove `handle` if it is owned by `owner`.
    ///
    /// An absent handle and a handle owned by someone else are reported the
    /// same way. The payload is dropped after the lock is released.
    pub fn remove(&self, handle: Handle, owner: Handle) -> Result<()> {
        let removed = {
            let mut records = self.lock();
            match records
                .iter()
                .position(|r| r.handle == handle && r.owner == owner)
            {
                Some(index) => records.swap_remove(index),
                None => {
                    warn!(kind = %self.kind, %handle, %owner, "refused removal");
                    return Err(TspiError::InvalidHandle);
                }
            }
        };
        debug!(kind = %self.kind, %handle, "object removed");
        drop(removed);
        Ok(())
    }

    /// Remove every record owned by `owner`, returning how many went away
    pub fn close_context(&self, owner: Handle) -> usize {
        let removed: Vec<Record<T>> = {
            let mut records = self.lock();
            let (gone, kept): (Vec<_>, Vec<_>) =
                records.drain(..).partition(|r| r.owner == owner);
            *records = kept;
            gone
        };
        let count = removed.len();
        if count > 0 {
            debug!(kind = %self.kind, %owner, count, "context objects closed");
        }
        count
    }

    /// First handle whose record satisfies `pred`; the lock is held for the
    /// whole scan
    pub fn find_by(&self, pred: impl Fn(&Record<T>) -> bool) -> Option<Handle> {
        self.lock().iter().find(|r| pred(r)).map(|r| r.handle)
    }

    /// Clear weak references held by records owned by `owner`.
    ///
    /// `clear_fn` runs on every payload for which `matches_policy` is true.
    /// Returns the number of records touched.
    pub fn for_each_clear_weak_ref(
        &self,
        owner: Handle,
        matches_policy: impl Fn(&T) -> bool,
        mut clear_fn: impl FnMut(&mut T),
    ) -> usize {
        let mut records = self.lock();
        let mut touched = 0;
        for record in records.iter_mut().filter(|r| r.owner == owner) {
            if matches_policy(&record.payload) {
                clear_fn(&mut record.payload);
                touched += 1;
            }
        }
        touched
    }

    /// Make `handle` visible to `ctx` without transferring ownership
    pub fn connect(&self, handle: Handle, ctx: Handle) -> Result<()> {
        let mut record = self.get(handle)?;
        if !record.is_visible_to(ctx) {
            record.connected.push(ctx);
        }
        Ok(())
    }

    /// Owner of `handle`
    pub fn owner_of(&self, handle: Handle) -> Result<Handle> {
        self.with_record(handle, |r| r.owner)
    }

    pub fn handles_owned_by(&self, owner: Handle) -> Vec<Handle> {
        self.lock()
            .iter()
            .filter(|r| r.owner == owner)
            .map(|r| r.handle)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn list<T>() -> ObjectList<T> {
        ObjectList::new(ObjectKind::Hash, Arc::new(HandleAllocator::new()))
    }

    struct Counted(Arc<AtomicUsize>);

    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_add_and_checkout() {
        let l = list::<u32>();
        let ctx = Handle(1000);
        let h = l.add(ctx, ObjectFlags::empty(), 7).unwrap();
        let mut g = l.checkout(h).unwrap();
        assert_eq!(g.payload, 7);
        assert_eq!(g.owner, ctx);
        g.payload = 9;
        g.release();
        assert_eq!(l.with_record(h, |r| r.payload).unwrap(), 9);
        assert!(l.checkout(Handle(424242)).is_none());
    }

    #[test]
    fn test_missing_checkout_does_not_keep_lock() {
        let l = list::<u32>();
        let h = l.add(Handle(1), ObjectFlags::empty(), 1).unwrap();
        assert!(l.checkout(Handle(999)).is_none());
        // would deadlock if the failed checkout leaked the guard
        assert!(l.checkout(h).is_some());
    }

    #[test]
    fn test_remove_requires_owner() {
        let l = list::<u32>();
        let (a, b) = (Handle(100), Handle(200));
        let h = l.add(b, ObjectFlags::empty(), 5).unwrap();
        assert!(matches!(l.remove(h, a), Err(TspiError::InvalidHandle)));
        assert!(l.checkout(h).is_some());
        assert!(matches!(
            l.remove(Handle(31337), b),
            Err(TspiError::InvalidHandle)
        ));
        l.remove(h, b).unwrap();
        assert!(l.checkout(h).is_none());
    }

    #[test]
    fn test_remove_runs_destructor() {
        let drops = Arc::new(AtomicUsize::new(0));
        let l = list::<Counted>();
        let h = l
            .add(Handle(1), ObjectFlags::empty(), Counted(drops.clone()))
            .unwrap();
        l.remove(h, Handle(1)).unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_context_scoping() {
        let drops = Arc::new(AtomicUsize::new(0));
        let l = list::<Counted>();
        let (a, b) = (Handle(10), Handle(20));
        for _ in 0..3 {
            l.add(a, ObjectFlags::empty(), Counted(drops.clone()))
                .unwrap();
        }
        let kept = l
            .add(b, ObjectFlags::empty(), Counted(drops.clone()))
            .unwrap();
        assert_eq!(l.close_context(a), 3);
        assert_eq!(drops.load(Ordering::SeqCst), 3);
        assert_eq!(l.len(), 1);
        assert!(l.contains(kept));
    }

    #[test]
    fn test_connected_context_cannot_remove() {
        let l = list::<u32>();
        let (a, b) = (Handle(10), Handle(20));
        let h = l.add(a, ObjectFlags::empty(), 1).unwrap();
        l.connect(h, b).unwrap();
        assert!(l.with_record(h, |r| r.is_visible_to(b)).unwrap());
        assert!(l.remove(h, b).is_err());
        assert_eq!(l.close_context(b), 0);
        assert!(l.contains(h));
    }

    #[test]
    fn test_find_by_and_weak_ref_sweep() {
        let l = list::<Handle>();
        let ctx = Handle(1);
        let policy = Handle(77);
        let k1 = l.add(ctx, ObjectFlags::empty(), policy).unwrap();
        let k2 = l.add(ctx, ObjectFlags::empty(), Handle(78)).unwrap();
        let other = l.add(Handle(2), ObjectFlags::empty(), policy).unwrap();
        assert_eq!(l.find_by(|r| r.payload == Handle(78)), Some(k2));

        let n = l.for_each_clear_weak_ref(ctx, |p| *p == policy, |p| *p = Handle::NULL);
        assert_eq!(n, 1);
        assert_eq!(l.with_record(k1, |r| r.payload).unwrap(), Handle::NULL);
        assert_eq!(l.with_record(k2, |r| r.payload).unwrap(), Handle(78));
        assert_eq!(l.with_record(other, |r| r.payload).unwrap(), policy);
    }

    #[test]
    fn test_ensure_mutable() {
        let l = list::<u32>();
        let h = l
            .add(Handle(1), ObjectFlags::empty().with(ObjectFlags::KEY_SET), 0)
            .unwrap();
        let g = l.get(h).unwrap();
        assert!(matches!(
            g.ensure_mutable(),
            Err(TspiError::InvalidObjectAccess)
        ));
    }

    #[test]
    fn test_guard_blocks_other_threads_until_released() {
        let l = list::<u32>();
        let h = l.add(Handle(1), ObjectFlags::empty(), 0).unwrap();
        let guard = l.checkout(h).unwrap();
        std::thread::scope(|s| {
            let waiter = s.spawn(|| {
                let mut g = l.checkout(h).unwrap();
                g.payload += 1;
                g.payload
            });
            std::thread::sleep(Duration::from_millis(20));
            assert!(!waiter.is_finished());
            guard.release();
            assert_eq!(waiter.join().unwrap(), 1);
        });
    }

    #[test]
    fn test_concurrent_adds_are_unique() {
        let alloc = Arc::new(HandleAllocator::new());
        let a = ObjectList::<u32>::new(ObjectKind::Hash, alloc.clone());
        let b = ObjectList::<u32>::new(ObjectKind::Policy, alloc);
        let handles: Vec<Handle> = std::thread::scope(|s| {
            let mut workers = Vec::new();
            for i in 0..8u32 {
                let l = if i % 2 == 0 { &a } else { &b };
                workers.push(s.spawn(move || {
                    (0..200)
                        .map(|n| l.add(Handle(1), ObjectFlags::empty(), n).unwrap())
                        .collect::<Vec<_>>()
                }));
            }
            workers
                .into_iter()
                .flat_map(|w| w.join().unwrap())
                .collect()
        });
        let mut sorted = handles.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), handles.len());
        assert_eq!(a.len() + b.len(), handles.len());
    }
}
