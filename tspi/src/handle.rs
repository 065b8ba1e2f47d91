// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Process-wide handle allocation

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Result, TspiError};

/// Opaque identifier of one live registry object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Handle(pub u32);

impl Handle {
    /// Sentinel stored in weak references that point at nothing
    pub const NULL: Handle = Handle(0);

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Issues handles that are unique across every object list sharing it.
///
/// A monotonically increasing counter; handles are never reused, so running
/// off the end of the 32-bit space is reported instead of wrapping.
#[derive(Debug)]
pub struct HandleAllocator {
    next: AtomicU32,
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub(crate) fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first.max(1)),
        }
    }

    pub fn next_handle(&self) -> Result<Handle> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                // 0 is the null sentinel and is never issued
                if n == 0 {
                    None
                } else {
                    Some(n.wrapping_add(1))
                }
            })
            .map(Handle)
            .map_err(|_| {
                tracing::error!("handle space exhausted");
                TspiError::HandlesExhausted
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_handles_are_distinct_and_non_null() {
        let alloc = HandleAllocator::new();
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let h = alloc.next_handle().unwrap();
            assert!(!h.is_null());
            assert!(seen.insert(h));
        }
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let alloc = HandleAllocator::starting_at(u32::MAX);
        assert_eq!(alloc.next_handle().unwrap(), Handle(u32::MAX));
        assert!(matches!(
            alloc.next_handle(),
            Err(TspiError::HandlesExhausted)
        ));
        // stays exhausted
        assert!(alloc.next_handle().is_err());
    }

    #[test]
    fn test_concurrent_allocation() {
        let alloc = HandleAllocator::new();
        let all: Vec<Handle> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        (0..500)
                            .map(|_| alloc.next_handle().unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|w| w.join().unwrap())
                .collect()
        });
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());
    }
}
