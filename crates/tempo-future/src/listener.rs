// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Lock-free listener set with a sealed mark fused into the head pointer.
//!
//! Registration pushes onto a Treiber stack. When the owning future reaches a
//! terminal state, the completing thread seals the set by swapping the head
//! for a sentinel and takes the whole chain in one atomic step; from then on
//! every push observes the sentinel and hands the listener straight back for
//! immediate delivery. Because pushes stack in reverse, the drain reverses
//! the chain so callbacks fire in registration order.

use std::{
    ptr,
    sync::{
        atomic::{AtomicPtr, Ordering},
        Arc,
    },
};
use tempo_executor::{Executor, Work};

pub(crate) struct Listener {
    pub executor: Arc<dyn Executor>,
    pub work: Work,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener").finish_non_exhaustive()
    }
}

struct Node {
    listener: Listener,
    next: *mut Node,
}

// Never dereferenced; only compared against the head.
#[inline]
fn sealed_mark() -> *mut Node {
    1 as *mut Node
}

pub(crate) struct ListenerSet {
    head: AtomicPtr<Node>,
}

// Safety: nodes are reachable from exactly one place at a time (the stack or
// the draining thread), and the payloads they carry are Send.
unsafe impl Send for ListenerSet {}
unsafe impl Sync for ListenerSet {}

impl ListenerSet {
    pub fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// A set that is born sealed, for futures terminal at construction.
    pub fn new_sealed() -> Self {
        Self {
            head: AtomicPtr::new(sealed_mark()),
        }
    }

    /// Push a listener. If the set is sealed the listener is handed back and
    /// the caller must deliver it immediately.
    pub fn push(&self, listener: Listener) -> Result<(), Listener> {
        let mut node = Box::new(Node {
            listener,
            next: ptr::null_mut(),
        });
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            if head == sealed_mark() {
                let Node { listener, .. } = *node;
                return Err(listener);
            }
            node.next = head;
            let raw = Box::into_raw(node);
            match self
                .head
                .compare_exchange_weak(head, raw, Ordering::Release, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(current) => {
                    // Safety: the CAS failed, so `raw` was never published.
                    node = unsafe { Box::from_raw(raw) };
                    head = current;
                }
            }
        }
    }

    /// Seal the set and return the listeners in registration order. Further
    /// pushes deliver immediately. Idempotent: a second seal returns nothing.
    pub fn seal(&self) -> Vec<Listener> {
        let mut cursor = self.head.swap(sealed_mark(), Ordering::AcqRel);
        let mut listeners = Vec::new();
        while !cursor.is_null() && cursor != sealed_mark() {
            // Safety: the swap transferred sole ownership of the chain.
            let node = unsafe { Box::from_raw(cursor) };
            cursor = node.next;
            listeners.push(node.listener);
        }
        listeners.reverse();
        listeners
    }

    pub fn is_sealed(&self) -> bool {
        self.head.load(Ordering::Acquire) == sealed_mark()
    }
}

impl Drop for ListenerSet {
    fn drop(&mut self) {
        let mut cursor = *self.head.get_mut();
        while !cursor.is_null() && cursor != sealed_mark() {
            // Safety: drop has exclusive access to the remaining chain.
            let node = unsafe { Box::from_raw(cursor) };
            cursor = node.next;
        }
    }
}
