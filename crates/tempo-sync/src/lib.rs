// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Low-level thread coordination for the Tempo toolkit.
//!
//! Rust threads have no intrinsic interrupt status, so this crate attaches an
//! interrupt token to every OS thread on first use (see [`interrupt`]). Every
//! interruptible blocking call in the workspace is built from these tokens
//! plus `std::thread` parking.
//!
//! The crate also provides [`SpinLock`], a non-reentrant unfair lock intended
//! for very short critical sections, together with a FIFO [`SpinCondvar`].

pub mod interrupt;
mod spin_lock;

pub use interrupt::{Interrupted, InterruptHandle};
pub use spin_lock::{SpinCondvar, SpinGuard, SpinLock};
