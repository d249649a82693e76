// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Listenable completion futures.
//!
//! A [`ListenableFuture`] is a one-shot container that ends in exactly one of
//! three terminal states: success, failure, or cancellation. Producers drive
//! it through [`SettableFuture`] or [`RunnableFuture`]; consumers register
//! continuations, block, or visit the outcome. The [`combinators`] module
//! composes futures: [`transform`], [`chain`], [`dereference`], [`join`],
//! [`combine`] and [`combine3`].
//!
//! Completion is write-once and listener delivery is exactly-once, in
//! registration order, with the terminal outcome fully published before any
//! callback observes it.

mod combinators;
mod error;
mod future;
mod immediate;
mod listener;
mod runnable;
mod settable;

pub use combinators::{chain, combine, combine3, dereference, join, transform};
pub use error::{CompletionError, FailureCause};
pub use future::{FutureVisitor, ListenableFuture};
pub use immediate::{cancelled_future, completed, failed};
pub use runnable::{RunnableFuture, RunnableTask};
pub use settable::SettableFuture;
