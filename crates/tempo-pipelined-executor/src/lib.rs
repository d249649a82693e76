// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Per-key FIFO pipelines over a shared executor.
//!
//! A [`PipelinedExecutor`] serializes every task submitted under the same
//! key while letting distinct keys run with whatever parallelism the
//! underlying executor provides. Pipelines are transient: created on first
//! submission, dissolved when they drain, recreated on the next submission.
//! The service tracks quiescence globally and per key, supports aborting
//! queued and running work, and can expose one pipeline as a standalone
//! executor service via [`SinglePipelineExecutor`].

#![forbid(unsafe_code)]

mod pipeline;
mod quiescence;
mod service;
mod single;

pub use pipeline::AbortedTask;
pub use service::{PipelineKey, PipelinedExecutor};
pub use single::SinglePipelineExecutor;
