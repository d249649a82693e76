// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use tempo_sync::Interrupted;
use thiserror::Error;

/// The cause carried by a failed future. Shared so that fan-out combinators
/// can propagate one failure to several downstream futures.
pub type FailureCause = Arc<anyhow::Error>;

/// Why a blocking [`get`](crate::ListenableFuture::get) did not produce a
/// value.
#[derive(Clone, Debug, Error)]
pub enum CompletionError {
    #[error("task failed: {0}")]
    Failed(FailureCause),

    #[error("future was cancelled")]
    Cancelled,

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl CompletionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CompletionError::Cancelled)
    }
}
