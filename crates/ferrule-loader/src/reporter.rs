// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Failure reporting
//!
//! Every failed loader request is passed to an [`ErrorReporter`] before the
//! request rejects. Reporting never replaces the rejection.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::error;

use crate::error::LoaderError;

/// Observes loader failures
pub trait ErrorReporter: Send + Sync {
    /// Record one failure
    fn report(&self, error: &LoaderError);

    /// Whether anything has been reported
    fn had_error(&self) -> bool;
}

/// Logs each failure through `tracing`
#[derive(Debug, Default)]
pub struct TracingReporter {
    had_error: AtomicBool,
}

impl TracingReporter {
    /// Create a reporter
    pub fn new() -> Self {
        Self::default()
    }
}

impl ErrorReporter for TracingReporter {
    fn report(&self, err: &LoaderError) {
        self.had_error.store(true, Ordering::SeqCst);
        error!(kind = ?err.kind(), "{}", err);
    }

    fn had_error(&self) -> bool {
        self.had_error.load(Ordering::SeqCst)
    }
}

/// Keeps failures for later inspection and prints nothing
#[derive(Debug, Default)]
pub struct MutedErrorReporter {
    errors: Mutex<Vec<LoaderError>>,
}

impl MutedErrorReporter {
    /// Create a muted reporter
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything reported so far
    pub fn errors(&self) -> Vec<LoaderError> {
        self.errors.lock().clone()
    }

    /// Forget everything reported so far
    pub fn clear(&self) {
        self.errors.lock().clear();
    }
}

impl ErrorReporter for MutedErrorReporter {
    fn report(&self, err: &LoaderError) {
        self.errors.lock().push(err.clone());
    }

    fn had_error(&self) -> bool {
        !self.errors.lock().is_empty()
    }
}
