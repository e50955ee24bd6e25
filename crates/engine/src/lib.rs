// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ab-engine: session correlation between agent logs and tmux windows.
//!
//! The matcher finds which log a window is running by grepping recent
//! user messages out of the scrollback against log content; the worker
//! runs full scan+match cycles off the request path; the poller drives
//! the worker on an interval and reconciles results into the database
//! and registry.

pub mod capture_lock;
pub mod env;
pub mod matcher;
pub mod poller;
pub mod registry;
pub mod resume;
pub mod status;
pub mod worker;

pub use capture_lock::CaptureLock;
pub use matcher::{LogMatcher, MatchOptions, MatchVerification, OrderedScore, WindowMatch};
pub use poller::{LogPoller, PollerConfig};
pub use registry::{SessionPatch, SessionRegistry};
pub use worker::{
    MatchPair, MatchWorker, WorkerError, WorkerHandle, WorkerProfile, WorkerRequest,
    WorkerResponse,
};
