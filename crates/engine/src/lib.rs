// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Node runtime for the distributed semaphore
//!
//! A single task owns the [`dsem_core::CoordinationEngine`] and serializes
//! every local call and network delivery through it. Callers hold a cheap
//! [`Semaphore`] handle.

mod error;
mod runtime;
mod semaphore;

pub use error::{RuntimeError, SemaphoreError};
pub use runtime::Runtime;
pub use semaphore::Semaphore;
