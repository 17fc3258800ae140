// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared utilities: input batching.

pub mod batching;
