// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth2 API gateway: one shared credential, single-flight refresh, and an
//! authentication circuit breaker in front of a resilient request executor.

pub mod clock;
pub mod config;
pub mod credential;
pub mod error;
pub mod events;
pub mod executor;
pub mod gate;
pub mod gateway;
pub mod singleflight;
pub mod test_support;

pub use gateway::{Gateway, GatewayBuilder};
