// Copyright 2026 The Evistream Project
// SPDX-License-Identifier: Apache-2.0

pub mod client;
pub mod config;
pub mod event;
pub mod sink;
pub mod store;
pub mod stream;
pub mod transport;
