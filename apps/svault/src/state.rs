// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::sync::Arc;

use streamvault_core::{BufferPool, StreamRegistry};

use crate::config::Config;

/// Shared server state: one registry and one buffer pool per server,
/// constructed once at bootstrap and borrowed by every session.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<StreamRegistry>,
    pub pool: Arc<BufferPool>,
    pub config: Arc<Config>,
}
