// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

pub mod cli;
pub mod config;
pub mod logging;
pub mod server;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod websocket;

// Re-export commonly used items for convenience
pub use config::Config;
pub use state::AppState;
