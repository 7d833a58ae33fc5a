// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

use clap::Parser;

use streamvault_server::cli;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();
    cli::handle_command(&cli).await;
}
