// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Embedded bootstrap shared by every operator-facing subcommand.
//!
//! The daemon's HTTP surface exposes only the MCP transport and a handful of
//! ambient endpoints (`/healthz`, `/metrics`, OAuth discovery) — there is no
//! admin REST API for sources, tasks, or policies. `source`/`task`/`policy`/
//! `config` therefore always act directly on the broker's services, built
//! in-process from the same configuration a running daemon would load.

use std::path::PathBuf;

use anyhow::{Context, Result};

use codebroker_core::infrastructure::config::BrokerConfig;

use crate::daemon::server::{build_service_graph, ServiceGraph};

pub async fn connect(config_path: Option<PathBuf>) -> Result<ServiceGraph> {
    let config = BrokerConfig::load_or_default(config_path.as_deref()).context("loading configuration")?;
    build_service_graph(&config).await
}
