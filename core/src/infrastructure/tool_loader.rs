// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Shared result type produced by every tool source loader
//! (`openapi_loader`, `graphql_loader`, `mcp_loader`).

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::tool::{ToolDescriptor, ToolRunner};

pub struct LoadedSource {
    pub descriptors: Vec<ToolDescriptor>,
    pub runners: HashMap<String, Arc<dyn ToolRunner>>,
    pub warnings: Vec<String>,
}
