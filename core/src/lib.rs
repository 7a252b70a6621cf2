// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # codebroker-core
//!
//! The multi-tenant LLM code-execution broker's domain model, application
//! services, infrastructure adapters, and HTTP presentation surface.
//!
//! ## Components
//!
//! | Component | Domain files | Application files |
//! |---|---|---|
//! | **Tool Source Loader** | [`domain::tool`] | [`infrastructure::openapi_loader`], [`infrastructure::graphql_loader`], [`infrastructure::mcp_loader`] |
//! | **Tool Registry** | [`domain::tool`] | [`application::tool_registry`] |
//! | **Typechecker** | – | [`application::typechecker`] |
//! | **Task Lifecycle** | [`domain::task`] | [`application::task_service`] |
//! | **Dispatcher + Approval Gate** | [`domain::approval`], [`domain::policy`] | [`application::dispatcher`], [`application::approval_gate`] |
//! | **Session Transport** | [`domain::session`] | [`presentation::session_transport`] |
//!
//! ## Layer structure
//!
//! ```text
//! presentation/   ← HTTP API (axum): /mcp, oauth discovery, /healthz, /metrics
//!     ↓
//! application/    ← Tool registry, typechecker, task service, dispatcher
//!     ↓
//! domain/         ← Aggregates, value objects, repository traits
//!     ↓
//! infrastructure/ ← Postgres/in-memory repos, Docker/process sandbox, loaders
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
