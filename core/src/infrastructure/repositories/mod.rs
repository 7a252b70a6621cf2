// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository implementations — in-memory for tests and single-node
//! operation, PostgreSQL-backed for everything else. The domain layer only
//! ever sees the trait objects in `domain::repository`.

pub mod in_memory;
pub mod postgres;

pub use in_memory::{
    InMemoryApprovalRepository, InMemoryPolicyRepository, InMemoryTaskRepository,
    InMemoryToolSourceRepository,
};
pub use postgres::{
    PostgresApprovalRepository, PostgresPolicyRepository, PostgresTaskRepository,
    PostgresToolSourceRepository,
};
