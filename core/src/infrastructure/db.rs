// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Wraps `sqlx::postgres::PgPool` in a thin `Database` newtype injected into
//! the PostgreSQL repository implementations. Only constructed when a
//! `database` connection string is present in the broker configuration;
//! otherwise the daemon runs entirely on the in-memory repositories.

use sqlx::postgres::{PgPool, PgPoolOptions};
use anyhow::Result;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await?;
            
        Ok(Self { pool })
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}
