// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the codebroker CLI.

pub mod config;
pub mod policy;
pub mod source;
pub mod task;

pub use self::config::ConfigCommand;
pub use self::policy::PolicyCommand;
pub use self::source::SourceCommand;
pub use self::task::TaskCommand;
