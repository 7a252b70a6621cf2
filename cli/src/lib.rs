// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! codebroker CLI library — exposes testable components

pub mod daemon;
pub mod commands;
pub mod embedded;
