// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

pub mod resolver;

pub use resolver::{ResolvedTenant, TenantKeyResolver};
