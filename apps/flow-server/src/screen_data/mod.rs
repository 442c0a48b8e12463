// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Supplementary data for screens (selectable option lists).

pub mod provider;
pub mod source;

pub use provider::{ScreenDataProvider, ScreenDataSettings};
pub use source::{transform_items, DataSourceConfig, DataSourceError, TransformSpec};
