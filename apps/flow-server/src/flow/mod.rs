// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Flow navigation: action tags, the screen graph, and the state machine.

pub mod action;
pub mod definition;
pub mod engine;

pub use action::FlowAction;
pub use definition::{FlowCatalog, FlowDefinition, RouteRule, ScreenDefinition};
pub use engine::{FlowEngine, RequestContext, HEALTH_CHECK_SCREEN, SUCCESS_SCREEN};
