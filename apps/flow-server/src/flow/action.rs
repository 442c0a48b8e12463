// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::fmt;
use std::str::FromStr;

use crate::error::FlowError;

/// Action tag carried by a decrypted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowAction {
    /// Open a conversation (session may not exist yet).
    Init,
    /// Navigate to a previously visited screen.
    Back,
    /// Submit the fields of the current screen.
    DataExchange,
    /// Submit the final fields and close the session.
    Complete,
    /// Platform health check.
    Ping,
}

impl FlowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowAction::Init => "INIT",
            FlowAction::Back => "BACK",
            FlowAction::DataExchange => "data_exchange",
            FlowAction::Complete => "complete",
            FlowAction::Ping => "ping",
        }
    }
}

impl FromStr for FlowAction {
    type Err = FlowError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "init" => Ok(FlowAction::Init),
            "back" => Ok(FlowAction::Back),
            "data_exchange" => Ok(FlowAction::DataExchange),
            "complete" => Ok(FlowAction::Complete),
            "ping" => Ok(FlowAction::Ping),
            _ => Err(FlowError::UnknownAction(tag.to_string())),
        }
    }
}

impl fmt::Display for FlowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
