//! Execution strategy resolution.
//!
//! Every classified handler must be able to run under the chosen strategy.
//! When all handlers support both, stream mode is the default and the
//! `stream.filter.type` global parameter may select tree mode instead. An
//! override can only pick between supported strategies; it never forces one.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::debug;

use deliverykit_shared::{DeliveryError, Result};

use crate::classified::ClassifiedHandlers;
use crate::diagnostics::characteristics_report;
use crate::table::DescriptorTable;

/// Global parameter naming the strategy explicitly.
pub const STRATEGY_OVERRIDE_PARAM: &str = "stream.filter.type";

/// The two mutually exclusive pipeline execution strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Single-pass, event-driven.
    Stream,
    /// Full in-memory structure.
    Tree,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Tree => "tree",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = DeliveryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" => Ok(Self::Stream),
            "tree" => Ok(Self::Tree),
            _ => Err(DeliveryError::config(format!(
                "invalid '{STRATEGY_OVERRIDE_PARAM}' value '{s}'; must be 'stream' or 'tree'"
            ))),
        }
    }
}

/// The strategy override declared on the `global-parameters` target, if any.
pub fn configured_override(table: &DescriptorTable) -> Result<Option<Strategy>> {
    table
        .global_parameter(STRATEGY_OVERRIDE_PARAM)
        .map(str::parse::<Strategy>)
        .transpose()
}

/// Pick the strategy every classified handler supports.
pub fn resolve(handlers: &ClassifiedHandlers, requested: Option<Strategy>) -> Result<Strategy> {
    let total = handlers.len();
    let stream = handlers.capable_of(Strategy::Stream);
    let tree = handlers.capable_of(Strategy::Tree);

    let strategy = if stream == total && tree == total {
        let chosen = requested.unwrap_or(Strategy::Stream);
        debug!(
            %chosen,
            "every handler supports both strategies; set '{STRATEGY_OVERRIDE_PARAM}' on \
             'global-parameters' to choose explicitly"
        );
        return Ok(chosen);
    } else if tree == total {
        Strategy::Tree
    } else if stream == total {
        Strategy::Stream
    } else {
        return Err(DeliveryError::ambiguous(format!(
            "every handler must support the stream and/or tree strategy \
             ({stream} of {total} support stream, {tree} of {total} support tree):\n{}",
            characteristics_report(handlers)
        )));
    };

    if let Some(requested) = requested {
        if requested != strategy {
            return Err(DeliveryError::invalid_override(format!(
                "'{requested}' cannot be used with this set of handlers; \
                 '{strategy}' is the only strategy they all support"
            )));
        }
    }

    Ok(strategy)
}
