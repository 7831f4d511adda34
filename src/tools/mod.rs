//! MCP tool inputs.
//!
//! This module contains the parameter types of the tools that expose switch
//! operations.

mod inputs;

pub use inputs::*;
