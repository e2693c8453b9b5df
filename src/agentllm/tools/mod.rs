//! Built-in tools ready to register on an agent.

pub mod calculator;

pub use calculator::calculator_tool;
