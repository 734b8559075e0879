//! Command handling
//!
//! - `parser`: Raw feed payload to `ParsedCommand`
//! - `dispatcher`: `ParsedCommand` to gateway calls and a `RelayResult`
//! - `relay`: Parser and dispatcher combined for feed and HTTP callers

pub mod dispatcher;
pub mod parser;
pub mod relay;

pub use dispatcher::Dispatcher;
pub use parser::{CommandParser, Inbound};
pub use relay::CommandRelay;
