// Library surface of rmbg-server.
// Exposed so integration tests can build the router around a stub engine.

pub mod engine;
pub mod shutdown_signal;
pub mod web;
