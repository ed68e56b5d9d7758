// Tether Core Library
// Tool registry, confirmation gate, sandbox executor and the agent loop

pub mod approval;
pub mod event;
pub mod mcp;
pub mod model;
pub mod sandbox;
pub mod session;
pub mod tether;
pub mod tools;
pub mod turn;

pub use tether::Tether;
