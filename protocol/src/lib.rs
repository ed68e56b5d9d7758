// Tether Protocol
// Types exchanged between the orchestrator, its collaborators and front ends

pub mod protocol;

pub use protocol::*;
