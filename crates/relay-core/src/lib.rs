//! Leaf types shared across the relay workspace: branded IDs, session keys,
//! transcript messages, reply payloads, and the dispatch error taxonomy.

pub mod errors;
pub mod ids;
pub mod messages;
pub mod payloads;
pub mod session;
