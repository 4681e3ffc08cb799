// ── Chatbridge Atoms Layer ─────────────────────────────────────────────────
// Pure constants, error types, data model, and collaborator traits.
// Dependency rule: atoms may only depend on std and external pure crates.
// Nothing here may import from engine/, lib.rs, or main.rs.

pub mod constants;
pub mod error;
pub mod traits;
pub mod types;
