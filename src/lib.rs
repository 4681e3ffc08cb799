// Chatbridge — session-authenticated messaging bridge.
//
//   atoms  — pure types, errors, constants and collaborator traits (no I/O)
//   engine — lifecycle controller, gateway, relay, config and providers

pub mod atoms;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult, ProviderError};
pub use atoms::traits::{MediaResolver, SessionProvider};
pub use atoms::types::{
    ConnectionPhase, InboundMessage, LifecycleEvent, SendOptions, SendReceipt, StatusChange,
    StatusChangeKind, StatusSnapshot, StatusView,
};
pub use engine::bridge::Bridge;
pub use engine::config::BridgeConfig;
