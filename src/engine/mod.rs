// Chatbridge Engine — Session bridge runtime
// Lifecycle state machine, observer fan-out, outbound commands and the
// webhook relay, plus the Evolution API session provider.

pub mod config;
pub mod backoff;
pub mod scheduler;
pub mod observers;
pub mod lifecycle;
pub mod gateway;
pub mod media;
pub mod relay;
pub mod bridge;
pub mod evolution;
