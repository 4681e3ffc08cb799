// ── Chatbridge Atoms: Constants ────────────────────────────────────────────
// All named defaults for the crate live here. Every value is overridable
// through `BridgeConfig`; these are only the fallbacks.

// ── Disconnect recovery ────────────────────────────────────────────────────
// Delay for attempt n is min(base * n, cap). After MAX attempts the session
// needs an operator restart.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 5_000;
pub const DEFAULT_RECONNECT_CAP_DELAY_MS: u64 = 30_000;

// ── Auth-failure recovery ──────────────────────────────────────────────────
// Fixed delay, no backoff. Kept separate from the disconnect policy.
pub const DEFAULT_AUTH_RETRY_DELAY_MS: u64 = 3_000;

// ── Periodic readiness summary ─────────────────────────────────────────────
pub const DEFAULT_STATUS_INTERVAL_SECS: u64 = 10;

// ── Webhook relay ──────────────────────────────────────────────────────────
pub const DEFAULT_RELAY_TIMEOUT_SECS: u64 = 15;

// ── Addressing ─────────────────────────────────────────────────────────────
/// Suffix appended to bare phone numbers when the provider doesn't name one.
pub const DEFAULT_ADDRESS_DOMAIN: &str = "c.us";

/// Disconnect reasons that mean the account holder signed this device out.
/// Both spellings are seen in the wild ("LOGOUT" from browser sessions).
pub const LOGOUT_REASONS: &[&str] = &["logged-out", "LOGOUT"];

/// Reason recorded when the local side forces a sign-out.
pub const LOGGED_OUT_REASON: &str = "logged-out";

// ── Evolution API gateway ──────────────────────────────────────────────────
pub const DEFAULT_EVOLUTION_API_URL: &str = "http://127.0.0.1:8085";
pub const DEFAULT_EVOLUTION_INSTANCE: &str = "chatbridge";
pub const DEFAULT_EVOLUTION_WEBHOOK_PORT: u16 = 8086;
/// Host the Evolution container uses to reach the webhook listener.
pub const EVOLUTION_WEBHOOK_HOST: &str = "host.docker.internal";
pub const EVOLUTION_WEBHOOK_PATH: &str = "/webhook/whatsapp";
/// Evolution addresses users as `<digits>@s.whatsapp.net`.
pub const EVOLUTION_ADDRESS_DOMAIN: &str = "s.whatsapp.net";

/// Environment variable naming an optional TOML config file.
pub const CONFIG_PATH_ENV: &str = "CHATBRIDGE_CONFIG";
