// Bearer credentials and the identity helper that mints them
pub mod credentials;

// Single-flight token cache
pub mod cache;

// Reverse proxy handler and backend forwarding
pub mod proxy;

// CLI flags and TOML configuration
pub mod config;
