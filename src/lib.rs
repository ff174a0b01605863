// HTTP API: scan trigger, connection listing, OAuth connect flow
pub mod api;

// Audit trail records
pub mod audit;

// Caller authentication (organization bearer tokens)
pub mod auth;

// Built-in AI tool signature catalog
pub mod catalog;

// Configuration loading (TOML file + environment)
pub mod config;

// Workspace connection model
pub mod connection;

// Token encryption at rest
pub mod credentials;

// Observed-app to signature matching
pub mod matcher;

// Identity provider clients (token exchange, refresh, app listing)
pub mod provider;

// Scan pipeline orchestration
pub mod scan;

// SQLite persistence
pub mod store;

// Access token lifecycle (expiry checks, refresh, re-encryption)
pub mod token_manager;
