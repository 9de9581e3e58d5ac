//! Application layer - ports (trait seams) and the services built on them.

/// Port trait definitions and their error types.
pub mod ports;

/// Election and polling services.
pub mod services;
