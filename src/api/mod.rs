// =============================================================================
// API Module
// =============================================================================
//
// The HTTP surface of the engine: Bearer-token auth middleware and the
// versioned REST endpoints.

pub mod auth;
pub mod rest;
