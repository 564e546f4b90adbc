//! # lumen-core: Pure Domain Logic for the Lumen SDK
//!
//! This crate holds everything about authentication and batching that can be
//! expressed without touching the network: credential shapes and their
//! validation, the request signer, session token claims and the batch entry
//! model shared by every upload stream.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Lumen SDK Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Host Application                             │   │
//! │  │    prompt UI ──► submit answer     producers ──► add(entry)     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    lumen-client (async, HTTP)                   │   │
//! │  │    AuthSession, HandoffReceiver, RefreshPoller, Dispatchers     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ lumen-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │validation │  │  signing  │  │   token   │  │   │
//! │  │   │Credentials│  │ UUID/JWT  │  │  SHA-256  │  │ exp claim │  │   │
//! │  │   │BatchEntry │  │ BuildType │  │  headers  │  │  decoding │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO NETWORK • NO ASYNC • PURE FUNCTIONS               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Credentials, build types, session token, batch entries
//! - [`validation`] - Credential shape checks run before any network call
//! - [`signing`] - Per-request authentication headers
//! - [`token`] - Expiry claim decoding for session tokens
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use lumen_core::signing::sign_request;
//!
//! let headers = sign_request("tok", "sec", 1_700_000_000, Some(b"{}")).unwrap();
//! assert_eq!(headers.authorization, "Bearer tok");
//! assert_eq!(headers.timestamp, "1700000000");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod signing;
pub mod token;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{SigningError, TokenError, ValidationError};
pub use signing::{sign_request, SignedHeaders};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Version string reported as `sdkVersion` on every primary auth request.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Side-channel key under which a launcher passes a pre-issued session.
pub const HANDOFF_KEY: &str = "auth_handoff";
