//! # JupyAgent init
//!
//! Entrypoint of the JupyAgent container. It runs once per container start and
//! prepares everything the agents need before handing the container's
//! lifetime over to supervisord:
//!
//! ```text
//!   mounts ──▶ token ──▶ configs ──▶ supervisord ──▶ readiness ──▶ TOKEN.txt ──▶ wait
//!  (chown)   (zellij)   (opencode,    (services)      (HTTP poll)   (dashboard)
//!                        claude)
//! ```
//!
//! ## Modules
//! - `config`: paths, binaries and limits, with environment overrides
//! - `permissions`: best-effort ownership fix-up of mounted volumes
//! - `credential`: token minting and extraction from minter output
//! - `propagate`: sidecar template rendering and agent config merging
//! - `supervisor`: supervisord launch and wait
//! - `readiness`: bounded polling of service endpoints
//! - `sentinel`: the readiness file watched by the host dashboard
//! - `bootstrap`: the sequence tying it all together

pub mod bootstrap;
pub mod config;
pub mod credential;
pub mod permissions;
pub mod propagate;
pub mod readiness;
pub mod sentinel;
pub mod supervisor;

pub use bootstrap::{Bootstrap, Stage};
pub use config::Config;
pub use credential::Token;
