//! Workload-identity credential exchange for pull request review workflows.
//!
//! `reviewgate` lets an automated review job obtain a short-lived GitHub App
//! installation token scoped to exactly one repository, without any
//! long-lived secret stored in that repository. The job proves who it is
//! with the OIDC identity token its CI runtime issues; the broker verifies
//! that token and, only if every claim matches a trusted run of the pinned
//! review workflow on the default branch, mints the installation token.
//!
//! # Architecture
//!
//! The broker holds the App private key and is the only component that
//! talks to GitHub as the App. Verification happens in two phases: claims
//! checkable from the token alone come first, so no GitHub call is made for
//! a token that is obviously untrusted; ref claims are checked only once
//! the repository's actual default branch is known.
//!
//! # Modules
//!
//! - [`acquire`]: Client-side acquisition with retry, fallback and single-flight
//! - [`broker`]: The exchange state machine and its HTTP endpoint
//! - [`config`]: Configuration system with layered precedence (CLI > env > file > defaults)
//! - [`error`]: Semantic error types for the application
//! - [`github`]: GitHub App authentication and installation access
//! - [`oidc`]: Identity-token signature and claim verification
//! - [`observability`]: Logging setup

pub mod acquire;
pub mod broker;
pub mod config;
pub mod error;
pub mod github;
pub mod observability;
pub mod oidc;
