//! CSRF-safe OAuth2 login-state tracking with a resilient single-flight TTL cache for
//! group-based authorization — built for modern Rust identity systems.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod groups;
pub mod retry;
pub mod roles;
pub mod sso;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

pub use crate::{
	cache::{Loader, TtlCache},
	error::{Error, LoadError, Result},
	groups::{GroupClient, GroupClientConfig, GroupResolver},
	retry::{JitterStrategy, RetryPolicy},
	roles::{Role, RoleMapping, authorize},
	sso::{IdentityVerifier, JwtVerifier, SsoClient, SsoClientConfig, VerifiedIdentity},
};
