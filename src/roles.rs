//! Pure role-based authorization decisions.

// std
use std::collections::{HashMap, HashSet};
// crates.io
use serde::{Deserialize, Serialize};

/// Fixed set of application roles a principal can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	/// May send pings and read ping history.
	Ping,
	/// May manage ping templates and their group visibility.
	PingTemplatesWrite,
}

/// Mapping from a role to the group names that confer it.
///
/// Maintained externally; the gate only consumes it.
pub type RoleMapping = HashMap<Role, HashSet<String>>;

/// Decide whether a principal's resolved groups satisfy the required roles.
///
/// Allows when `required_roles` is empty (no restriction), or when at least
/// one required role has at least one of its conferring groups present in
/// `principal_groups`. Pure; no I/O, no retries.
pub fn authorize(
	principal_groups: &HashSet<String>,
	required_roles: &HashSet<Role>,
	role_groups: &RoleMapping,
) -> bool {
	if required_roles.is_empty() {
		return true;
	}

	required_roles.iter().any(|role| {
		role_groups
			.get(role)
			.is_some_and(|groups| groups.iter().any(|group| principal_groups.contains(group)))
	})
}
