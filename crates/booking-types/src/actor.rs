//! Acting parties and their roles.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	Customer,
	Provider,
	Admin,
	/// Internal automation (lifecycle sweeper).
	System,
}

impl Role {
	pub fn as_str(&self) -> &'static str {
		match self {
			Role::Customer => "customer",
			Role::Provider => "provider",
			Role::Admin => "admin",
			Role::System => "system",
		}
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for Role {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"customer" => Ok(Role::Customer),
			"provider" => Ok(Role::Provider),
			"admin" => Ok(Role::Admin),
			"system" => Ok(Role::System),
			other => Err(format!("unknown role: {other}")),
		}
	}
}

/// The authenticated principal performing an operation.
///
/// Identity is established upstream; the booking core trusts the id and role
/// for authorization gates and history attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
	pub id: String,
	pub role: Role,
}

impl Actor {
	pub fn new(id: impl Into<String>, role: Role) -> Self {
		Self { id: id.into(), role }
	}

	/// Actor used by internal automation.
	pub fn system() -> Self {
		Self {
			id: "system".to_string(),
			role: Role::System,
		}
	}

	pub fn is_admin(&self) -> bool {
		self.role == Role::Admin
	}
}
