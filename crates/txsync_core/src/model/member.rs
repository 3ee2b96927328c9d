//! Member domain model.
//!
//! # Responsibility
//! - Define the account record moved around by repository and service code.
//! - Validate member invariants before persistence.
//!
//! # Invariants
//! - `member_id` is non-empty and free of surrounding whitespace.
//! - `money` is never negative.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Primary key of a member row.
pub type MemberId = String;

/// Account record stored in the `member` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Stable member key.
    pub member_id: MemberId,
    /// Current balance in minor units.
    pub money: i64,
}

/// Validation failures for [`Member`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberValidationError {
    EmptyId,
    UntrimmedId(String),
    NegativeBalance { member_id: MemberId, money: i64 },
}

impl Display for MemberValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyId => write!(f, "member id cannot be empty"),
            Self::UntrimmedId(id) => {
                write!(f, "member id `{id}` has leading or trailing whitespace")
            }
            Self::NegativeBalance { member_id, money } => {
                write!(f, "member `{member_id}` cannot hold negative balance {money}")
            }
        }
    }
}

impl Error for MemberValidationError {}

impl Member {
    /// Creates a member record without touching storage.
    pub fn new(member_id: impl Into<MemberId>, money: i64) -> Self {
        Self {
            member_id: member_id.into(),
            money,
        }
    }

    /// Validates record invariants.
    pub fn validate(&self) -> Result<(), MemberValidationError> {
        if self.member_id.is_empty() {
            return Err(MemberValidationError::EmptyId);
        }
        if self.member_id.trim() != self.member_id {
            return Err(MemberValidationError::UntrimmedId(self.member_id.clone()));
        }
        if self.money < 0 {
            return Err(MemberValidationError::NegativeBalance {
                member_id: self.member_id.clone(),
                money: self.money,
            });
        }
        Ok(())
    }
}
