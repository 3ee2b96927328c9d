//! Member use-case service.
//!
//! # Responsibility
//! - Run the account transfer as one transaction over repository calls.
//! - Recover from duplicate member keys by regenerating the key once.
//!
//! # Invariants
//! - A transfer either moves the whole amount or changes nothing.
//! - Business failures inside a transfer roll back and are reported as
//!   `TxError::Work`, never as transaction infrastructure errors.

use crate::model::member::{Member, MemberId};
use crate::repo::member_repo::{MemberRepository, RepoError};
use crate::tx::context::ExecutionContext;
use crate::tx::template::TransactionTemplate;
use crate::tx::TxError;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Default per-member balance ceiling.
pub const DEFAULT_BALANCE_LIMIT: i64 = 1_000_000_000;
const RETRY_SUFFIX_RANGE: u128 = 10_000;

/// Service error for member use-cases.
#[derive(Debug)]
pub enum MemberServiceError {
    InvalidAmount(i64),
    SameAccount(MemberId),
    MemberNotFound(MemberId),
    InsufficientBalance {
        member_id: MemberId,
        balance: i64,
        requested: i64,
    },
    /// Crediting would push the recipient over the balance ceiling.
    BalanceLimitExceeded { member_id: MemberId, limit: i64 },
    Repo(RepoError),
}

impl Display for MemberServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAmount(amount) => write!(f, "transfer amount must be positive, got {amount}"),
            Self::SameAccount(id) => write!(f, "cannot transfer from `{id}` to itself"),
            Self::MemberNotFound(id) => write!(f, "member not found: {id}"),
            Self::InsufficientBalance {
                member_id,
                balance,
                requested,
            } => write!(
                f,
                "member `{member_id}` has balance {balance}, cannot transfer {requested}"
            ),
            Self::BalanceLimitExceeded { member_id, limit } => {
                write!(f, "member `{member_id}` would exceed balance limit {limit}")
            }
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for MemberServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for MemberServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(member_id) => Self::MemberNotFound(member_id),
            other => Self::Repo(other),
        }
    }
}

/// Member service facade over a repository and a transaction template.
pub struct MemberService<R: MemberRepository> {
    repo: R,
    template: TransactionTemplate,
    balance_limit: i64,
}

impl<R: MemberRepository> MemberService<R> {
    pub fn new(repo: R, template: TransactionTemplate) -> Self {
        Self {
            repo,
            template,
            balance_limit: DEFAULT_BALANCE_LIMIT,
        }
    }

    pub fn with_balance_limit(mut self, limit: i64) -> Self {
        self.balance_limit = limit;
        self
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Moves `amount` from `from_id` to `to_id` in one transaction.
    ///
    /// # Contract
    /// - Joins the transaction already bound to `ctx`, if any.
    /// - On any error no balance changes persist (unless an outer owner
    ///   commits anyway, which then fails as rollback-only).
    pub fn account_transfer(
        &self,
        ctx: &ExecutionContext,
        from_id: &str,
        to_id: &str,
        amount: i64,
    ) -> Result<(), TxError<MemberServiceError>> {
        self.template
            .execute(ctx, |_| self.transfer(ctx, from_id, to_id, amount))?;
        info!("event=account_transfer module=service status=ok ctx={ctx} amount={amount}");
        Ok(())
    }

    /// Creates a member, retrying once with a regenerated id when the id is
    /// already taken. Returns the member as stored.
    pub fn create_member(
        &self,
        ctx: &ExecutionContext,
        member_id: &str,
        money: i64,
    ) -> Result<Member, MemberServiceError> {
        match self.repo.save(ctx, &Member::new(member_id, money)) {
            Ok(saved) => Ok(saved),
            Err(err) if err.is_duplicate_key() => {
                let retry_id = regenerate_id(member_id);
                warn!(
                    "event=member_create module=service status=retry ctx={ctx} error_code=duplicate_key"
                );
                Ok(self.repo.save(ctx, &Member::new(retry_id, money))?)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn transfer(
        &self,
        ctx: &ExecutionContext,
        from_id: &str,
        to_id: &str,
        amount: i64,
    ) -> Result<(), MemberServiceError> {
        if amount <= 0 {
            return Err(MemberServiceError::InvalidAmount(amount));
        }
        if from_id == to_id {
            return Err(MemberServiceError::SameAccount(from_id.to_string()));
        }

        let from = self.repo.find_by_id(ctx, from_id)?;
        let to = self.repo.find_by_id(ctx, to_id)?;
        if from.money < amount {
            return Err(MemberServiceError::InsufficientBalance {
                member_id: from.member_id,
                balance: from.money,
                requested: amount,
            });
        }

        self.repo.update(ctx, from_id, from.money - amount)?;
        let credited = self.credit(&to, amount)?;
        self.repo.update(ctx, to_id, credited)?;
        Ok(())
    }

    fn credit(&self, to: &Member, amount: i64) -> Result<i64, MemberServiceError> {
        to.money
            .checked_add(amount)
            .filter(|balance| *balance <= self.balance_limit)
            .ok_or_else(|| MemberServiceError::BalanceLimitExceeded {
                member_id: to.member_id.clone(),
                limit: self.balance_limit,
            })
    }
}

fn regenerate_id(member_id: &str) -> MemberId {
    let suffix = Uuid::new_v4().as_u128() % RETRY_SUFFIX_RANGE;
    format!("{member_id}{suffix}")
}
