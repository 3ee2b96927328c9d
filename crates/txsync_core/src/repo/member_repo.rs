//! Member repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide save/find/update/delete over the `member` table.
//! - Route every statement through [`DataAccess`] so transactional and
//!   non-transactional callers share one code path.
//!
//! # Invariants
//! - Write paths validate the member before SQL runs.
//! - `find_by_id` reports a missing row as `RepoError::NotFound`, not as
//!   a data access error.

use super::access::DataAccess;
use crate::model::member::{Member, MemberId, MemberValidationError};
use crate::translate::DataAccessError;
use crate::tx::context::ExecutionContext;
use log::info;
use rusqlite::params;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

const INSERT_SQL: &str = "INSERT INTO member (member_id, money) VALUES (?1, ?2);";
const SELECT_BY_ID_SQL: &str = "SELECT member_id, money FROM member WHERE member_id = ?1;";
const UPDATE_SQL: &str = "UPDATE member SET money = ?1 WHERE member_id = ?2;";
const DELETE_SQL: &str = "DELETE FROM member WHERE member_id = ?1;";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for member persistence.
#[derive(Debug)]
pub enum RepoError {
    Validation(MemberValidationError),
    Data(DataAccessError),
    NotFound(MemberId),
}

impl RepoError {
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::Data(err) if err.is_duplicate_key())
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Data(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "member not found: {id}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Data(err) => Some(err),
            Self::NotFound(_) => None,
        }
    }
}

impl From<MemberValidationError> for RepoError {
    fn from(value: MemberValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DataAccessError> for RepoError {
    fn from(value: DataAccessError) -> Self {
        Self::Data(value)
    }
}

/// Repository interface for member records.
///
/// Every method takes the caller's context so it can join a bound
/// transaction.
pub trait MemberRepository {
    fn save(&self, ctx: &ExecutionContext, member: &Member) -> RepoResult<Member>;
    fn find_by_id(&self, ctx: &ExecutionContext, member_id: &str) -> RepoResult<Member>;
    fn update(&self, ctx: &ExecutionContext, member_id: &str, money: i64) -> RepoResult<usize>;
    fn delete(&self, ctx: &ExecutionContext, member_id: &str) -> RepoResult<usize>;
}

/// SQLite-backed member repository.
#[derive(Clone)]
pub struct SqliteMemberRepository {
    access: Arc<DataAccess>,
}

impl SqliteMemberRepository {
    pub fn new(access: Arc<DataAccess>) -> Self {
        Self { access }
    }
}

impl MemberRepository for SqliteMemberRepository {
    fn save(&self, ctx: &ExecutionContext, member: &Member) -> RepoResult<Member> {
        member.validate()?;

        let changed = self.access.execute_update(
            ctx,
            "save",
            INSERT_SQL,
            params![member.member_id.as_str(), member.money],
        )?;
        info!("event=member_save module=repo status=ok ctx={ctx} affected_rows={changed}");
        Ok(member.clone())
    }

    fn find_by_id(&self, ctx: &ExecutionContext, member_id: &str) -> RepoResult<Member> {
        self.access
            .query_optional(ctx, "find_by_id", SELECT_BY_ID_SQL, [member_id], |row| {
                Ok(Member {
                    member_id: row.get("member_id")?,
                    money: row.get("money")?,
                })
            })?
            .ok_or_else(|| RepoError::NotFound(member_id.to_string()))
    }

    fn update(&self, ctx: &ExecutionContext, member_id: &str, money: i64) -> RepoResult<usize> {
        Member::new(member_id, money).validate()?;

        let changed =
            self.access
                .execute_update(ctx, "update", UPDATE_SQL, params![money, member_id])?;
        info!("event=member_update module=repo status=ok ctx={ctx} affected_rows={changed}");
        Ok(changed)
    }

    fn delete(&self, ctx: &ExecutionContext, member_id: &str) -> RepoResult<usize> {
        let changed = self
            .access
            .execute_update(ctx, "delete", DELETE_SQL, [member_id])?;
        info!("event=member_delete module=repo status=ok ctx={ctx} affected_rows={changed}");
        Ok(changed)
    }
}
