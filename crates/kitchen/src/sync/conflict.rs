//! Whole-record, timestamp-based conflict resolution
//!
//! Last writer wins: the version with the later modification time is kept
//! and the other side's change is dropped. Nothing is surfaced for human
//! review.
//!
//! Timestamps are compared at microsecond precision, the finest both stores
//! keep.

use chrono::{DateTime, SubsecRound, Utc};

use crate::models::SyncableRecord;

/// What to do with a fetched remote record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    /// Remote is newer or unknown locally; overwrite or insert locally
    AdoptRemote,
    /// Local is newer; leave it for the push phase
    DeferToNextPush,
    /// Same modification time; nothing to do
    Equal,
}

/// Compare the local and remote versions of one record
pub fn resolve<L, R>(local: Option<&L>, remote: &R) -> ConflictDecision
where
    L: SyncableRecord + ?Sized,
    R: SyncableRecord + ?Sized,
{
    let Some(local) = local else {
        return ConflictDecision::AdoptRemote;
    };

    let remote_at = stored_precision(remote.modified_at());
    match remote_at.cmp(&stored_precision(local.modified_at())) {
        std::cmp::Ordering::Greater => ConflictDecision::AdoptRemote,
        std::cmp::Ordering::Less => ConflictDecision::DeferToNextPush,
        std::cmp::Ordering::Equal => ConflictDecision::Equal,
    }
}

/// `at` as the stores keep it
pub(crate) fn stored_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}
