//! Reference model of a session's membership.
//!
//! Tracks only what the session must agree on: which members are in the group
//! and how each commit is classified. Key material is random and not modeled.

use std::collections::BTreeSet;

use chorus_core::{CommitStatus, MemberId};

/// Group operation driven through both the model and a real session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Add a member (key rotation if already present)
    AddMember(MemberId),
    /// Remove a member
    RemoveMember(MemberId),
    /// Rotate a member's key material
    UpdateKey(MemberId),
    /// Advance the epoch without membership changes
    Rekey,
    /// Replay the commit already applied
    ReplayStale,
    /// Deliver a commit that skips an epoch
    SkipEpoch,
    /// Deliver undecodable bytes as a commit
    Corrupt,
}

/// How a commit is expected to be classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedCommit {
    /// Accepted and reconciled
    Applied,
    /// Skipped
    Ignored,
    /// Session must be reset
    ResetRequired,
}

impl ExpectedCommit {
    /// Classify a real commit status.
    pub fn of(status: &CommitStatus) -> Self {
        match status {
            CommitStatus::Applied(_) => Self::Applied,
            CommitStatus::Ignored { .. } => Self::Ignored,
            CommitStatus::ResetRequired { .. } => Self::ResetRequired,
        }
    }
}

/// Membership model for the session of `local`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSession {
    local: MemberId,
    members: BTreeSet<MemberId>,
}

impl ModelSession {
    /// Model of a session that joined with `members`, which include `local`.
    pub fn joined(local: MemberId, members: impl IntoIterator<Item = MemberId>) -> Self {
        let mut members: BTreeSet<MemberId> = members.into_iter().collect();
        members.insert(local);
        Self { local, members }
    }

    /// Apply `op` and return the expected classification of its commit.
    ///
    /// Removing the local member is outside the model and treated as a rekey.
    pub fn apply(&mut self, op: Operation) -> ExpectedCommit {
        match op {
            Operation::AddMember(id) => {
                self.members.insert(id);
                ExpectedCommit::Applied
            },
            Operation::RemoveMember(id) => {
                if id != self.local {
                    self.members.remove(&id);
                }
                ExpectedCommit::Applied
            },
            Operation::UpdateKey(_) | Operation::Rekey => ExpectedCommit::Applied,
            Operation::ReplayStale => ExpectedCommit::Ignored,
            Operation::SkipEpoch | Operation::Corrupt => ExpectedCommit::ResetRequired,
        }
    }

    /// Local member.
    pub fn local(&self) -> MemberId {
        self.local
    }

    /// Expected roster members.
    pub fn members(&self) -> &BTreeSet<MemberId> {
        &self.members
    }

    /// Expected decryptor members: everyone but the local member.
    pub fn remote_members(&self) -> BTreeSet<MemberId> {
        self.members.iter().copied().filter(|id| *id != self.local).collect()
    }
}
