//! Group key-agreement engine contract.
//!
//! The engine owns the cryptographic protocol state: ratchet tree, epoch
//! secrets, signature checks. The session context never looks inside protocol
//! messages; it hands them over as opaque bytes and acts on what the engine
//! reports back.

use std::collections::BTreeSet;

use chorus_crypto::SharedKeyRatchet;
use ed25519_dalek::SigningKey;
use thiserror::Error;

use crate::roster::{MemberId, RosterDiff, RosterMap};

/// Group key-agreement protocol version.
pub type ProtocolVersion = u16;

/// Group (call channel) identifier.
pub type GroupId = u64;

/// Result of handing a commit to the engine. Exactly one per commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The commit cannot be applied consistently (e.g. failed validation).
    /// The session must be reset.
    Rejected {
        /// Why the engine refused the commit
        reason: String,
    },

    /// The commit is safe to skip (stale, duplicate, not for us).
    Ignored {
        /// Why the engine skipped the commit
        reason: String,
    },

    /// The commit was applied and changed the roster by this diff.
    Accepted(RosterDiff),
}

/// Engine failures outside the commit path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Operation needs an initialized engine session
    #[error("engine session not initialized")]
    NotInitialized,

    /// Input could not be decoded
    #[error("malformed {kind}: {reason}")]
    Malformed {
        /// Kind of message that failed to decode
        kind: &'static str,
        /// Decoder error
        reason: String,
    },

    /// Protocol-level failure reported by the engine
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Group key-agreement engine driven by a [`crate::SessionContext`].
pub trait GroupSessionEngine {
    /// Establish a session for `self_id` in `group_id`.
    ///
    /// A `None` signing key lets the engine generate a transient one.
    fn init(
        &mut self,
        protocol_version: ProtocolVersion,
        group_id: GroupId,
        self_id: MemberId,
        signing_key: Option<&SigningKey>,
    ) -> Result<(), EngineError>;

    /// Discard all protocol state and start over.
    fn reset(&mut self);

    /// Configure the external sender allowed to propose on the group's behalf.
    fn set_external_sender(&mut self, external_sender: &[u8]) -> Result<(), EngineError>;

    /// Process a batch of proposals. Returns a message to send back to the
    /// transport, if any.
    fn process_proposals(
        &mut self,
        proposals: &[u8],
        known_members: &BTreeSet<MemberId>,
    ) -> Result<Option<Vec<u8>>, EngineError>;

    /// Process a commit.
    fn process_commit(&mut self, commit: &[u8]) -> CommitOutcome;

    /// Process a welcome. Returns the full roster if we joined, `None` if the
    /// welcome did not apply to us.
    fn process_welcome(
        &mut self,
        welcome: &[u8],
        known_members: &BTreeSet<MemberId>,
    ) -> Option<RosterMap>;

    /// Protocol version of the current session.
    fn protocol_version(&self) -> ProtocolVersion;

    /// Our serialized key package, to be announced to the group.
    fn marshalled_key_package(&mut self) -> Result<Vec<u8>, EngineError>;

    /// Current key ratchet for `member_id`, if the engine has one.
    ///
    /// Must return the same handle until the engine advances the member's
    /// keys, so re-binding an unchanged member is a no-op.
    fn key_ratchet(&mut self, member_id: MemberId) -> Option<SharedKeyRatchet>;
}
