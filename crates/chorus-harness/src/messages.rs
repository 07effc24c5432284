//! Wire types of the simulated group protocol.
//!
//! Every message is CBOR. The session core treats them as opaque bytes; only
//! [`crate::SimGroup`] and [`crate::SimEngine`] look inside.

use std::collections::BTreeSet;

use chorus_core::{EngineError, GroupId, MemberId, ProtocolVersion, RosterMap};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Epoch counter of the simulated group.
pub type Epoch = u64;

/// Commit advancing the group to `epoch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMessage {
    /// Target group
    pub group_id: GroupId,
    /// Epoch this commit establishes
    pub epoch: Epoch,
    /// Secret every member's key ratchet derives from in the new epoch
    pub epoch_secret: Vec<u8>,
    /// Roster changes; empty material removes the member
    pub diff: RosterMap,
}

/// Welcome admitting `recipients` at `epoch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeMessage {
    /// Target group
    pub group_id: GroupId,
    /// Epoch the recipients join at
    pub epoch: Epoch,
    /// Epoch secret
    pub epoch_secret: Vec<u8>,
    /// Members this welcome is addressed to
    pub recipients: BTreeSet<MemberId>,
    /// Full roster at `epoch`
    pub roster: RosterMap,
}

/// One proposed membership change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Proposal {
    /// Add a member with this key material
    Add {
        /// Joining member
        member_id: MemberId,
        /// Key material announced in its key package
        key: Vec<u8>,
    },
    /// Remove a member
    Remove {
        /// Leaving member
        member_id: MemberId,
    },
}

/// Batch of proposals issued by the external sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalsMessage {
    /// Target group
    pub group_id: GroupId,
    /// Identity of the external sender that issued the batch
    pub sender: Vec<u8>,
    /// Proposals in order
    pub proposals: Vec<Proposal>,
}

/// Key package announcing a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPackageMessage {
    /// Protocol version the member speaks
    pub protocol_version: ProtocolVersion,
    /// Announcing member
    pub member_id: MemberId,
    /// Ed25519 verifying key
    pub signature_key: Vec<u8>,
}

/// Encode a message as CBOR.
pub fn encode<T: Serialize>(message: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    // Vec writes are infallible.
    if let Err(err) = ciborium::into_writer(message, &mut buf) {
        tracing::error!(%err, "cbor encoding failed");
    }
    buf
}

/// Decode a CBOR message.
pub fn decode<T: DeserializeOwned>(kind: &'static str, bytes: &[u8]) -> Result<T, EngineError> {
    ciborium::from_reader(bytes)
        .map_err(|err| EngineError::Malformed { kind, reason: err.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_garbage() {
        let err = decode::<CommitMessage>("commit", &[0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, EngineError::Malformed { kind: "commit", .. }));
    }

    #[test]
    fn decode_rejects_wrong_message_kind() {
        let package = KeyPackageMessage {
            protocol_version: 1,
            member_id: 4,
            signature_key: vec![7; 32],
        };

        let bytes = encode(&package);
        assert_eq!(decode::<KeyPackageMessage>("key package", &bytes).unwrap(), package);
        assert!(decode::<CommitMessage>("commit", &bytes).is_err());
    }
}
