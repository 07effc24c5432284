//! Simulated delivery service.
//!
//! [`SimGroup`] owns the authoritative group state (epoch, epoch secret,
//! roster) and produces the commits and welcomes a real delivery service would
//! fan out. It also fabricates the faulty traffic sessions must survive: stale
//! replays, epoch gaps, undecodable bytes.

use std::collections::BTreeSet;

use chorus_core::{EngineError, GroupId, KeyMaterial, MemberId, RosterMap};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::messages::{
    CommitMessage, Epoch, Proposal, ProposalsMessage, WelcomeMessage, decode, encode,
};

const SECRET_SIZE: usize = 32;
const KEY_SIZE: usize = 32;

/// Commit plus the welcome for members it added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddResult {
    /// Commit for existing members
    pub commit: Vec<u8>,
    /// Welcome for the joiners
    pub welcome: Vec<u8>,
}

/// Deterministic simulated group.
#[derive(Debug, Clone)]
pub struct SimGroup {
    group_id: GroupId,
    epoch: Epoch,
    epoch_secret: Vec<u8>,
    members: RosterMap,
    external_sender: Vec<u8>,
    rng: ChaCha8Rng,
}

impl SimGroup {
    /// Empty group at epoch 0. The same seed yields the same secrets and keys.
    pub fn new(group_id: GroupId, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let external_sender = random_bytes(&mut rng, KEY_SIZE);

        Self {
            group_id,
            epoch: 0,
            epoch_secret: Vec::new(),
            members: RosterMap::new(),
            external_sender,
            rng,
        }
    }

    /// Group id.
    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// Current epoch.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Current roster.
    pub fn members(&self) -> &RosterMap {
        &self.members
    }

    /// Whether `member_id` is in the group.
    pub fn contains(&self, member_id: MemberId) -> bool {
        self.members.contains_key(&member_id)
    }

    /// Identity of the external sender, as handed to
    /// [`chorus_core::SessionContext::set_external_sender`].
    pub fn external_sender(&self) -> &[u8] {
        &self.external_sender
    }

    /// Add members. Members already present are skipped.
    pub fn add_members(&mut self, member_ids: &[MemberId]) -> AddResult {
        let mut diff = RosterMap::new();
        for &member_id in member_ids {
            if !self.members.contains_key(&member_id) {
                diff.insert(member_id, random_bytes(&mut self.rng, KEY_SIZE));
            }
        }

        let joiners: BTreeSet<MemberId> = diff.keys().copied().collect();
        let commit = self.advance(diff);
        let welcome = self.welcome_for(&joiners);

        AddResult { commit, welcome }
    }

    /// Remove members. Absent members still appear as tombstones.
    pub fn remove_members(&mut self, member_ids: &[MemberId]) -> Vec<u8> {
        let diff = member_ids.iter().map(|&id| (id, KeyMaterial::new())).collect();
        self.advance(diff)
    }

    /// Rotate `member_id`'s key material. Non-members produce an empty diff.
    pub fn update_key(&mut self, member_id: MemberId) -> Vec<u8> {
        let mut diff = RosterMap::new();
        if self.members.contains_key(&member_id) {
            diff.insert(member_id, random_bytes(&mut self.rng, KEY_SIZE));
        }
        self.advance(diff)
    }

    /// Advance the epoch without membership changes.
    pub fn rekey(&mut self) -> Vec<u8> {
        self.advance(RosterMap::new())
    }

    /// Welcome for `recipients` at the current epoch.
    pub fn welcome_for(&self, recipients: &BTreeSet<MemberId>) -> Vec<u8> {
        encode(&WelcomeMessage {
            group_id: self.group_id,
            epoch: self.epoch,
            epoch_secret: self.epoch_secret.clone(),
            recipients: recipients.clone(),
            roster: self.members.clone(),
        })
    }

    /// Commit for the epoch already in effect. Members that applied it must
    /// ignore the replay.
    pub fn stale_commit(&self) -> Vec<u8> {
        encode(&CommitMessage {
            group_id: self.group_id,
            epoch: self.epoch,
            epoch_secret: self.epoch_secret.clone(),
            diff: RosterMap::new(),
        })
    }

    /// Commit skipping an epoch. Group state is left untouched.
    pub fn epoch_gap_commit(&mut self) -> Vec<u8> {
        let epoch_secret = random_bytes(&mut self.rng, SECRET_SIZE);
        encode(&CommitMessage {
            group_id: self.group_id,
            epoch: self.epoch + 2,
            epoch_secret,
            diff: RosterMap::new(),
        })
    }

    /// Bytes that do not decode as any message.
    pub fn corrupt_commit(&mut self) -> Vec<u8> {
        let mut bytes = random_bytes(&mut self.rng, 24);
        // 0xff is a CBOR break code and never valid at top level.
        bytes[0] = 0xff;
        bytes
    }

    /// Proposals signed by this group's external sender.
    pub fn proposals(&self, proposals: Vec<Proposal>) -> Vec<u8> {
        encode(&ProposalsMessage {
            group_id: self.group_id,
            sender: self.external_sender.clone(),
            proposals,
        })
    }

    /// Adopt a commit produced by a member, so later traffic builds on it.
    pub fn accept_commit(&mut self, commit: &[u8]) -> Result<(), EngineError> {
        let message: CommitMessage = decode("commit", commit)?;

        if message.group_id != self.group_id || message.epoch != self.epoch + 1 {
            return Err(EngineError::Protocol(format!(
                "commit for group {} epoch {} does not follow epoch {}",
                message.group_id, message.epoch, self.epoch
            )));
        }

        self.install(message.epoch, message.epoch_secret, message.diff);
        Ok(())
    }

    fn advance(&mut self, diff: RosterMap) -> Vec<u8> {
        let epoch = self.epoch + 1;
        let epoch_secret = random_bytes(&mut self.rng, SECRET_SIZE);

        let commit = encode(&CommitMessage {
            group_id: self.group_id,
            epoch,
            epoch_secret: epoch_secret.clone(),
            diff: diff.clone(),
        });

        self.install(epoch, epoch_secret, diff);
        commit
    }

    fn install(&mut self, epoch: Epoch, epoch_secret: Vec<u8>, diff: RosterMap) {
        for (member_id, key) in diff {
            if key.is_empty() {
                self.members.remove(&member_id);
            } else {
                self.members.insert(member_id, key);
            }
        }

        self.epoch = epoch;
        self.epoch_secret = epoch_secret;
        debug!(epoch, members = self.members.len(), "group advanced");
    }
}

fn random_bytes(rng: &mut ChaCha8Rng, len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    bytes
}
