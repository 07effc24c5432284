//! Simulated group key-agreement engine.
//!
//! Speaks the CBOR protocol of [`crate::SimGroup`]. Each epoch secret seeds a
//! [`HashKeyRatchet`] per member; ratchet handles are cached so the same
//! `Arc` comes back until the epoch advances.

use std::collections::{BTreeMap, BTreeSet};

use chorus_core::{
    CommitOutcome, EngineError, GroupId, GroupSessionEngine, MemberId, ProtocolVersion,
    RosterDiff, RosterMap, SharedKeyRatchet,
};
use chorus_crypto::HashKeyRatchet;
use ed25519_dalek::SigningKey;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::messages::{
    CommitMessage, Epoch, KeyPackageMessage, Proposal, ProposalsMessage, WelcomeMessage,
    decode, encode,
};

/// Protocol version reported before the first init.
pub const DEFAULT_PROTOCOL_VERSION: ProtocolVersion = 1;

#[derive(Debug)]
struct EngineSession {
    group_id: GroupId,
    self_id: MemberId,
    signing_key: SigningKey,
    group: Option<GroupState>,
}

#[derive(Debug)]
struct GroupState {
    epoch: Epoch,
    epoch_secret: Vec<u8>,
    roster: RosterMap,
}

/// Engine over the simulated protocol.
#[derive(Debug)]
pub struct SimEngine {
    protocol_version: ProtocolVersion,
    session: Option<EngineSession>,
    external_sender: Option<Vec<u8>>,
    ratchets: BTreeMap<MemberId, SharedKeyRatchet>,
    rng: ChaCha8Rng,
}

impl SimEngine {
    /// Engine whose generated keys and secrets derive from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            session: None,
            external_sender: None,
            ratchets: BTreeMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Epoch of the joined group, if any.
    pub fn epoch(&self) -> Option<Epoch> {
        self.group().map(|group| group.epoch)
    }

    /// Whether the engine has joined a group.
    pub fn is_joined(&self) -> bool {
        self.group().is_some()
    }

    /// Verifying key of the current signing key.
    pub fn signature_key(&self) -> Option<[u8; 32]> {
        self.session.as_ref().map(|session| session.signing_key.verifying_key().to_bytes())
    }

    fn group(&self) -> Option<&GroupState> {
        self.session.as_ref().and_then(|session| session.group.as_ref())
    }

    fn enter_epoch(&mut self, epoch: Epoch, epoch_secret: Vec<u8>, roster: RosterMap) {
        self.ratchets.clear();

        if let Some(session) = self.session.as_mut() {
            session.group = Some(GroupState { epoch, epoch_secret, roster });
        }
    }

    fn commit_proposals(
        &mut self,
        message: ProposalsMessage,
        known_members: &BTreeSet<MemberId>,
    ) -> Result<Option<Vec<u8>>, EngineError> {
        let session = self.session.as_ref().ok_or(EngineError::NotInitialized)?;
        let Some(group) = session.group.as_ref() else {
            debug!("proposals received before joining, nothing to commit");
            return Ok(None);
        };

        let mut diff = RosterMap::new();
        for proposal in message.proposals {
            match proposal {
                Proposal::Add { member_id, key } => {
                    if !known_members.contains(&member_id) {
                        return Err(EngineError::Protocol(format!(
                            "proposal adds unknown member {member_id}"
                        )));
                    }
                    if key.is_empty() {
                        return Err(EngineError::Protocol(format!(
                            "proposal adds member {member_id} without key material"
                        )));
                    }
                    diff.insert(member_id, key);
                },
                Proposal::Remove { member_id } => {
                    if group.roster.contains_key(&member_id) {
                        diff.insert(member_id, Vec::new());
                    }
                },
            }
        }

        if diff.is_empty() {
            return Ok(None);
        }

        let mut epoch_secret = vec![0u8; 32];
        self.rng.fill_bytes(&mut epoch_secret);

        Ok(Some(encode(&CommitMessage {
            group_id: session.group_id,
            epoch: group.epoch + 1,
            epoch_secret,
            diff,
        })))
    }
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl GroupSessionEngine for SimEngine {
    fn init(
        &mut self,
        protocol_version: ProtocolVersion,
        group_id: GroupId,
        self_id: MemberId,
        signing_key: Option<&SigningKey>,
    ) -> Result<(), EngineError> {
        if protocol_version == 0 {
            return Err(EngineError::Protocol("protocol version 0 is not supported".into()));
        }

        let signing_key = match signing_key {
            Some(key) => key.clone(),
            None => {
                let mut seed = [0u8; 32];
                self.rng.fill_bytes(&mut seed);
                SigningKey::from_bytes(&seed)
            },
        };

        self.protocol_version = protocol_version;
        self.session = Some(EngineSession { group_id, self_id, signing_key, group: None });
        self.external_sender = None;
        self.ratchets.clear();

        info!(protocol_version, group_id, self_id, "sim engine initialized");
        Ok(())
    }

    fn reset(&mut self) {
        self.session = None;
        self.external_sender = None;
        self.ratchets.clear();
    }

    fn set_external_sender(&mut self, external_sender: &[u8]) -> Result<(), EngineError> {
        if self.session.is_none() {
            return Err(EngineError::NotInitialized);
        }
        if external_sender.is_empty() {
            return Err(EngineError::Malformed {
                kind: "external sender",
                reason: "empty identity".into(),
            });
        }

        self.external_sender = Some(external_sender.to_vec());
        Ok(())
    }

    fn process_proposals(
        &mut self,
        proposals: &[u8],
        known_members: &BTreeSet<MemberId>,
    ) -> Result<Option<Vec<u8>>, EngineError> {
        let session = self.session.as_ref().ok_or(EngineError::NotInitialized)?;
        let message: ProposalsMessage = decode("proposals", proposals)?;

        if message.group_id != session.group_id {
            return Err(EngineError::Protocol(format!(
                "proposals for group {} in group {}",
                message.group_id, session.group_id
            )));
        }

        match &self.external_sender {
            None => return Err(EngineError::Protocol("no external sender configured".into())),
            Some(sender) if *sender != message.sender => {
                return Err(EngineError::Protocol("proposals from unexpected sender".into()));
            },
            Some(_) => {},
        }

        self.commit_proposals(message, known_members)
    }

    fn process_commit(&mut self, commit: &[u8]) -> CommitOutcome {
        let Some(session) = self.session.as_ref() else {
            return CommitOutcome::Rejected { reason: "engine not initialized".into() };
        };

        let message: CommitMessage = match decode("commit", commit) {
            Ok(message) => message,
            Err(err) => return CommitOutcome::Rejected { reason: err.to_string() },
        };

        if message.group_id != session.group_id {
            return CommitOutcome::Ignored {
                reason: format!("commit for group {}", message.group_id),
            };
        }

        let Some(group) = session.group.as_ref() else {
            return CommitOutcome::Ignored { reason: "not a member yet".into() };
        };

        if message.epoch <= group.epoch {
            return CommitOutcome::Ignored {
                reason: format!("stale commit for epoch {}, at {}", message.epoch, group.epoch),
            };
        }
        if message.epoch != group.epoch + 1 {
            warn!(epoch = message.epoch, current = group.epoch, "commit skips epochs");
            return CommitOutcome::Rejected {
                reason: format!("commit for epoch {} while at {}", message.epoch, group.epoch),
            };
        }

        let mut roster = group.roster.clone();
        for (member_id, key) in &message.diff {
            if key.is_empty() {
                roster.remove(member_id);
            } else {
                roster.insert(*member_id, key.clone());
            }
        }

        let self_id = session.self_id;
        let removed_self = !roster.contains_key(&self_id);

        if removed_self {
            info!(epoch = message.epoch, "removed from group");
            if let Some(session) = self.session.as_mut() {
                session.group = None;
            }
            self.ratchets.clear();
        } else {
            self.enter_epoch(message.epoch, message.epoch_secret, roster);
        }

        CommitOutcome::Accepted(RosterDiff::from_map(message.diff))
    }

    fn process_welcome(
        &mut self,
        welcome: &[u8],
        known_members: &BTreeSet<MemberId>,
    ) -> Option<RosterMap> {
        let session = self.session.as_ref()?;

        let message: WelcomeMessage = match decode("welcome", welcome) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "dropping undecodable welcome");
                return None;
            },
        };

        if message.group_id != session.group_id || !message.recipients.contains(&session.self_id)
        {
            return None;
        }

        let self_id = session.self_id;
        if let Some(stranger) =
            message.roster.keys().find(|id| **id != self_id && !known_members.contains(*id))
        {
            warn!(member_id = *stranger, "welcome lists a member unknown to the call");
            return None;
        }

        let roster = message.roster.clone();
        self.enter_epoch(message.epoch, message.epoch_secret, message.roster);
        Some(roster)
    }

    fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    fn marshalled_key_package(&mut self) -> Result<Vec<u8>, EngineError> {
        let session = self.session.as_ref().ok_or(EngineError::NotInitialized)?;

        Ok(encode(&KeyPackageMessage {
            protocol_version: self.protocol_version,
            member_id: session.self_id,
            signature_key: session.signing_key.verifying_key().to_bytes().to_vec(),
        }))
    }

    fn key_ratchet(&mut self, member_id: MemberId) -> Option<SharedKeyRatchet> {
        if let Some(ratchet) = self.ratchets.get(&member_id) {
            return Some(ratchet.clone());
        }

        let group = self.group()?;
        if !group.roster.contains_key(&member_id) {
            return None;
        }

        let ratchet = HashKeyRatchet::shared(&group.epoch_secret, member_id);
        self.ratchets.insert(member_id, ratchet.clone());
        Some(ratchet)
    }
}
