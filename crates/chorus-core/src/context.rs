//! Session context: lifecycle, protocol event handling, frame dispatch.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────┐  reinit   ┌─────────────┐  reset   ┌───────┐
//! │ Created │──────────>│ Initialized │─────────>│ Reset │
//! └─────────┘           └─────────────┘          └───────┘
//!                              ^                     │
//!                              └───────reinit────────┘
//! ```
//!
//! Protocol operations (proposals, commits, welcomes, external sender, key
//! package) require `Initialized`. Destruction consumes the context.
//!
//! # Reconciliation
//!
//! Every roster change flows through one path: the [`RosterStore`] is updated
//! first, the [`DecryptorTable`] loses removed members in the same step, then
//! decryptor sync re-binds every remaining cipher unit to the engine's current
//! key ratchets. After any reconciliation that leaves the roster non-empty the
//! decryptor table covers exactly the roster minus the local member.

use std::collections::BTreeSet;

use chorus_crypto::{Decryptor, Encryptor, FRAME_OVERHEAD, MediaType, StreamId};
use ed25519_dalek::SigningKey;
use tracing::{Span, debug, error, field, info, info_span, trace, warn};

use crate::{
    config::SessionConfig,
    decryptors::DecryptorTable,
    engine::{CommitOutcome, GroupId, GroupSessionEngine, ProtocolVersion},
    error::{SessionError, StatusCode},
    roster::{MemberId, ReconcileReport, RosterDiff, RosterSnapshot, RosterStore},
};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Allocated, not yet initialized
    Created,
    /// Initialized for a group and local member
    Initialized,
    /// Engine session discarded, waiting for re-initialization
    Reset,
}

/// Result of processing a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitStatus {
    /// Commit accepted and reconciled into the roster
    Applied(ReconcileReport),

    /// Commit skipped; nothing changed
    Ignored {
        /// Engine's reason for skipping
        reason: String,
    },

    /// Commit rejected; the caller must reset the session
    ResetRequired {
        /// Engine's reason for rejecting
        reason: String,
    },
}

impl CommitStatus {
    /// Status code reported for this outcome.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Applied(_) => StatusCode::Success,
            Self::Ignored { .. } => StatusCode::CommitIgnorable,
            Self::ResetRequired { .. } => StatusCode::CommitResetRequired,
        }
    }

    /// Whether the caller must reset the session.
    pub fn requires_reset(&self) -> bool {
        matches!(self, Self::ResetRequired { .. })
    }
}

/// Live session for one group call.
///
/// Owns the engine, the authoritative roster, one decryptor per remote member
/// and the local encryptor. All mutation goes through `&mut self`; callers
/// sharing a context across threads wrap it in their own lock.
#[derive(Debug)]
pub struct SessionContext<E> {
    engine: E,
    config: SessionConfig,
    span: Span,
    state: SessionState,
    local_member: Option<MemberId>,
    group_id: Option<GroupId>,
    signing_key: Option<SigningKey>,
    roster: RosterStore,
    decryptors: DecryptorTable,
    encryptor: Encryptor,
}

impl<E: GroupSessionEngine> SessionContext<E> {
    /// Create a context around `engine` with default configuration.
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, SessionConfig::default())
    }

    /// Create a context with explicit configuration.
    pub fn with_config(engine: E, config: SessionConfig) -> Self {
        let span = info_span!("session", group_id = field::Empty, member_id = field::Empty);
        let decryptors = DecryptorTable::new(config.retain_previous_ratchet);

        Self {
            engine,
            config,
            span,
            state: SessionState::Created,
            local_member: None,
            group_id: None,
            signing_key: None,
            roster: RosterStore::new(),
            decryptors,
            encryptor: Encryptor::new(),
        }
    }

    /// Replace the diagnostic span every operation runs in.
    ///
    /// `group_id` and `member_id` are recorded on it at init if declared.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Signing key handed to the engine on every init. Without one the engine
    /// generates its own.
    #[must_use]
    pub fn with_signing_key(mut self, signing_key: SigningKey) -> Self {
        self.signing_key = Some(signing_key);
        self
    }

    /// Initialize (or re-initialize) for `group_id` as `local_member`.
    ///
    /// Roster, decryptors and the encryptor binding are cleared first so no
    /// state from an earlier session survives.
    pub fn reinit(
        &mut self,
        protocol_version: ProtocolVersion,
        group_id: GroupId,
        local_member: MemberId,
    ) -> Result<(), SessionError> {
        let _entered = self.span.clone().entered();
        self.span.record("group_id", group_id);
        self.span.record("member_id", local_member);

        self.clear_media_state();

        if let Err(err) = self.engine.init(
            protocol_version,
            group_id,
            local_member,
            self.signing_key.as_ref(),
        ) {
            warn!(%err, "engine init failed");
            if self.state == SessionState::Initialized {
                self.state = SessionState::Reset;
            }
            return Err(err.into());
        }

        self.local_member = Some(local_member);
        self.group_id = Some(group_id);
        self.state = SessionState::Initialized;

        info!(protocol_version, "session initialized");
        Ok(())
    }

    /// Discard the engine session and all membership state.
    pub fn reset(&mut self) {
        let _entered = self.span.clone().entered();

        self.engine.reset();
        self.clear_media_state();
        self.state = SessionState::Reset;

        info!("session reset");
    }

    /// Release the session.
    pub fn destroy(self) {
        let _entered = self.span.clone().entered();
        info!(members = self.roster.len(), "session destroyed");
    }

    /// Forward the external sender to the engine.
    pub fn set_external_sender(&mut self, external_sender: &[u8]) -> Result<(), SessionError> {
        let _entered = self.span.clone().entered();
        self.require_initialized("set_external_sender")?;

        self.engine.set_external_sender(external_sender).inspect_err(|err| {
            warn!(%err, "engine rejected external sender");
        })?;

        debug!(len = external_sender.len(), "external sender set");
        Ok(())
    }

    /// Hand proposals to the engine. Returns the engine's response for the
    /// transport, if any. The roster is not touched.
    pub fn process_proposals(
        &mut self,
        proposals: &[u8],
        known_members: &BTreeSet<MemberId>,
    ) -> Result<Option<Vec<u8>>, SessionError> {
        let _entered = self.span.clone().entered();
        self.require_initialized("process_proposals")?;

        let response =
            self.engine.process_proposals(proposals, known_members).inspect_err(|err| {
                warn!(%err, "engine failed to process proposals");
            })?;

        debug!(responded = response.is_some(), "processed proposals");
        Ok(response)
    }

    /// Hand a commit to the engine and reconcile an accepted diff.
    ///
    /// Rejected and ignored commits leave the roster untouched.
    pub fn process_commit(&mut self, commit: &[u8]) -> Result<CommitStatus, SessionError> {
        let _entered = self.span.clone().entered();
        self.require_initialized("process_commit")?;

        match self.engine.process_commit(commit) {
            CommitOutcome::Rejected { reason } => {
                warn!(%reason, "commit rejected, session must be reset");
                Ok(CommitStatus::ResetRequired { reason })
            },
            CommitOutcome::Ignored { reason } => {
                debug!(%reason, "commit ignored");
                Ok(CommitStatus::Ignored { reason })
            },
            CommitOutcome::Accepted(diff) => {
                let report = self.update_roster(diff);
                info!(members = self.roster.len(), "commit applied");
                Ok(CommitStatus::Applied(report))
            },
        }
    }

    /// Hand a welcome to the engine. On join the roster is replaced by the
    /// engine's snapshot and decryptors are re-synced.
    ///
    /// Returns whether the welcome applied to us.
    pub fn process_welcome(
        &mut self,
        welcome: &[u8],
        known_members: &BTreeSet<MemberId>,
    ) -> Result<bool, SessionError> {
        let _entered = self.span.clone().entered();
        self.require_initialized("process_welcome")?;

        let Some(snapshot) = self.engine.process_welcome(welcome, known_members) else {
            debug!("welcome not applicable");
            return Ok(false);
        };

        self.roster.replace(snapshot);

        let roster = &self.roster;
        for member_id in self.decryptors.retain(|member_id| roster.contains(member_id)) {
            debug!(member_id, "dropped decryptor for member absent from welcome");
        }

        info!(members = self.roster.len(), "joined group from welcome");
        self.rebind_cipher_units();

        Ok(true)
    }

    /// Re-bind every decryptor and the encryptor to the engine's current key
    /// ratchets, creating decryptors for members that lack one.
    ///
    /// Runs automatically after reconciliation. Repeating it without a roster
    /// change leaves every binding unchanged.
    pub fn sync_decryptors(&mut self) {
        let _entered = self.span.clone().entered();
        self.rebind_cipher_units();
    }

    /// Decrypt a frame sent by `member_id` into `out`.
    pub fn decrypt_frame(
        &mut self,
        member_id: MemberId,
        media: MediaType,
        encrypted: &[u8],
        out: &mut [u8],
    ) -> Result<usize, SessionError> {
        let _entered = self.span.clone().entered();
        self.check_frame_size(encrypted.len(), FRAME_OVERHEAD)?;

        let decryptor =
            self.decryptors.get_mut(member_id).ok_or(SessionError::UnknownMember(member_id))?;

        let written = decryptor
            .decrypt(media, encrypted, out)
            .map_err(|source| SessionError::Decryption { member_id, source })?;

        trace!(member_id, ?media, written, "decrypted frame");
        Ok(written)
    }

    /// Encrypt a local frame for `stream_id` into `out`.
    pub fn encrypt_frame(
        &mut self,
        stream_id: StreamId,
        media: MediaType,
        plaintext: &[u8],
        out: &mut [u8],
    ) -> Result<usize, SessionError> {
        let _entered = self.span.clone().entered();
        self.check_frame_size(plaintext.len(), 0)?;

        let written = self
            .encryptor
            .encrypt(media, stream_id, plaintext, out)
            .map_err(|source| SessionError::Encryption { stream_id, source })?;

        trace!(stream_id, ?media, written, "encrypted frame");
        Ok(written)
    }

    /// Owned copy of the roster.
    pub fn cached_roster(&self) -> Result<RosterSnapshot, SessionError> {
        Ok(self.roster.try_snapshot()?)
    }

    /// Engine's current protocol version.
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.engine.protocol_version()
    }

    /// Serialized key package for announcing ourselves to the group.
    pub fn marshalled_key_package(&mut self) -> Result<Vec<u8>, SessionError> {
        let _entered = self.span.clone().entered();
        self.require_initialized("marshalled_key_package")?;

        Ok(self.engine.marshalled_key_package()?)
    }

    /// Authoritative roster.
    pub fn roster(&self) -> &RosterStore {
        &self.roster
    }

    /// Decryptor table.
    pub fn decryptors(&self) -> &DecryptorTable {
        &self.decryptors
    }

    /// Decryptor for `member_id`.
    pub fn decryptor(&self, member_id: MemberId) -> Option<&Decryptor> {
        self.decryptors.get(member_id)
    }

    /// Members with a decryptor, ascending.
    pub fn decryptor_members(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.decryptors.member_ids()
    }

    /// Local encryptor.
    pub fn encryptor(&self) -> &Encryptor {
        &self.encryptor
    }

    /// Underlying engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Local member id, once initialized.
    pub fn local_member(&self) -> Option<MemberId> {
        self.local_member
    }

    /// Group id, once initialized.
    pub fn group_id(&self) -> Option<GroupId> {
        self.group_id
    }

    /// Configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn require_initialized(&self, operation: &'static str) -> Result<(), SessionError> {
        if self.state == SessionState::Initialized {
            Ok(())
        } else {
            Err(SessionError::InvalidState { state: self.state, operation })
        }
    }

    /// The limit is on media payload; encrypted frames carry `overhead` more.
    fn check_frame_size(&self, len: usize, overhead: usize) -> Result<(), SessionError> {
        let max = self.config.max_frame_size.saturating_add(overhead);
        if len > max {
            return Err(SessionError::FrameTooLarge { len, max });
        }
        Ok(())
    }

    fn clear_media_state(&mut self) {
        self.roster.clear();
        self.decryptors.clear();
        self.encryptor.set_key_ratchet(None);
    }

    /// Merge an accepted diff, dropping decryptors of removed members, then
    /// sync once if anyone gained or changed key material.
    fn update_roster(&mut self, diff: RosterDiff) -> ReconcileReport {
        let report = self.roster.apply_diff(diff);

        for member_id in report.removed() {
            if self.decryptors.remove(member_id).is_some() {
                debug!(member_id, "dropped decryptor for removed member");
            }
        }

        info!(
            replaced = report.replaced,
            added = report.added().count(),
            updated = report.updated().count(),
            removed = report.removed().count(),
            "reconciled roster"
        );

        if report.needs_resync() {
            self.rebind_cipher_units();
        }

        report
    }

    fn rebind_cipher_units(&mut self) {
        if self.roster.is_empty() {
            error!("decryptor sync requested with an empty roster");
            return;
        }

        let local_member = self.local_member;
        let remote: Vec<MemberId> =
            self.roster.member_ids().filter(|id| Some(*id) != local_member).collect();

        for member_id in remote {
            let ratchet = self.engine.key_ratchet(member_id);
            if ratchet.is_none() {
                warn!(member_id, "engine has no key ratchet for member");
            }

            let (decryptor, created) = self.decryptors.get_or_create(member_id);
            if created {
                debug!(member_id, "created decryptor");
            }
            decryptor.transition_to_key_ratchet(ratchet);
        }

        if let Some(local_member) = local_member {
            let ratchet = self.engine.key_ratchet(local_member);
            self.encryptor.set_key_ratchet(ratchet);
        }

        debug!(decryptors = self.decryptors.len(), "synced cipher units");
    }
}
