//! Chorus session core
//!
//! Live session state for an end-to-end encrypted group media call: who is in
//! the group, which key each member currently encrypts with, and which cipher
//! unit handles which frame.
//!
//! # Architecture
//!
//! The group key-agreement engine is an external collaborator behind the
//! [`GroupSessionEngine`] trait. [`SessionContext`] feeds it protocol messages
//! and reconciles what comes back (roster diffs, full snapshots, key ratchets)
//! into three collections that must always agree:
//!
//! - the [`RosterStore`], the authoritative member to key-material map
//! - the [`DecryptorTable`], one decryptor per remote member
//! - the local [`Encryptor`]
//!
//! Everything is synchronous and single-owner. Callers sharing a context
//! across threads serialize access with their own lock.
//!
//! # Components
//!
//! - [`context`]: Session lifecycle, protocol event handling, frame dispatch
//! - [`roster`]: Roster store, diffs, reconciliation reports
//! - [`decryptors`]: Member-keyed decryptor table
//! - [`engine`]: Group key-agreement engine contract
//! - [`config`]: Session configuration
//! - [`error`]: Session errors and status codes

pub mod config;
pub mod context;
pub mod decryptors;
pub mod engine;
pub mod error;
pub mod roster;

pub use chorus_crypto::{
    CipherError, Decryptor, Encryptor, KeyRatchet, MediaType, SharedKeyRatchet, StreamId,
};
pub use config::SessionConfig;
pub use context::{CommitStatus, SessionContext, SessionState};
pub use decryptors::DecryptorTable;
pub use engine::{CommitOutcome, EngineError, GroupId, GroupSessionEngine, ProtocolVersion};
pub use error::{SessionError, StatusCode};
pub use roster::{
    KeyMaterial, MemberId, ReconcileReport, RosterChange, RosterDiff, RosterEntry, RosterMap,
    RosterSnapshot, RosterStore,
};
