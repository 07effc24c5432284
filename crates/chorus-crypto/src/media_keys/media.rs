//! Media kinds carried by encrypted frames.

/// Kind of media a frame carries.
///
/// Bound into every frame as associated data, so an audio frame can never be
/// replayed as video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MediaType {
    /// Opus audio
    #[default]
    Audio,
    /// Video payloads
    Video,
}

impl MediaType {
    /// Associated-data byte for this media kind.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Audio => 0,
            Self::Video => 1,
        }
    }
}
