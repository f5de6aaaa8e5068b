//! The fixed-width position index record.

use crate::store::FixedRecord;
use chess_board::PositionSignature;

/// One record of the position index: a position fingerprint and the game
/// it occurred in. 20 bytes on disk, no padding: 16 signature bytes
/// followed by the game id as a little-endian u32.
///
/// Ordering is by signature; the game id participates only as a
/// deterministic tie-breaker between records of the same position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexEntry {
    signature: PositionSignature,
    game_id: u32,
}

impl IndexEntry {
    /// On-disk record size in bytes.
    pub const SIZE: usize = 20;

    #[inline]
    pub const fn new(signature: PositionSignature, game_id: u32) -> Self {
        IndexEntry { signature, game_id }
    }

    #[inline]
    pub const fn signature(&self) -> PositionSignature {
        self.signature
    }

    #[inline]
    pub const fn game_id(&self) -> u32 {
        self.game_id
    }

    /// Serializes the record to its wire form.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[..16].copy_from_slice(self.signature.as_bytes());
        bytes[16..].copy_from_slice(&self.game_id.to_le_bytes());
        bytes
    }
}

impl FixedRecord for IndexEntry {
    const SIZE: usize = IndexEntry::SIZE;

    fn from_record_bytes(bytes: &[u8]) -> Self {
        let signature =
            PositionSignature::from_bytes(bytes[..16].try_into().expect("16-byte slice"));
        let game_id = u32::from_le_bytes(bytes[16..20].try_into().expect("4-byte slice"));
        IndexEntry { signature, game_id }
    }
}
