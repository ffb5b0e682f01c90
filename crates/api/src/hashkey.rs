//! The hash key type used to index resources on a hashring.

/// The CRC-64 polynomial shared with existing persisted hashrings.
/// Changing it would silently re-home every stored resource, so treat it
/// as part of the persistence format.
const CRC64_POLY: u64 = 0x42F0E1EBA9EA3693;

const fn crc64_table() -> [u64; 256] {
    let mut table = [0_u64; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u64;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 == 1 {
                (crc >> 1) ^ CRC64_POLY
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC64_TABLE: [u64; 256] = crc64_table();

/// An index in a hashring.
///
/// A resource's unique id and object id are both hash keys, derived from
/// the resource's canonical one-line serialization.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct Hashkey(pub u64);

impl Hashkey {
    /// Derive the hash key for the given identity string.
    pub fn compute(id: &str) -> Self {
        let mut crc = !0_u64;
        for b in id.as_bytes() {
            crc = CRC64_TABLE[((crc ^ *b as u64) & 0xff) as usize]
                ^ (crc >> 8);
        }
        Self(!crc)
    }
}

impl From<u64> for Hashkey {
    fn from(k: u64) -> Self {
        Self(k)
    }
}

impl std::fmt::Display for Hashkey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl std::fmt::Debug for Hashkey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hashkey({:016x})", self.0)
    }
}
