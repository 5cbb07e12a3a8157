//! Content digests and trace fingerprints.  blake3 throughout; a digest is
//! the identity of a file's bytes, a fingerprint the identity of an ordered
//! record sequence.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// A content hash of file bytes.  The distinguished [`Digest::MISSING`]
/// value records an observed non-existence; it is never produced by hashing
/// and never serialised as hex (missing observations have their own trace
/// line form).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    pub const MISSING: Digest = Digest([0; 32]);

    pub fn is_missing(&self) -> bool {
        *self == Digest::MISSING
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn of_bytes(bytes: &[u8]) -> Digest {
        Digest(*blake3::hash(bytes).as_bytes())
    }

    pub fn of_reader(reader: &mut impl std::io::Read) -> std::io::Result<Digest> {
        let mut hasher = blake3::Hasher::new();
        std::io::copy(reader, &mut hasher)?;
        Ok(Digest(*hasher.finalize().as_bytes()))
    }

    pub fn of_file(path: &Path) -> std::io::Result<Digest> {
        let mut f = std::fs::File::open(path)?;
        Digest::of_reader(&mut f)
    }

    /// Hash a file, mapping non-existence to [`Digest::MISSING`].
    pub fn of_file_or_missing(path: &Path) -> std::io::Result<Digest> {
        match Digest::of_file(path) {
            Ok(d) => Ok(d),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Digest::MISSING),
            Err(err) => Err(err),
        }
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_missing() {
            write!(f, "<missing>")
        } else {
            write!(f, "{}", self.to_hex())
        }
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({:.8})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hash = blake3::Hash::from_hex(s)?;
        Ok(Digest(*hash.as_bytes()))
    }
}

/// Identifies a trace by its ordered input records.  Doubles as the store
/// filename of a committed trace.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub(crate) fn from_bytes(bytes: [u8; 32]) -> Fingerprint {
        Fingerprint(bytes)
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:.8})", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hash = blake3::Hash::from_hex(s)?;
        Ok(Fingerprint(*hash.as_bytes()))
    }
}
