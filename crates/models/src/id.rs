use crate::{wire, PulseNumber};

/// Size of a record content hash in bytes.
pub const HASH_SIZE: usize = 28;

/// A record identifier: the pulse in which the record was created plus the
/// hash of its virtual content. IDs are content-addressed and unique.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id {
    pulse: PulseNumber,
    hash: [u8; HASH_SIZE],
}

impl Id {
    pub const SIZE: usize = 4 + HASH_SIZE;

    pub fn new(pulse: PulseNumber, hash: [u8; HASH_SIZE]) -> Id {
        Id { pulse, hash }
    }

    pub fn pulse(&self) -> PulseNumber {
        self.pulse
    }

    pub fn hash(&self) -> &[u8; HASH_SIZE] {
        &self.hash
    }

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0; Self::SIZE];
        out[..4].copy_from_slice(&self.pulse.to_bytes());
        out[4..].copy_from_slice(&self.hash);
        out
    }

    pub fn from_bytes(b: [u8; Self::SIZE]) -> Id {
        let mut pulse = [0; 4];
        pulse.copy_from_slice(&b[..4]);
        let mut hash = [0; HASH_SIZE];
        hash.copy_from_slice(&b[4..]);
        Id {
            pulse: PulseNumber::from_bytes(pulse),
            hash,
        }
    }

    pub fn get(buf: &mut &[u8]) -> Result<Id, wire::Error> {
        Ok(Id::from_bytes(wire::get_array::<{ Id::SIZE }>(buf)?))
    }

    pub fn put(buf: &mut Vec<u8>, id: &Id) {
        buf.extend_from_slice(&id.to_bytes());
    }

    pub fn put_opt(buf: &mut Vec<u8>, id: &Option<Id>) {
        match id {
            Some(id) => {
                buf.push(1);
                Id::put(buf, id);
            }
            None => buf.push(0),
        }
    }

    pub fn get_opt(buf: &mut &[u8]) -> Result<Option<Id>, wire::Error> {
        match wire::get_u8(buf)? {
            0 => Ok(None),
            _ => Ok(Some(Id::get(buf)?)),
        }
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.pulse, hex::encode(&self.hash[..4]))
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

/// An extended identifier naming both an object and one of its states.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Reference {
    pub object: Id,
    pub state: Id,
}

impl Reference {
    pub fn new(object: Id, state: Id) -> Reference {
        Reference { object, state }
    }
}
