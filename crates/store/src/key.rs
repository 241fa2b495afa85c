use models::{Id, PulseNumber, HASH_SIZE};

/// Keyspace partitions of the embedded store. Every key is
/// `scope_byte || payload`; payloads are big-endian so lexicographic key
/// order matches pulse order within a scope.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Scope {
    Lifeline = 1,
    Record = 2,
    JetDrop = 3,
    Pulse = 4,
    System = 5,
    Message = 6,
    Blob = 7,
}

/// Well-known sub-keys of `Scope::System`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum SystemKey {
    Genesis = 1,
    LatestPulse = 2,
}

pub fn prefix_key(scope: Scope, payload: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + payload.len());
    key.push(scope as u8);
    key.extend_from_slice(payload);
    key
}

/// Key of a content-addressed record or lifeline: `scope || pulse || hash`.
pub fn record_key(scope: Scope, id: &Id) -> Vec<u8> {
    prefix_key(scope, &id.to_bytes())
}

/// Key of a pulse entry: `Pulse || pulse`.
pub fn pulse_key(pn: PulseNumber) -> Vec<u8> {
    prefix_key(Scope::Pulse, &pn.to_bytes())
}

/// Key of a persisted bus message: `Message || pulse || hash(bytes)`.
/// The pulse prefix keeps a pulse's messages contiguous and ordered for the
/// drop-sealing scan.
pub fn message_key(pn: PulseNumber, hash: &[u8; HASH_SIZE]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + HASH_SIZE);
    payload.extend_from_slice(&pn.to_bytes());
    payload.extend_from_slice(hash);
    prefix_key(Scope::Message, &payload)
}
