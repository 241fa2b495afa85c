use crate::wire;

/// Size of a pulse entropy blob in bytes.
pub const ENTROPY_SIZE: usize = 64;

/// Deterministic randomness seed carried by every pulse.
pub type Entropy = [u8; ENTROPY_SIZE];

/// Monotonically increasing logical time quantum identifier.
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, serde::Serialize, serde::Deserialize,
)]
pub struct PulseNumber(pub u32);

impl PulseNumber {
    /// The first valid pulse number. Numbers below it are reserved for
    /// special addressing (jet IDs, genesis).
    pub const GENESIS: PulseNumber = PulseNumber(65537);

    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(b: [u8; 4]) -> Self {
        PulseNumber(u32::from_be_bytes(b))
    }

    pub fn next(self) -> Self {
        PulseNumber(self.0 + 1)
    }
}

impl std::fmt::Display for PulseNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Debug for PulseNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A validated pulsar envelope. The transport layer authenticates `signs`
/// before the pulse reaches this repository; the core trusts the envelope.
#[derive(Clone, PartialEq, Debug)]
pub struct Pulse {
    pub number: PulseNumber,
    pub entropy: Entropy,
    /// Pulse number the pulsar predicts will follow this one.
    pub next: PulseNumber,
    pub prev: PulseNumber,
    pub signs: Vec<Vec<u8>>,
}

impl Pulse {
    pub fn genesis() -> Pulse {
        Pulse {
            number: PulseNumber::GENESIS,
            entropy: [0; ENTROPY_SIZE],
            next: PulseNumber::GENESIS.next(),
            prev: PulseNumber::GENESIS,
            signs: Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ENTROPY_SIZE + 16);
        wire::put_u32(&mut buf, self.number.0);
        buf.extend_from_slice(&self.entropy);
        wire::put_u32(&mut buf, self.next.0);
        wire::put_u32(&mut buf, self.prev.0);
        wire::put_u32(&mut buf, self.signs.len() as u32);
        for sign in &self.signs {
            wire::put_bytes(&mut buf, sign);
        }
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Pulse, wire::Error> {
        let buf = &mut buf;
        let number = PulseNumber(wire::get_u32(buf)?);
        let entropy = wire::get_array::<ENTROPY_SIZE>(buf)?;
        let next = PulseNumber(wire::get_u32(buf)?);
        let prev = PulseNumber(wire::get_u32(buf)?);
        let signs = (0..wire::get_u32(buf)?)
            .map(|_| wire::get_bytes(buf))
            .collect::<Result<_, _>>()?;
        wire::expect_eof(buf)?;

        Ok(Pulse {
            number,
            entropy,
            next,
            prev,
            signs,
        })
    }
}
