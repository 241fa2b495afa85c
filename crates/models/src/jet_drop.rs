use crate::{JetId, PulseNumber};
use prost::Message;

/// The sealed block for one (jet, pulse): protobuf-compatible and immutable
/// once created. Field numbers are a cross-node wire contract.
///
/// `prev_hash`/`hash` chain drops of the same jet across pulses: `hash` is
/// the fold of the pulse's persisted messages seeded with `prev_hash`, and
/// the next pulse's drop carries it as its own `prev_hash`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JetDrop {
    #[prost(int32, tag = "16")]
    pub polymorph: i32,
    #[prost(bytes = "vec", tag = "20")]
    pub pulse: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "21")]
    pub jet_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(int64, tag = "22")]
    pub split_threshold_exceeded: i64,
    #[prost(bool, tag = "23")]
    pub split: bool,
    #[prost(bytes = "vec", tag = "24")]
    pub prev_hash: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "25")]
    pub hash: ::prost::alloc::vec::Vec<u8>,
}

impl JetDrop {
    pub fn pulse_number(&self) -> PulseNumber {
        let mut b = [0; 4];
        b.copy_from_slice(&self.pulse[..4]);
        PulseNumber::from_bytes(b)
    }

    pub fn set_pulse_number(&mut self, pn: PulseNumber) {
        self.pulse = pn.to_bytes().to_vec();
    }

    pub fn jet(&self) -> JetId {
        let mut b = [0; JetId::SIZE];
        b.copy_from_slice(&self.jet_id[..JetId::SIZE]);
        JetId::from_bytes(b)
    }

    pub fn set_jet(&mut self, jet: JetId) {
        self.jet_id = jet.to_bytes().to_vec();
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    pub fn from_slice(b: &[u8]) -> Result<JetDrop, prost::DecodeError> {
        JetDrop::decode(b)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn encoding_round_trips(
        pn: u32,
        depth: u8,
        threshold: i64,
        split: bool,
        prev_hash: Vec<u8>,
        hash: Vec<u8>,
    ) -> bool {
        let mut drop = JetDrop {
            polymorph: 0,
            split_threshold_exceeded: threshold,
            split,
            prev_hash,
            hash,
            ..Default::default()
        };
        drop.set_pulse_number(PulseNumber(pn));
        drop.set_jet(JetId::new(depth % 64, [depth; crate::PREFIX_SIZE]));

        let bytes = drop.to_vec();
        let decoded = JetDrop::from_slice(&bytes).unwrap();

        // Round-trip is byte identical, not just value equal.
        decoded == drop && decoded.to_vec() == bytes
    }

    #[test]
    fn accessors_round_trip_typed_fields() {
        let mut drop = JetDrop::default();
        drop.set_pulse_number(PulseNumber(65539));
        drop.set_jet(JetId::EMPTY.split().1);

        assert_eq!(drop.pulse_number(), PulseNumber(65539));
        assert_eq!(drop.jet(), JetId::EMPTY.split().1);
    }
}
