use crate::{hash_of, wire, Id, JetId, PulseNumber, Reference};

// Wire tags of the record variants. Part of the persisted format: never
// reused or reordered.
const TAG_GENESIS: u32 = 1;
const TAG_CODE: u32 = 2;
const TAG_REQUEST: u32 = 3;
const TAG_RESULT: u32 = 4;
const TAG_ACTIVATE: u32 = 5;
const TAG_AMEND: u32 = 6;
const TAG_DEACTIVATE: u32 = 7;
const TAG_PENDING_FILAMENT: u32 = 8;

/// The root record of the ledger. Parent of all top-level objects.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Genesis;

/// Stored contract code.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Code {
    pub request: Id,
    pub code: Vec<u8>,
}

/// An incoming call against an object, open until a matching result arrives.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Request {
    pub object: Id,
    pub method: String,
    pub arguments: Vec<u8>,
}

/// The outcome closing a previously registered request.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ResultRecord {
    pub object: Id,
    /// The request this result closes.
    pub request: Id,
    pub payload: Vec<u8>,
}

/// First state of an object.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Activate {
    pub request: Id,
    pub parent: Reference,
    pub memory: Vec<u8>,
}

/// A state amendment superseding `prev_state`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Amend {
    pub request: Id,
    pub prev_state: Id,
    pub memory: Vec<u8>,
}

/// Terminal state of an object.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Deactivate {
    pub request: Id,
    pub prev_state: Id,
}

/// Meta-record of the pending filament chain. Points at one request or
/// result record, and backward at the previous chain entry.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PendingFilament {
    pub record_id: Id,
    pub previous_record: Option<Id>,
}

/// A virtual record: the content-addressed union over which record IDs are
/// computed.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Virtual {
    Genesis(Genesis),
    Code(Code),
    Request(Request),
    Result(ResultRecord),
    Activate(Activate),
    Amend(Amend),
    Deactivate(Deactivate),
    PendingFilament(PendingFilament),
}

impl Virtual {
    /// Canonical byte encoding. `hash_of` over these bytes is the record's
    /// identity, so the encoding is deterministic: fixed field order, fixed
    /// width integers, length-prefixed variable fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);

        match self {
            Virtual::Genesis(Genesis) => {
                wire::put_u32(&mut buf, TAG_GENESIS);
            }
            Virtual::Code(r) => {
                wire::put_u32(&mut buf, TAG_CODE);
                Id::put(&mut buf, &r.request);
                wire::put_bytes(&mut buf, &r.code);
            }
            Virtual::Request(r) => {
                wire::put_u32(&mut buf, TAG_REQUEST);
                Id::put(&mut buf, &r.object);
                wire::put_str(&mut buf, &r.method);
                wire::put_bytes(&mut buf, &r.arguments);
            }
            Virtual::Result(r) => {
                wire::put_u32(&mut buf, TAG_RESULT);
                Id::put(&mut buf, &r.object);
                Id::put(&mut buf, &r.request);
                wire::put_bytes(&mut buf, &r.payload);
            }
            Virtual::Activate(r) => {
                wire::put_u32(&mut buf, TAG_ACTIVATE);
                Id::put(&mut buf, &r.request);
                Id::put(&mut buf, &r.parent.object);
                Id::put(&mut buf, &r.parent.state);
                wire::put_bytes(&mut buf, &r.memory);
            }
            Virtual::Amend(r) => {
                wire::put_u32(&mut buf, TAG_AMEND);
                Id::put(&mut buf, &r.request);
                Id::put(&mut buf, &r.prev_state);
                wire::put_bytes(&mut buf, &r.memory);
            }
            Virtual::Deactivate(r) => {
                wire::put_u32(&mut buf, TAG_DEACTIVATE);
                Id::put(&mut buf, &r.request);
                Id::put(&mut buf, &r.prev_state);
            }
            Virtual::PendingFilament(r) => {
                wire::put_u32(&mut buf, TAG_PENDING_FILAMENT);
                Id::put(&mut buf, &r.record_id);
                Id::put_opt(&mut buf, &r.previous_record);
            }
        }
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Virtual, wire::Error> {
        let buf = &mut buf;
        let rec = match wire::get_u32(buf)? {
            TAG_GENESIS => Virtual::Genesis(Genesis),
            TAG_CODE => Virtual::Code(Code {
                request: Id::get(buf)?,
                code: wire::get_bytes(buf)?,
            }),
            TAG_REQUEST => Virtual::Request(Request {
                object: Id::get(buf)?,
                method: wire::get_str(buf)?,
                arguments: wire::get_bytes(buf)?,
            }),
            TAG_RESULT => Virtual::Result(ResultRecord {
                object: Id::get(buf)?,
                request: Id::get(buf)?,
                payload: wire::get_bytes(buf)?,
            }),
            TAG_ACTIVATE => Virtual::Activate(Activate {
                request: Id::get(buf)?,
                parent: Reference::new(Id::get(buf)?, Id::get(buf)?),
                memory: wire::get_bytes(buf)?,
            }),
            TAG_AMEND => Virtual::Amend(Amend {
                request: Id::get(buf)?,
                prev_state: Id::get(buf)?,
                memory: wire::get_bytes(buf)?,
            }),
            TAG_DEACTIVATE => Virtual::Deactivate(Deactivate {
                request: Id::get(buf)?,
                prev_state: Id::get(buf)?,
            }),
            TAG_PENDING_FILAMENT => Virtual::PendingFilament(PendingFilament {
                record_id: Id::get(buf)?,
                previous_record: Id::get_opt(buf)?,
            }),
            tag => return Err(wire::Error::UnknownTag(tag)),
        };
        wire::expect_eof(buf)?;
        Ok(rec)
    }

    /// The content-addressed ID of this record when created in `pulse`.
    pub fn id(&self, pulse: PulseNumber) -> Id {
        Id::new(pulse, hash_of(&[&self.encode()]))
    }
}

/// The storage envelope around a virtual record: the jet it was stored
/// under, plus the executor's signature when the record crossed nodes.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Material {
    pub record: Virtual,
    pub jet_id: JetId,
    pub signature: Option<Vec<u8>>,
}

impl Material {
    pub fn new(record: Virtual, jet_id: JetId) -> Material {
        Material {
            record,
            jet_id,
            signature: None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(96);
        wire::put_bytes(&mut buf, &self.record.encode());
        JetId::put(&mut buf, &self.jet_id);
        match &self.signature {
            Some(sig) => {
                wire::put_u8(&mut buf, 1);
                wire::put_bytes(&mut buf, sig);
            }
            None => wire::put_u8(&mut buf, 0),
        }
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Material, wire::Error> {
        let buf = &mut buf;
        let record = Virtual::decode(&wire::get_bytes(buf)?)?;
        let jet_id = JetId::get(buf)?;
        let signature = match wire::get_u8(buf)? {
            0 => None,
            _ => Some(wire::get_bytes(buf)?),
        };
        wire::expect_eof(buf)?;

        Ok(Material {
            record,
            jet_id,
            signature,
        })
    }
}

/// One fully resolved filament chain entry: the meta-record plus the request
/// or result it points at, each with its ID. This is the unit shipped by
/// cross-node filament backfill.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CompositeFilamentRecord {
    pub meta_id: Id,
    pub meta: Material,
    pub record_id: Id,
    pub record: Material,
}

impl CompositeFilamentRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        Id::put(&mut buf, &self.meta_id);
        wire::put_bytes(&mut buf, &self.meta.encode());
        Id::put(&mut buf, &self.record_id);
        wire::put_bytes(&mut buf, &self.record.encode());
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<CompositeFilamentRecord, wire::Error> {
        let buf = &mut buf;
        let rec = CompositeFilamentRecord {
            meta_id: Id::get(buf)?,
            meta: Material::decode(&wire::get_bytes(buf)?)?,
            record_id: Id::get(buf)?,
            record: Material::decode(&wire::get_bytes(buf)?)?,
        };
        wire::expect_eof(buf)?;
        Ok(rec)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::HASH_SIZE;

    fn id(pulse: u32, fill: u8) -> Id {
        Id::new(PulseNumber(pulse), [fill; HASH_SIZE])
    }

    fn variants() -> Vec<Virtual> {
        vec![
            Virtual::Genesis(Genesis),
            Virtual::Code(Code {
                request: id(65537, 1),
                code: b"wasm".to_vec(),
            }),
            Virtual::Request(Request {
                object: id(65538, 2),
                method: "transfer".to_string(),
                arguments: vec![1, 2, 3],
            }),
            Virtual::Result(ResultRecord {
                object: id(65538, 2),
                request: id(65538, 3),
                payload: vec![4, 5],
            }),
            Virtual::Activate(Activate {
                request: id(65539, 4),
                parent: Reference::new(id(65537, 0), id(65537, 1)),
                memory: vec![9; 40],
            }),
            Virtual::Amend(Amend {
                request: id(65540, 5),
                prev_state: id(65539, 4),
                memory: vec![],
            }),
            Virtual::Deactivate(Deactivate {
                request: id(65541, 6),
                prev_state: id(65540, 5),
            }),
            Virtual::PendingFilament(PendingFilament {
                record_id: id(65542, 7),
                previous_record: None,
            }),
            Virtual::PendingFilament(PendingFilament {
                record_id: id(65542, 7),
                previous_record: Some(id(65541, 6)),
            }),
        ]
    }

    #[test]
    fn every_variant_round_trips() {
        for rec in variants() {
            let encoded = rec.encode();
            assert_eq!(Virtual::decode(&encoded).unwrap(), rec, "{rec:?}");
        }
    }

    #[test]
    fn id_is_hash_of_canonical_encoding() {
        for rec in variants() {
            let id = rec.id(PulseNumber(70000));
            assert_eq!(id.pulse(), PulseNumber(70000));
            assert_eq!(id.hash(), &crate::hash_of(&[&rec.encode()]));
        }
    }

    #[test]
    fn distinct_content_distinct_hash() {
        let a = Virtual::Request(Request {
            object: id(65538, 2),
            method: "a".to_string(),
            arguments: vec![],
        });
        let b = Virtual::Request(Request {
            object: id(65538, 2),
            method: "b".to_string(),
            arguments: vec![],
        });
        assert_ne!(a.id(PulseNumber(65538)), b.id(PulseNumber(65538)));
    }

    #[test]
    fn material_round_trips_with_and_without_signature() {
        let jet = JetId::new(2, {
            let mut p = [0; crate::PREFIX_SIZE];
            p[0] = 0x40;
            p
        });

        for signature in [None, Some(vec![7; 64])] {
            let material = Material {
                record: Virtual::Genesis(Genesis),
                jet_id: jet,
                signature,
            };
            assert_eq!(Material::decode(&material.encode()).unwrap(), material);
        }
    }

    #[test]
    fn decode_rejects_unknown_tag_and_trailing_bytes() {
        let mut buf = Vec::new();
        crate::wire::put_u32(&mut buf, 99);
        assert_eq!(
            Virtual::decode(&buf),
            Err(crate::wire::Error::UnknownTag(99))
        );

        let mut buf = Virtual::Genesis(Genesis).encode();
        buf.push(0);
        assert_eq!(
            Virtual::decode(&buf),
            Err(crate::wire::Error::TrailingBytes(1))
        );
    }
}
