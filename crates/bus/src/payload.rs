use models::{wire, CompositeFilamentRecord, Id, JetDrop, JetId, PayloadType, PulseNumber};

// In-process acknowledgement reply. Appended after the inherited payload
// enumeration (0..=44), which is never renumbered.
const TAG_OK: u32 = 45;

/// A lifeline snapshot shipped inside hot data, with its remaining TTL.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct HotIndex {
    pub object_id: Id,
    pub ttl: u32,
    pub index: Vec<u8>,
}

/// Open requests of one object, shipped inside hot data.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PendingRequests {
    pub object_id: Id,
    pub requests: Vec<Id>,
}

/// One replicated key/value pair of a heavy sync batch.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ReplicaEntry {
    pub id: Id,
    pub bytes: Vec<u8>,
}

/// Bus payloads the ledger core sends or answers.
///
/// Wire form is the 4-byte big-endian payload type followed by the body in
/// the canonical length-prefixed encoding. Field order within each body is
/// part of the wire contract.
#[derive(Clone, PartialEq, Debug)]
pub enum Payload {
    Ok,
    Error {
        text: String,
    },
    /// Ask a previous executor for a span of an object's filament chain.
    GetPendingFilament {
        object_id: Id,
        start_from: PulseNumber,
        read_until: PulseNumber,
    },
    /// Reply to `GetPendingFilament`.
    PendingFilament {
        object_id: Id,
        records: Vec<CompositeFilamentRecord>,
    },
    /// The state package a new jet executor needs to take over.
    HotData {
        drop: JetDrop,
        drop_jet: JetId,
        pulse_number: PulseNumber,
        recent_objects: Vec<HotIndex>,
        pending_requests: Vec<PendingRequests>,
    },
    /// An object has requests open for two pulses or more.
    AbandonedRequestsNotification {
        object_id: Id,
    },
    /// A batch of sealed pulses streamed to the heavy node.
    Replication {
        jet_id: JetId,
        pulse_number: PulseNumber,
        records: Vec<ReplicaEntry>,
        indexes: Vec<ReplicaEntry>,
        drop: Vec<u8>,
    },
}

impl Payload {
    /// Short name for logs and unexpected-reply errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Ok => "Ok",
            Payload::Error { .. } => "Error",
            Payload::GetPendingFilament { .. } => "GetPendingFilament",
            Payload::PendingFilament { .. } => "PendingFilament",
            Payload::HotData { .. } => "HotData",
            Payload::AbandonedRequestsNotification { .. } => "AbandonedRequestsNotification",
            Payload::Replication { .. } => "Replication",
        }
    }

    fn wire_type(&self) -> u32 {
        match self {
            Payload::Ok => TAG_OK,
            Payload::Error { .. } => PayloadType::Error as u32,
            Payload::GetPendingFilament { .. } => PayloadType::GetFilament as u32,
            Payload::PendingFilament { .. } => PayloadType::FilamentSegment as u32,
            Payload::HotData { .. } => PayloadType::HotObjects as u32,
            Payload::AbandonedRequestsNotification { .. } => {
                PayloadType::AbandonedRequestsNotification as u32
            }
            Payload::Replication { .. } => PayloadType::Replication as u32,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        wire::put_u32(&mut buf, self.wire_type());

        match self {
            Payload::Ok => {}
            Payload::Error { text } => wire::put_str(&mut buf, text),
            Payload::GetPendingFilament {
                object_id,
                start_from,
                read_until,
            } => {
                Id::put(&mut buf, object_id);
                wire::put_u32(&mut buf, start_from.0);
                wire::put_u32(&mut buf, read_until.0);
            }
            Payload::PendingFilament { object_id, records } => {
                Id::put(&mut buf, object_id);
                wire::put_u32(&mut buf, records.len() as u32);
                for record in records {
                    wire::put_bytes(&mut buf, &record.encode());
                }
            }
            Payload::HotData {
                drop,
                drop_jet,
                pulse_number,
                recent_objects,
                pending_requests,
            } => {
                wire::put_bytes(&mut buf, &drop.to_vec());
                JetId::put(&mut buf, drop_jet);
                wire::put_u32(&mut buf, pulse_number.0);
                wire::put_u32(&mut buf, recent_objects.len() as u32);
                for hot in recent_objects {
                    Id::put(&mut buf, &hot.object_id);
                    wire::put_u32(&mut buf, hot.ttl);
                    wire::put_bytes(&mut buf, &hot.index);
                }
                wire::put_u32(&mut buf, pending_requests.len() as u32);
                for pending in pending_requests {
                    Id::put(&mut buf, &pending.object_id);
                    wire::put_u32(&mut buf, pending.requests.len() as u32);
                    for id in &pending.requests {
                        Id::put(&mut buf, id);
                    }
                }
            }
            Payload::AbandonedRequestsNotification { object_id } => {
                Id::put(&mut buf, object_id);
            }
            Payload::Replication {
                jet_id,
                pulse_number,
                records,
                indexes,
                drop,
            } => {
                JetId::put(&mut buf, jet_id);
                wire::put_u32(&mut buf, pulse_number.0);
                for entries in [records, indexes] {
                    wire::put_u32(&mut buf, entries.len() as u32);
                    for entry in entries {
                        Id::put(&mut buf, &entry.id);
                        wire::put_bytes(&mut buf, &entry.bytes);
                    }
                }
                wire::put_bytes(&mut buf, drop);
            }
        }
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Payload, wire::Error> {
        let buf = &mut buf;
        let tag = wire::get_u32(buf)?;

        let payload = match tag {
            TAG_OK => Payload::Ok,
            t if t == PayloadType::Error as u32 => Payload::Error {
                text: wire::get_str(buf)?,
            },
            t if t == PayloadType::GetFilament as u32 => Payload::GetPendingFilament {
                object_id: Id::get(buf)?,
                start_from: PulseNumber(wire::get_u32(buf)?),
                read_until: PulseNumber(wire::get_u32(buf)?),
            },
            t if t == PayloadType::FilamentSegment as u32 => {
                let object_id = Id::get(buf)?;
                let records = (0..wire::get_u32(buf)?)
                    .map(|_| CompositeFilamentRecord::decode(&wire::get_bytes(buf)?))
                    .collect::<Result<_, _>>()?;
                Payload::PendingFilament { object_id, records }
            }
            t if t == PayloadType::HotObjects as u32 => {
                let drop =
                    JetDrop::from_slice(&wire::get_bytes(buf)?).map_err(|_| wire::Error::BadMessage)?;
                let drop_jet = JetId::get(buf)?;
                let pulse_number = PulseNumber(wire::get_u32(buf)?);
                let recent_objects = (0..wire::get_u32(buf)?)
                    .map(|_| {
                        Ok(HotIndex {
                            object_id: Id::get(buf)?,
                            ttl: wire::get_u32(buf)?,
                            index: wire::get_bytes(buf)?,
                        })
                    })
                    .collect::<Result<_, wire::Error>>()?;
                let pending_requests = (0..wire::get_u32(buf)?)
                    .map(|_| {
                        Ok(PendingRequests {
                            object_id: Id::get(buf)?,
                            requests: (0..wire::get_u32(buf)?)
                                .map(|_| Id::get(buf))
                                .collect::<Result<_, _>>()?,
                        })
                    })
                    .collect::<Result<_, wire::Error>>()?;
                Payload::HotData {
                    drop,
                    drop_jet,
                    pulse_number,
                    recent_objects,
                    pending_requests,
                }
            }
            t if t == PayloadType::AbandonedRequestsNotification as u32 => {
                Payload::AbandonedRequestsNotification {
                    object_id: Id::get(buf)?,
                }
            }
            t if t == PayloadType::Replication as u32 => {
                let jet_id = JetId::get(buf)?;
                let pulse_number = PulseNumber(wire::get_u32(buf)?);
                let mut lists = [Vec::new(), Vec::new()];
                for list in lists.iter_mut() {
                    for _ in 0..wire::get_u32(buf)? {
                        list.push(ReplicaEntry {
                            id: Id::get(buf)?,
                            bytes: wire::get_bytes(buf)?,
                        });
                    }
                }
                let [records, indexes] = lists;
                Payload::Replication {
                    jet_id,
                    pulse_number,
                    records,
                    indexes,
                    drop: wire::get_bytes(buf)?,
                }
            }
            tag => return Err(wire::Error::UnknownTag(tag)),
        };
        wire::expect_eof(buf)?;
        Ok(payload)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::{Genesis, Material, Virtual, HASH_SIZE};

    fn id(fill: u8) -> Id {
        Id::new(PulseNumber(65537 + fill as u32), [fill; HASH_SIZE])
    }

    fn samples() -> Vec<Payload> {
        let meta = Material::new(
            Virtual::PendingFilament(models::PendingFilament {
                record_id: id(1),
                previous_record: None,
            }),
            JetId::EMPTY,
        );
        let record = Material::new(Virtual::Genesis(Genesis), JetId::EMPTY);

        let mut drop = JetDrop::default();
        drop.set_pulse_number(PulseNumber(65540));
        drop.set_jet(JetId::EMPTY);

        vec![
            Payload::Ok,
            Payload::Error {
                text: "boom".to_string(),
            },
            Payload::GetPendingFilament {
                object_id: id(3),
                start_from: PulseNumber(65540),
                read_until: PulseNumber(65538),
            },
            Payload::PendingFilament {
                object_id: id(3),
                records: vec![CompositeFilamentRecord {
                    meta_id: id(4),
                    meta,
                    record_id: id(1),
                    record,
                }],
            },
            Payload::HotData {
                drop,
                drop_jet: JetId::EMPTY,
                pulse_number: PulseNumber(65541),
                recent_objects: vec![HotIndex {
                    object_id: id(5),
                    ttl: 2,
                    index: vec![1, 2, 3],
                }],
                pending_requests: vec![PendingRequests {
                    object_id: id(5),
                    requests: vec![id(6), id(7)],
                }],
            },
            Payload::AbandonedRequestsNotification { object_id: id(8) },
            Payload::Replication {
                jet_id: JetId::EMPTY.split().0,
                pulse_number: PulseNumber(65542),
                records: vec![ReplicaEntry {
                    id: id(9),
                    bytes: vec![1],
                }],
                indexes: vec![],
                drop: vec![2, 3],
            },
        ]
    }

    #[test]
    fn every_payload_round_trips() {
        for payload in samples() {
            let encoded = payload.encode();
            assert_eq!(Payload::decode(&encoded).unwrap(), payload, "{}", payload.kind());
        }
    }

    #[test]
    fn wire_types_match_the_inherited_numbering() {
        for (payload, tag) in samples().iter().zip([45u32, 2, 19, 22, 29, 36, 34]) {
            assert_eq!(payload.wire_type(), tag, "{}", payload.kind());
        }
    }
}
