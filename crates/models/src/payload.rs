/// Wire identifiers of bus payload types.
///
/// The numbering is a cross-node wire contract: values are never reused or
/// reordered, and retired types keep their slot. New types append after the
/// last entry.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[repr(u32)]
pub enum PayloadType {
    Unknown = 0,
    Meta = 1,
    Error = 2,
    Id = 3,
    Ids = 4,
    Jet = 5,
    State = 6,
    GetObject = 7,
    PassState = 8,
    ObjIndex = 9,
    ObjState = 10,
    Index = 11,
    Pass = 12,
    GetCode = 13,
    Code = 14,
    SetCode = 15,
    SetIncomingRequest = 16,
    SetOutgoingRequest = 17,
    SagaCallAcceptNotification = 18,
    GetFilament = 19,
    GetRequest = 20,
    Request = 21,
    FilamentSegment = 22,
    SetResult = 23,
    Activate = 24,
    RequestInfo = 25,
    GotHotConfirmation = 26,
    Deactivate = 27,
    Update = 28,
    HotObjects = 29,
    ResultInfo = 30,
    GetPendings = 31,
    HasPendings = 32,
    PendingsInfo = 33,
    Replication = 34,
    GetJet = 35,
    AbandonedRequestsNotification = 36,
    GetLightInitialState = 37,
    LightInitialState = 38,
    ReturnResults = 39,
    CallMethod = 40,
    ExecutorResults = 41,
    PendingFinished = 42,
    AdditionalCallFromPreviousExecutor = 43,
    StillExecuting = 44,
}

impl PayloadType {
    pub fn from_u32(v: u32) -> Option<PayloadType> {
        use PayloadType::*;

        Some(match v {
            0 => Unknown,
            1 => Meta,
            2 => Error,
            3 => Id,
            4 => Ids,
            5 => Jet,
            6 => State,
            7 => GetObject,
            8 => PassState,
            9 => ObjIndex,
            10 => ObjState,
            11 => Index,
            12 => Pass,
            13 => GetCode,
            14 => Code,
            15 => SetCode,
            16 => SetIncomingRequest,
            17 => SetOutgoingRequest,
            18 => SagaCallAcceptNotification,
            19 => GetFilament,
            20 => GetRequest,
            21 => Request,
            22 => FilamentSegment,
            23 => SetResult,
            24 => Activate,
            25 => RequestInfo,
            26 => GotHotConfirmation,
            27 => Deactivate,
            28 => Update,
            29 => HotObjects,
            30 => ResultInfo,
            31 => GetPendings,
            32 => HasPendings,
            33 => PendingsInfo,
            34 => Replication,
            35 => GetJet,
            36 => AbandonedRequestsNotification,
            37 => GetLightInitialState,
            38 => LightInitialState,
            39 => ReturnResults,
            40 => CallMethod,
            41 => ExecutorResults,
            42 => PendingFinished,
            43 => AdditionalCallFromPreviousExecutor,
            44 => StillExecuting,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod test {
    use super::PayloadType;

    #[test]
    fn numbering_round_trips() {
        for v in 0..=44 {
            let t = PayloadType::from_u32(v).unwrap();
            assert_eq!(t as u32, v);
        }
        assert_eq!(PayloadType::from_u32(45), None);
    }

    #[test]
    fn contract_anchors() {
        // Spot checks of slots that peers depend on.
        assert_eq!(PayloadType::Unknown as u32, 0);
        assert_eq!(PayloadType::Error as u32, 2);
        assert_eq!(PayloadType::GetFilament as u32, 19);
        assert_eq!(PayloadType::FilamentSegment as u32, 22);
        assert_eq!(PayloadType::Replication as u32, 34);
        assert_eq!(PayloadType::AbandonedRequestsNotification as u32, 36);
        assert_eq!(PayloadType::StillExecuting as u32, 44);
    }
}
