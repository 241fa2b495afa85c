/// Opaque key identifying a node in the roster.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeRef(pub [u8; 32]);

impl NodeRef {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..4]))
    }
}

impl std::fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

/// Static role a node fulfils for the duration of its membership.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum NodeRole {
    /// Contract execution node; stores nothing.
    Virtual,
    /// Stores the active pulse window and executes jets.
    LightMaterial,
    /// Long-term archive receiving replicated pulses.
    HeavyMaterial,
}

/// One roster entry: a node reference together with its role.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Node {
    pub reference: NodeRef,
    pub role: NodeRole,
}

impl Node {
    pub fn new(reference: NodeRef, role: NodeRole) -> Node {
        Node { reference, role }
    }
}
