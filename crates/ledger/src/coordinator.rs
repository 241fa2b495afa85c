use crate::{Error, JetStorage, NodeStorage, PulseStorage};
use models::{hash_of, Id, JetId, NodeRef, NodeRole, PulseNumber};
use std::sync::Arc;

/// Deterministic role resolver: every node derives the same
/// (jet, pulse, role) → node mapping from the pulse's entropy and the frozen
/// roster, with no coordination.
pub struct JetCoordinator {
    me: NodeRef,
    pulses: Arc<PulseStorage>,
    nodes: Arc<NodeStorage>,
    jets: Arc<JetStorage>,
}

impl JetCoordinator {
    pub fn new(
        me: NodeRef,
        pulses: Arc<PulseStorage>,
        nodes: Arc<NodeStorage>,
        jets: Arc<JetStorage>,
    ) -> JetCoordinator {
        JetCoordinator {
            me,
            pulses,
            nodes,
            jets,
        }
    }

    /// The local node's reference.
    pub fn me(&self) -> NodeRef {
        self.me
    }

    /// The light material node executing `jet` during `pn`.
    ///
    /// Candidates are weighed by `hash(entropy || jet || node)` with a
    /// bytewise node-reference tie-break; the lowest weight wins. Fails with
    /// `NoNodes` on an empty roster.
    pub fn light_executor_for_jet(&self, jet: JetId, pn: PulseNumber) -> Result<NodeRef, Error> {
        let entropy = self.pulses.get(pn)?.pulse.entropy;
        let candidates = self.nodes.in_role(pn, NodeRole::LightMaterial)?;

        let winner = candidates
            .into_iter()
            .map(|node| {
                let weight = hash_of(&[&entropy, &jet.to_bytes(), node.reference.as_bytes()]);
                (weight, node.reference)
            })
            .min()
            .expect("in_role returned a non-empty roster");
        Ok(winner.1)
    }

    /// The light node that held `object` while `target_pn` was current: the
    /// object's jet at the target pulse, resolved to its executor. Filament
    /// backfill hops through this to find chain history.
    pub fn node_for_object(
        &self,
        object: Id,
        target_pn: PulseNumber,
    ) -> Result<NodeRef, Error> {
        let jet = self.jets.jet_for(target_pn, object.hash());
        self.light_executor_for_jet(jet, target_pn)
    }

    /// The heavy material node receiving replication during `pn`. The roster
    /// order is deterministic, so every light streams to the same heavy.
    pub fn heavy(&self, pn: PulseNumber) -> Result<NodeRef, Error> {
        let mut heavies = self.nodes.in_role(pn, NodeRole::HeavyMaterial)?;
        heavies.sort_by(|a, b| a.reference.as_bytes().cmp(b.reference.as_bytes()));
        Ok(heavies[0].reference)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::{Node, Pulse, PulseNumber, ENTROPY_SIZE};
    use store::Store;

    const PN: PulseNumber = PulseNumber(65537);

    struct Fixture {
        _dir: tempfile::TempDir,
        pulses: Arc<PulseStorage>,
        nodes: Arc<NodeStorage>,
        jets: Arc<JetStorage>,
    }

    fn fixture(entropy_fill: u8) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path(), 3).unwrap());
        let pulses = Arc::new(PulseStorage::new(store));
        pulses
            .append(Pulse {
                number: PN,
                entropy: [entropy_fill; ENTROPY_SIZE],
                next: PN.next(),
                prev: PN,
                signs: Vec::new(),
            })
            .unwrap();
        Fixture {
            _dir: dir,
            pulses,
            nodes: Arc::new(NodeStorage::new()),
            jets: Arc::new(JetStorage::new()),
        }
    }

    fn coordinator(f: &Fixture, me: u8) -> JetCoordinator {
        JetCoordinator::new(
            NodeRef([me; 32]),
            f.pulses.clone(),
            f.nodes.clone(),
            f.jets.clone(),
        )
    }

    #[test]
    fn executor_selection_is_deterministic_across_nodes() {
        let f = fixture(1);
        f.nodes
            .set(
                PN,
                (1..5)
                    .map(|i| Node::new(NodeRef([i; 32]), NodeRole::LightMaterial))
                    .collect(),
            )
            .unwrap();

        let a = coordinator(&f, 1);
        let b = coordinator(&f, 2);
        for jet in [JetId::EMPTY, JetId::EMPTY.split().0, JetId::EMPTY.split().1] {
            assert_eq!(
                a.light_executor_for_jet(jet, PN).unwrap(),
                b.light_executor_for_jet(jet, PN).unwrap()
            );
        }
    }

    #[test]
    fn empty_roster_fails_with_no_nodes() {
        let f = fixture(1);
        let coord = coordinator(&f, 1);
        assert!(matches!(
            coord.light_executor_for_jet(JetId::EMPTY, PN),
            Err(Error::NoNodes(_))
        ));
        assert!(matches!(coord.heavy(PN), Err(Error::NoNodes(_))));
    }

    #[test]
    fn selection_only_considers_light_material() {
        let f = fixture(2);
        f.nodes
            .set(
                PN,
                vec![
                    Node::new(NodeRef([1; 32]), NodeRole::HeavyMaterial),
                    Node::new(NodeRef([2; 32]), NodeRole::LightMaterial),
                    Node::new(NodeRef([3; 32]), NodeRole::Virtual),
                ],
            )
            .unwrap();

        let coord = coordinator(&f, 2);
        assert_eq!(
            coord.light_executor_for_jet(JetId::EMPTY, PN).unwrap(),
            NodeRef([2; 32])
        );
        assert_eq!(coord.heavy(PN).unwrap(), NodeRef([1; 32]));
    }
}
