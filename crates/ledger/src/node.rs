use crate::Error;
use models::{Node, NodeRole, PulseNumber};
use std::collections::HashMap;
use std::sync::Mutex;

/// Per-pulse roster snapshots. A roster is written once when its pulse is
/// swapped in and is frozen from then on.
#[derive(Default)]
pub struct NodeStorage {
    rosters: Mutex<HashMap<PulseNumber, Vec<Node>>>,
}

impl NodeStorage {
    pub fn new() -> NodeStorage {
        NodeStorage::default()
    }

    /// Snapshot the roster for `pn`. Re-writing an identical roster is a
    /// no-op; a different one fails with `Override`.
    pub fn set(&self, pn: PulseNumber, nodes: Vec<Node>) -> Result<(), Error> {
        let mut rosters = self.rosters.lock().unwrap();
        match rosters.get(&pn) {
            Some(existing) if *existing == nodes => Ok(()),
            Some(_) => Err(Error::Override),
            None => {
                rosters.insert(pn, nodes);
                Ok(())
            }
        }
    }

    /// The full roster at `pn`; empty when the pulse was never snapshotted.
    pub fn all(&self, pn: PulseNumber) -> Vec<Node> {
        let rosters = self.rosters.lock().unwrap();
        rosters.get(&pn).cloned().unwrap_or_default()
    }

    /// Roster members in `role`, or `NoNodes` when there are none.
    pub fn in_role(&self, pn: PulseNumber, role: NodeRole) -> Result<Vec<Node>, Error> {
        let nodes: Vec<Node> = self.all(pn).into_iter().filter(|n| n.role == role).collect();
        if nodes.is_empty() {
            return Err(Error::NoNodes(pn));
        }
        Ok(nodes)
    }

    pub fn delete(&self, pn: PulseNumber) {
        self.rosters.lock().unwrap().remove(&pn);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::NodeRef;

    fn node(fill: u8, role: NodeRole) -> Node {
        Node::new(NodeRef([fill; 32]), role)
    }

    const PN: PulseNumber = PulseNumber(65537);

    #[test]
    fn roster_is_write_once() {
        let nodes = NodeStorage::new();
        let roster = vec![node(1, NodeRole::LightMaterial)];

        nodes.set(PN, roster.clone()).unwrap();
        nodes.set(PN, roster.clone()).unwrap(); // Idempotent.
        assert!(matches!(
            nodes.set(PN, vec![node(2, NodeRole::Virtual)]),
            Err(Error::Override)
        ));
        assert_eq!(nodes.all(PN), roster);
    }

    #[test]
    fn in_role_filters_and_rejects_empty() {
        let nodes = NodeStorage::new();
        nodes
            .set(
                PN,
                vec![
                    node(1, NodeRole::LightMaterial),
                    node(2, NodeRole::HeavyMaterial),
                    node(3, NodeRole::LightMaterial),
                ],
            )
            .unwrap();

        let lights = nodes.in_role(PN, NodeRole::LightMaterial).unwrap();
        assert_eq!(lights.len(), 2);

        assert!(matches!(
            nodes.in_role(PN, NodeRole::Virtual),
            Err(Error::NoNodes(_))
        ));
        assert!(matches!(
            nodes.in_role(PulseNumber(70000), NodeRole::LightMaterial),
            Err(Error::NoNodes(_))
        ));
    }

    #[test]
    fn unknown_pulse_has_an_empty_roster() {
        let nodes = NodeStorage::new();
        assert!(nodes.all(PN).is_empty());
    }
}
