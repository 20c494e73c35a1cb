use reef_core::ids::{JobId, NodeId};
use tracing::debug;

/// Snapshot of one node's worker table for a scheduling decision.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub name: String,
    /// One entry per worker; `Some` means the slot is busy with that job.
    pub worker_state: Vec<Option<JobId>>,
}

impl NodeSnapshot {
    pub fn free_workers(&self) -> usize {
        self.worker_state.iter().filter(|slot| slot.is_none()).count()
    }

    fn lowest_free_slot(&self) -> Option<u16> {
        self.worker_state
            .iter()
            .position(|slot| slot.is_none())
            .map(|idx| idx as u16)
    }
}

/// Winning node and the worker slot the job should start on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Election {
    pub node_id: NodeId,
    pub worker_index: u16,
}

/// Percentage of free workers, in [0, 100]. Blacklisted nodes score zero.
pub fn suitability_score(node: &NodeSnapshot, blacklist: &[String]) -> u8 {
    if blacklist.iter().any(|name| *name == node.name) {
        return 0;
    }

    let total = node.worker_state.len();
    if total == 0 {
        return 0;
    }

    let free = node.free_workers();
    ((free as f32 / total as f32) * 100.0) as u8
}

/// Elects the node to run the next job: each node is scored by its share of
/// free workers and the highest score wins. A node with no free worker is
/// ineligible regardless of score. Ties break on the lexicographically
/// smallest node id, which makes the election deterministic.
pub struct Elector {
    blacklist: Vec<String>,
}

impl Elector {
    pub fn new(blacklist: Vec<String>) -> Self {
        Self { blacklist }
    }

    pub fn elect(&self, nodes: &[NodeSnapshot]) -> Option<Election> {
        let winner = nodes
            .iter()
            .filter(|node| node.free_workers() > 0)
            .map(|node| (node, suitability_score(node, &self.blacklist)))
            .filter(|(_, score)| *score > 0)
            .max_by(|(a, score_a), (b, score_b)| {
                // Highest score first; among equals the smaller id wins.
                score_a.cmp(score_b).then_with(|| b.id.cmp(&a.id))
            })?;

        let (node, score) = winner;
        let worker_index = node.lowest_free_slot()?;

        debug!(
            node = %node.id,
            score,
            worker_index,
            "elected node for next job"
        );

        Some(Election {
            node_id: node.id,
            worker_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(ip: &str, name: &str, state: Vec<Option<JobId>>) -> NodeSnapshot {
        NodeSnapshot {
            id: NodeId::derive(ip, name),
            name: name.to_string(),
            worker_state: state,
        }
    }

    fn free(n: usize) -> Vec<Option<JobId>> {
        vec![None; n]
    }

    #[test]
    fn score_is_percent_free() {
        let full = node("10.0.0.1", "a", free(4));
        assert_eq!(suitability_score(&full, &[]), 100);

        let half = node("10.0.0.1", "a", vec![Some("j".into()), None]);
        assert_eq!(suitability_score(&half, &[]), 50);

        let busy = node("10.0.0.1", "a", vec![Some("j".into())]);
        assert_eq!(suitability_score(&busy, &[]), 0);
    }

    #[test]
    fn blacklisted_nodes_score_zero() {
        let n = node("10.0.0.1", "banned", free(4));
        assert_eq!(suitability_score(&n, &["banned".to_string()]), 0);

        let elector = Elector::new(vec!["banned".to_string()]);
        assert!(elector.elect(&[n]).is_none());
    }

    #[test]
    fn elects_highest_score() {
        let mostly_busy = node(
            "10.0.0.1",
            "a",
            vec![Some("j1".into()), Some("j2".into()), Some("j3".into()), None],
        );
        let idle = node("10.0.0.2", "b", free(2));

        let elector = Elector::new(Vec::new());
        let election = elector.elect(&[mostly_busy, idle.clone()]).unwrap();
        assert_eq!(election.node_id, idle.id);
        assert_eq!(election.worker_index, 0);
    }

    #[test]
    fn tie_breaks_on_lowest_node_id() {
        let a = node("10.0.0.1", "a", free(4));
        let b = node("10.0.0.2", "b", free(2));
        let expected = a.id.min(b.id);

        let elector = Elector::new(Vec::new());
        // Both score 100; the order of the slice must not matter.
        let first = elector.elect(&[a.clone(), b.clone()]).unwrap();
        let second = elector.elect(&[b, a]).unwrap();
        assert_eq!(first.node_id, expected);
        assert_eq!(second.node_id, expected);
    }

    #[test]
    fn no_election_without_free_workers() {
        let busy = node("10.0.0.1", "a", vec![Some("j1".into()), Some("j2".into())]);
        let elector = Elector::new(Vec::new());
        assert!(elector.elect(&[busy]).is_none());
        assert!(elector.elect(&[]).is_none());
    }

    #[test]
    fn returns_lowest_free_slot() {
        let n = node(
            "10.0.0.1",
            "a",
            vec![Some("j1".into()), None, Some("j2".into()), None],
        );
        let elector = Elector::new(Vec::new());
        let election = elector.elect(&[n]).unwrap();
        assert_eq!(election.worker_index, 1);
    }
}
