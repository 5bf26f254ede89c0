use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{Result, bail};

use crate::material::{Material, NodeId};

/// Kahn topological order over the whole material. Ties keep node declaration order.
pub fn topo_sort(material: &Material) -> Result<Vec<NodeId>> {
    let mut indeg: HashMap<NodeId, usize> = material.nodes.iter().map(|n| (n.id, 0usize)).collect();

    let mut outgoing: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for c in &material.connections {
        if !indeg.contains_key(&c.from.node_id) || !indeg.contains_key(&c.to.node_id) {
            bail!(
                "connection references missing node: {} -> {}",
                c.from,
                c.to
            );
        }
        if let Some(d) = indeg.get_mut(&c.to.node_id) {
            *d += 1;
        }
        outgoing.entry(c.from.node_id).or_default().push(c.to.node_id);
    }

    let mut q: VecDeque<NodeId> = material
        .nodes
        .iter()
        .map(|n| n.id)
        .filter(|id| indeg.get(id) == Some(&0))
        .collect();
    let mut order: Vec<NodeId> = Vec::with_capacity(material.nodes.len());

    while let Some(n) = q.pop_front() {
        order.push(n);
        if let Some(nexts) = outgoing.get(&n) {
            for m in nexts {
                if let Some(entry) = indeg.get_mut(m) {
                    *entry -= 1;
                    if *entry == 0 {
                        q.push_back(*m);
                    }
                }
            }
        }
    }

    if order.len() != material.nodes.len() {
        bail!("cycle detected in material '{}' (cannot topologically sort)", material.id);
    }
    Ok(order)
}

/// Every node that transitively consumes an output of `start` (excluding `start`).
pub fn downstream_reachable(material: &Material, start: NodeId) -> Vec<NodeId> {
    let mut visited: HashSet<NodeId> = HashSet::from([start]);
    let mut out = Vec::new();
    let mut stack: Vec<NodeId> = vec![start];
    while let Some(n) = stack.pop() {
        for c in material.outgoing_connections(n) {
            if visited.insert(c.to.node_id) {
                out.push(c.to.node_id);
                stack.push(c.to.node_id);
            }
        }
    }
    out
}

/// Whether adding `from -> to` would close a cycle.
pub fn creates_cycle(material: &Material, from: NodeId, to: NodeId) -> bool {
    from == to || downstream_reachable(material, to).contains(&from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{Node, SocketAddr};

    #[test]
    fn topo_sort_orders_diamond() {
        let mut m = Material::new("d", [4, 4]);
        for id in [4, 3, 2, 1] {
            m.add_node(Node::new(id, "t")).unwrap();
        }
        m.connect(SocketAddr::new(1, "out"), SocketAddr::new(2, "in")).unwrap();
        m.connect(SocketAddr::new(1, "out"), SocketAddr::new(3, "in")).unwrap();
        m.connect(SocketAddr::new(2, "out"), SocketAddr::new(4, "a")).unwrap();
        m.connect(SocketAddr::new(3, "out"), SocketAddr::new(4, "b")).unwrap();

        let order = topo_sort(&m).unwrap();
        let pos = |id| order.iter().position(|n| *n == id).unwrap();
        assert!(pos(1) < pos(2) && pos(1) < pos(3));
        assert!(pos(2) < pos(4) && pos(3) < pos(4));
        assert_eq!(downstream_reachable(&m, 2), vec![4]);
    }
}
