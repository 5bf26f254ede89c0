use std::collections::HashSet;

use crate::material::{Material, NodeId};

/// Nodes a change to `start` affects: its transitive inputs, itself and its
/// transitive consumers, in an order where every node follows the members it
/// reads from.
///
/// Each node is visited once per call, so shared ancestors of a diamond are
/// emitted a single time and a cyclic snapshot still terminates.
pub fn chain_order(material: &Material, start: NodeId) -> Vec<NodeId> {
    let mut members: HashSet<NodeId> = HashSet::from([start]);
    let mut stack = vec![start];
    while let Some(n) = stack.pop() {
        for c in material.incoming_connections(n) {
            if members.insert(c.from.node_id) {
                stack.push(c.from.node_id);
            }
        }
    }

    let downstream = crate::graph::downstream_reachable(material, start);
    members.extend(downstream.iter().copied());

    let mut walk = Walk {
        material,
        members: &members,
        visited: HashSet::with_capacity(members.len()),
        order: Vec::with_capacity(members.len()),
    };
    walk.visit(start);
    for n in downstream {
        walk.visit(n);
    }
    walk.order
}

struct Walk<'a> {
    material: &'a Material,
    members: &'a HashSet<NodeId>,
    visited: HashSet<NodeId>,
    order: Vec<NodeId>,
}

impl Walk<'_> {
    fn visit(&mut self, n: NodeId) {
        if !self.visited.insert(n) {
            return;
        }
        let sources: Vec<NodeId> = self
            .material
            .incoming_connections(n)
            .map(|c| c.from.node_id)
            .filter(|id| self.members.contains(id))
            .collect();
        for source in sources {
            self.visit(source);
        }
        self.order.push(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{Node, SocketAddr};

    fn material(edges: &[(NodeId, NodeId, &str)], nodes: &[NodeId]) -> Material {
        let mut m = Material::new("m", [8, 8]);
        for id in nodes {
            m.add_node(Node::new(*id, "t")).unwrap();
        }
        for (from, to, socket) in edges {
            m.connect(SocketAddr::new(*from, "out"), SocketAddr::new(*to, *socket))
                .unwrap();
        }
        m
    }

    #[test]
    fn linear_chain_from_the_middle() {
        let m = material(&[(1, 2, "in"), (2, 3, "in")], &[1, 2, 3]);
        assert_eq!(chain_order(&m, 2), vec![1, 2, 3]);
        assert_eq!(chain_order(&m, 3), vec![1, 2, 3]);
        assert_eq!(chain_order(&m, 1), vec![1, 2, 3]);
    }

    #[test]
    fn diamond_emits_each_node_once_in_dependency_order() {
        //   1 -> 2 -> 4
        //   1 -> 3 -> 4
        let m = material(
            &[(1, 2, "in"), (1, 3, "in"), (2, 4, "a"), (3, 4, "b")],
            &[1, 2, 3, 4],
        );
        let order = chain_order(&m, 1);
        assert_eq!(order.len(), 4);
        let pos = |id| order.iter().position(|n| *n == id).unwrap();
        assert!(pos(2) < pos(4) && pos(3) < pos(4));
    }

    #[test]
    fn siblings_of_upstream_nodes_are_not_members() {
        // 5 feeds 1 and 6; changing 2 must not pull 6 in.
        let m = material(&[(5, 1, "in"), (5, 6, "in"), (1, 2, "in")], &[1, 2, 5, 6]);
        assert_eq!(chain_order(&m, 2), vec![5, 1, 2]);
    }

    #[test]
    fn downstream_consumer_waits_for_its_other_expanded_input() {
        // 1 -> 2 -> 3 and 1 -> 3: node 3 must follow 2.
        let m = material(&[(1, 2, "in"), (2, 3, "a"), (1, 3, "b")], &[1, 2, 3]);
        assert_eq!(chain_order(&m, 1), vec![1, 2, 3]);
    }
}
