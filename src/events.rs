use crate::material::{Connection, NodeId};

/// Graph-edit notifications published by the editor after it has mutated a
/// material. `Compositor::handle_event` turns each into scheduling work.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    /// A parameter or the type of a node changed.
    NodeChanged(NodeId),
    /// A node was deleted, along with the connections it took with it.
    NodeRemoved {
        node_id: NodeId,
        connections: Vec<Connection>,
    },
    ConnectionAdded(Connection),
    ConnectionRemoved(Connection),
    /// Output width, height or filter mode changed.
    OutputSettingsChanged,
}
