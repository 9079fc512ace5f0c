//node_operations.rs
use crate::tuple::NodeId;

/// The three messages a node receives for an input tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeOperation {
    Insert,
    Update,
    Retract,
}

/// Which parent an input tuple arrived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputSide {
    Only,
    Left,
    Right,
}

/// Edge from a parent to one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildLink {
    pub node: NodeId,
    pub side: InputSide,
}
