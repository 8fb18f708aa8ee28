use cgmath::{Matrix4, SquareMatrix};

use super::vertex::Vertex3D;
use crate::gfx::geometry::GeometryData;

/// Handle to a node in a [`Scene`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Handle to mesh data stored in a [`Scene`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(usize);

/// Triangle mesh, immutable once added to the scene
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex3D>,
    pub indices: Vec<u32>,
}

impl From<&GeometryData> for Mesh {
    fn from(geometry: &GeometryData) -> Self {
        let (vertices, indices) = geometry.to_scene_format();
        Self { vertices, indices }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Group,
    Mesh(MeshId),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    transform: Matrix4<f32>,
    visible: bool,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    revision: u64,
}

impl Node {
    fn new(name: &str, kind: NodeKind, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            transform: Matrix4::identity(),
            visible: true,
            parent,
            children: Vec::new(),
            revision: 0,
        }
    }

    /// Local transform relative to the parent
    pub fn transform(&self) -> Matrix4<f32> {
        self.transform
    }

    /// Own visibility flag, ignoring ancestors
    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Number of transform writes since creation
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// A mesh to draw with its accumulated world transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshInstance {
    pub node: NodeId,
    pub mesh: MeshId,
    pub world: Matrix4<f32>,
}

/// Node arena with parent/child links
#[derive(Debug, Clone, Default)]
pub struct Scene {
    nodes: Vec<Node>,
    meshes: Vec<Mesh>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an empty group node
    pub fn add_group(&mut self, name: &str, parent: Option<NodeId>) -> NodeId {
        self.push_node(Node::new(name, NodeKind::Group, parent))
    }

    /// Stores `geometry` and adds a node drawing it
    pub fn add_mesh(&mut self, name: &str, parent: Option<NodeId>, geometry: &GeometryData) -> NodeId {
        let mesh = MeshId(self.meshes.len());
        self.meshes.push(Mesh::from(geometry));
        self.push_node(Node::new(name, NodeKind::Mesh(mesh), parent))
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(p.0)) {
            parent.children.push(id);
        }
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn mesh(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Overwrites the local transform of a node
    pub fn set_transform(&mut self, id: NodeId, transform: Matrix4<f32>) -> bool {
        match self.nodes.get_mut(id.0) {
            Some(node) => {
                node.transform = transform;
                node.revision += 1;
                true
            }
            None => false,
        }
    }

    pub fn set_visible(&mut self, id: NodeId, visible: bool) -> bool {
        match self.nodes.get_mut(id.0) {
            Some(node) => {
                node.visible = visible;
                true
            }
            None => false,
        }
    }

    /// Whether the node and all of its ancestors are visible
    pub fn is_visible(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current.and_then(|id| self.node(id)) {
            if !node.visible {
                return false;
            }
            current = node.parent;
        }
        current.is_none()
    }

    /// Transform from the node's local space to scene space
    pub fn world_transform(&self, id: NodeId) -> Option<Matrix4<f32>> {
        let mut node = self.node(id)?;
        let mut world = node.transform;
        while let Some(parent) = node.parent {
            node = self.node(parent)?;
            world = node.transform * world;
        }
        Some(world)
    }

    /// Every mesh node that would be drawn, with its world transform
    pub fn visible_meshes(&self) -> Vec<MeshInstance> {
        let mut out = Vec::new();
        let roots = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(i, _)| NodeId(i));
        for root in roots {
            self.collect_visible(root, Matrix4::identity(), &mut out);
        }
        out
    }

    fn collect_visible(&self, id: NodeId, parent_world: Matrix4<f32>, out: &mut Vec<MeshInstance>) {
        let Some(node) = self.node(id) else {
            return;
        };
        if !node.visible {
            return;
        }

        let world = parent_world * node.transform;
        if let NodeKind::Mesh(mesh) = node.kind {
            out.push(MeshInstance {
                node: id,
                mesh,
                world,
            });
        }
        for &child in &node.children {
            self.collect_visible(child, world, out);
        }
    }
}
