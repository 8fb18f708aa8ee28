//! # Scene Management Module
//!
//! A small scene graph: nodes in an arena addressed by [`NodeId`], each with
//! a local transform, a visibility flag and optionally a mesh. Group nodes
//! carry transforms for their children, which is how tracked content is
//! anchored to a marker.
//!
//! ## Key Components
//!
//! - [`Scene`] - node arena and mesh storage
//! - [`Node`] - a group or mesh node with its local transform
//! - [`Vertex3D`] - GPU vertex format shared by the renderers

pub mod scene;
pub mod vertex;

// Re-export main types
pub use scene::{Mesh, MeshId, MeshInstance, Node, NodeId, NodeKind, Scene};
pub use vertex::Vertex3D;
