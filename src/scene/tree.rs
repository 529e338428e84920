use cgmath::Matrix4;

use super::{Node, NodeId, Scene};

/// Unique identifier for a registered transform listener.
pub type ListenerId = u32;

/// Trait for implementing tree traversal operations.
///
/// Implementors can be passed to [`walk_tree`] to perform arbitrary
/// read-only operations on each node during traversal. The visitor receives
/// callbacks when entering and exiting nodes.
pub trait TreeVisitor {
    /// Called when entering a node (before processing its children).
    ///
    /// Returns true to continue traversing children, false to skip the
    /// subtree.
    fn enter_node(&mut self, node: &Node) -> bool;

    /// Called when exiting a node (after processing its children).
    fn exit_node(&mut self, _node: &Node) {}
}

/// Walks the scene tree starting from a given node.
///
/// Children are visited in their stored order, which is
/// update-sequence significant.
pub fn walk_tree<V: TreeVisitor>(scene: &Scene, node_id: NodeId, visitor: &mut V) {
    let node = match scene.get_node(node_id) {
        Some(n) => n,
        None => return,
    };

    let should_visit_children = visitor.enter_node(node);

    if should_visit_children {
        for &child_id in node.children() {
            walk_tree(scene, child_id, visitor);
        }
    }

    visitor.exit_node(node);
}

/// Per-node hooks invoked by the update pass, bracketing the matrix
/// rebuild: `pre_transform` runs after animation blending and before the
/// local matrix is rebuilt, `post_transform` runs once the node's world
/// matrix is current.
pub trait UpdateHooks {
    fn pre_transform(&mut self, _node: &mut Node) {}
    fn post_transform(&mut self, _node: &Node, _world: &Matrix4<f32>) {}
}

/// The default no-op hooks used by [`Scene::update`].
pub struct NoHooks;

impl UpdateHooks for NoHooks {}

/// Observer of one node's transform lifecycle.
///
/// Listeners are registered per node on the scene and notified after an
/// update pass for every node whose world matrix was rebuilt, and
/// synchronously when the node is destroyed. Registration hands back a
/// [`ListenerId`]; deregister with it before the listener's backing state
/// goes away, since the scene keeps the registration until told otherwise.
pub trait TransformListener {
    /// The node's world matrix was rebuilt during an update pass.
    fn transform_changed(&mut self, node: NodeId, world: &Matrix4<f32>);

    /// The node was removed from the scene. The registration is dropped
    /// right after this call.
    fn node_destroyed(&mut self, _node: NodeId) {}
}
