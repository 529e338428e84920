mod animation;
mod node;
mod rotator;
mod tree;

#[cfg(test)]
mod scene_tests;

use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use cgmath::{Matrix4, Point3, Quaternion, SquareMatrix, Transform, Vector3};

// Public API exports
pub use animation::{
    blend_states, AnimationFrame, AnimationSampler, AnimationState, Interpolation, KeyframeTrack,
    TrackError, TrackId,
};
pub use node::{Node, NodeId, Visibility};
pub use rotator::{Rotator, TargettingConstraint, TrackingMode};
pub use tree::{walk_tree, ListenerId, NoHooks, TransformListener, TreeVisitor, UpdateHooks};

use crate::common::Aabb;

/// Initial transform properties for a node created through the deferred
/// attach queue.
#[derive(Debug, Clone)]
pub struct NodeSeed {
    pub name: Option<String>,
    pub location: Vector3<f32>,
    pub rotation: Quaternion<f32>,
    pub scale: Vector3<f32>,
}

impl Default for NodeSeed {
    fn default() -> Self {
        Self {
            name: None,
            location: Vector3::new(0.0, 0.0, 0.0),
            rotation: Quaternion::new(1.0, 0.0, 0.0, 0.0),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }
}

/// A queued attach request produced by an [`AttachQueue`].
struct PendingAttach {
    parent: Option<NodeId>,
    seed: NodeSeed,
}

/// Cloneable, thread-safe handle for attaching nodes from outside the
/// update thread.
///
/// Requests are queued and applied at the start of the next update pass;
/// the enqueuing thread must not assume the node exists until then.
#[derive(Clone)]
pub struct AttachQueue {
    tx: Sender<PendingAttach>,
}

impl AttachQueue {
    /// Queues a node for attachment under `parent` (or as a root when
    /// `None`). Silently drops the request if the scene no longer exists.
    pub fn enqueue(&self, parent: Option<NodeId>, seed: NodeSeed) {
        if self.tx.send(PendingAttach { parent, seed }).is_err() {
            log::warn!("deferred attach dropped: scene no longer exists");
        }
    }
}

/// The scene container owning the node tree, transform caches, animation
/// states, and listener registrations.
///
/// All mutation and the per-frame [`Scene::update`] pass run on a single
/// thread; the only cross-thread entry point is the [`AttachQueue`].
///
/// Dirty propagation is eager but short-circuited: marking a node dirty
/// walks its descendants once and stops at any node that is already dirty.
/// Rebuilding is lazy per node: a world matrix is recomputed only when
/// queried (rebuilding the root-to-node chain) or when the update pass
/// reaches the node.
pub struct Scene {
    pub nodes: HashMap<NodeId, Node>,
    pub root_nodes: Vec<NodeId>,

    next_node_id: NodeId,
    next_listener_id: ListenerId,
    listeners: HashMap<ListenerId, (NodeId, Box<dyn TransformListener>)>,

    pending_tx: Sender<PendingAttach>,
    pending_rx: Receiver<PendingAttach>,
}

impl Scene {
    /// Creates a new empty scene.
    pub fn new() -> Self {
        let (pending_tx, pending_rx) = channel();
        Self {
            nodes: HashMap::new(),
            root_nodes: Vec::new(),
            next_node_id: 0,
            next_listener_id: 0,
            listeners: HashMap::new(),
            pending_tx,
            pending_rx,
        }
    }

    /// Removes all nodes and listeners and resets the id counters.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root_nodes.clear();
        self.listeners.clear();
        self.next_node_id = 0;
        self.next_listener_id = 0;

        // Drop any attach requests queued against the old tree
        while self.pending_rx.try_recv().is_ok() {}
    }

    // ========== Node API ==========

    /// Gets a reference to a node by ID.
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Gets a mutable reference to a node by ID.
    pub fn get_node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Returns a slice of root node IDs.
    pub fn root_nodes(&self) -> &[NodeId] {
        &self.root_nodes
    }

    /// Adds a new node to the scene tree.
    ///
    /// # Errors
    /// Returns an error if `parent` is `Some` but the specified node doesn't
    /// exist.
    pub fn add_node(
        &mut self,
        parent: Option<NodeId>,
        name: Option<String>,
        location: Vector3<f32>,
        rotation: Quaternion<f32>,
        scale: Vector3<f32>,
    ) -> anyhow::Result<NodeId> {
        if let Some(parent_id) = parent {
            if !self.nodes.contains_key(&parent_id) {
                anyhow::bail!("Parent node with ID {} not found in scene", parent_id);
            }
        }

        let id = self.next_node_id;
        self.next_node_id += 1;

        let mut node = Node::new(id, name, location, rotation, scale);

        if let Some(parent_id) = parent {
            node.set_parent(Some(parent_id));
            // Safe to unwrap since we validated parent exists above
            self.nodes.get_mut(&parent_id).unwrap().add_child(id);
            self.invalidate_ancestor_bounds(parent_id);
        } else {
            self.root_nodes.push(id);
        }

        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Adds a node with default transform (identity).
    pub fn add_default_node(
        &mut self,
        parent: Option<NodeId>,
        name: Option<String>,
    ) -> anyhow::Result<NodeId> {
        self.add_node(
            parent,
            name,
            Vector3::new(0.0, 0.0, 0.0),
            Quaternion::new(1.0, 0.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 1.0),
        )
    }

    /// Removes a node and all its children from the scene tree.
    ///
    /// Cleans up parent/child edges, invalidates ancestor bounds, clears
    /// tracking references held by surviving nodes to any removed node, and
    /// notifies (then drops) listener registrations for the removed nodes.
    pub fn remove_node(&mut self, node_id: NodeId) {
        let parent = self.nodes.get(&node_id).and_then(|node| node.parent());

        let mut removed = Vec::new();
        self.remove_node_recursive(node_id, &mut removed);
        if removed.is_empty() {
            return;
        }

        if let Some(parent_id) = parent {
            self.invalidate_ancestor_bounds(parent_id);
        }

        // A destroyed target must never leave a stale reference behind:
        // revert survivors that tracked any removed node to NotTracking
        let orphaned_trackers: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|node| match node.rotator().tracking_mode() {
                TrackingMode::TargetNode(target) => removed.contains(&target),
                _ => false,
            })
            .map(|node| node.id)
            .collect();
        for tracker_id in orphaned_trackers {
            if let Some(node) = self.nodes.get_mut(&tracker_id) {
                let was_dirty = node.transform_dirty();
                node.with_rotator(|rotator| rotator.clear_target());
                if !was_dirty {
                    self.mark_children_transform_dirty(tracker_id);
                }
            }
        }

        self.listeners.retain(|_, (registered_node, listener)| {
            if removed.contains(registered_node) {
                listener.node_destroyed(*registered_node);
                false
            } else {
                true
            }
        });
    }

    /// Recursive helper for removing a node and all its children.
    fn remove_node_recursive(&mut self, node_id: NodeId, removed: &mut Vec<NodeId>) {
        let Some(node) = self.nodes.get(&node_id) else {
            return;
        };

        let parent = node.parent();
        let children: Vec<NodeId> = node.children().to_vec();

        for child_id in children {
            self.remove_node_recursive(child_id, removed);
        }

        if let Some(parent_id) = parent {
            if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                parent_node.remove_child(node_id);
            }
        } else {
            self.root_nodes.retain(|&id| id != node_id);
        }

        self.nodes.remove(&node_id);
        removed.push(node_id);
    }

    /// Moves a node (with its subtree) under a new parent, or to the root
    /// set when `new_parent` is `None`.
    ///
    /// # Errors
    /// Returns an error if the node or parent doesn't exist, or if the move
    /// would create a cycle (parenting a node under its own descendant).
    pub fn reparent_node(
        &mut self,
        node_id: NodeId,
        new_parent: Option<NodeId>,
    ) -> anyhow::Result<()> {
        if !self.nodes.contains_key(&node_id) {
            anyhow::bail!("Node with ID {} not found in scene", node_id);
        }
        if let Some(parent_id) = new_parent {
            if !self.nodes.contains_key(&parent_id) {
                anyhow::bail!("Parent node with ID {} not found in scene", parent_id);
            }
            if parent_id == node_id || self.is_descendant_of(parent_id, node_id) {
                anyhow::bail!(
                    "Cannot parent node {} under {}: would create a cycle",
                    node_id,
                    parent_id
                );
            }
        }

        // Detach from the current parent or the root set
        let old_parent = self.nodes.get(&node_id).and_then(|node| node.parent());
        match old_parent {
            Some(old_id) => {
                if let Some(old_node) = self.nodes.get_mut(&old_id) {
                    old_node.remove_child(node_id);
                }
                self.invalidate_ancestor_bounds(old_id);
            }
            None => self.root_nodes.retain(|&id| id != node_id),
        }

        // Attach to the new parent
        match new_parent {
            Some(parent_id) => {
                self.nodes.get_mut(&parent_id).unwrap().add_child(node_id);
                self.invalidate_ancestor_bounds(parent_id);
            }
            None => self.root_nodes.push(node_id),
        }

        let node = self.nodes.get_mut(&node_id).unwrap();
        let was_dirty = node.transform_dirty();
        node.set_parent(new_parent);
        if !was_dirty {
            self.mark_children_transform_dirty(node_id);
        }

        Ok(())
    }

    /// True if `node_id` is a (transitive) descendant of `ancestor_id`.
    fn is_descendant_of(&self, node_id: NodeId, ancestor_id: NodeId) -> bool {
        let mut current = self.nodes.get(&node_id).and_then(|node| node.parent());
        while let Some(id) = current {
            if id == ancestor_id {
                return true;
            }
            current = self.nodes.get(&id).and_then(|node| node.parent());
        }
        false
    }

    /// Deep-copies the subtree rooted at `source` under `parent` (or as a
    /// new root), assigning fresh ids throughout.
    ///
    /// Cloned animation states share their content sources but carry
    /// independent playback state; caches start empty.
    ///
    /// # Errors
    /// Returns an error if `source` doesn't exist, or if `parent` is the
    /// source or inside the source subtree.
    pub fn clone_subtree(
        &mut self,
        source: NodeId,
        parent: Option<NodeId>,
    ) -> anyhow::Result<NodeId> {
        if !self.nodes.contains_key(&source) {
            anyhow::bail!("Node with ID {} not found in scene", source);
        }
        if let Some(parent_id) = parent {
            if !self.nodes.contains_key(&parent_id) {
                anyhow::bail!("Parent node with ID {} not found in scene", parent_id);
            }
            if parent_id == source || self.is_descendant_of(parent_id, source) {
                anyhow::bail!("Cannot clone node {} into its own subtree", source);
            }
        }

        let copy = self.clone_subtree_recursive(source, parent);
        if let Some(parent_id) = parent {
            self.invalidate_ancestor_bounds(parent_id);
        }
        Ok(copy)
    }

    fn clone_subtree_recursive(&mut self, source: NodeId, parent: Option<NodeId>) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;

        let (mut copy, children) = {
            // Presence was validated by the caller
            let source_node = self.nodes.get(&source).unwrap();
            (source_node.duplicate(id), source_node.children().to_vec())
        };

        copy.set_parent(parent);
        self.nodes.insert(id, copy);

        match parent {
            Some(parent_id) => {
                self.nodes.get_mut(&parent_id).unwrap().add_child(id);
            }
            None => self.root_nodes.push(id),
        }

        for child in children {
            self.clone_subtree_recursive(child, Some(id));
        }

        id
    }

    // ========== Transform Property API ==========
    //
    // These setters write the property and cascade the dirty flag to the
    // node's descendants. Writing to a missing node is a precondition
    // violation: fatal in debug builds, a logged no-op in release builds.

    pub fn set_node_location(&mut self, node_id: NodeId, location: Vector3<f32>) {
        self.write_node(node_id, |node| node.set_location(location));
    }

    pub fn set_node_scale(&mut self, node_id: NodeId, scale: Vector3<f32>) {
        self.write_node(node_id, |node| node.set_scale(scale));
    }

    /// Sets the node's rotation from Euler angles in degrees, upgrading the
    /// rotator to its mutable form if needed.
    pub fn set_node_rotation_angles(&mut self, node_id: NodeId, angles: Vector3<f32>) {
        self.write_node(node_id, |node| {
            node.with_rotator(|rotator| rotator.set_angles(angles))
        });
    }

    /// Rotates the node by `angle_deg` around `axis` on top of its current
    /// orientation.
    pub fn rotate_node_by(&mut self, node_id: NodeId, axis: Vector3<f32>, angle_deg: f32) {
        self.write_node(node_id, |node| {
            node.with_rotator(|rotator| rotator.rotate_by(axis, angle_deg))
        });
    }

    pub fn set_node_rotation_quaternion(&mut self, node_id: NodeId, rotation: Quaternion<f32>) {
        self.write_node(node_id, |node| {
            node.with_rotator(|rotator| rotator.set_orientation(rotation))
        });
    }

    /// Points the node's forward axis along `forward`, upgrading the rotator
    /// to its directional form if needed.
    pub fn set_node_forward_direction(&mut self, node_id: NodeId, forward: Vector3<f32>) {
        self.write_node(node_id, |node| {
            node.with_rotator(|rotator| rotator.set_forward(forward))
        });
    }

    pub fn set_node_up_direction(&mut self, node_id: NodeId, up: Vector3<f32>) {
        self.write_node(node_id, |node| {
            node.with_rotator(|rotator| rotator.set_up(up))
        });
    }

    /// Makes the node continuously track another node's world location.
    pub fn set_node_target(&mut self, node_id: NodeId, target: NodeId) {
        if !self.nodes.contains_key(&target) {
            debug_assert!(false, "tracking target {target} not found in scene");
            log::warn!("set_node_target ignored: target {target} not found");
            return;
        }
        self.write_node(node_id, |node| {
            node.with_rotator(|rotator| rotator.set_target(target))
        });
    }

    /// Makes the node continuously track a fixed world location.
    pub fn set_node_target_location(&mut self, node_id: NodeId, location: Point3<f32>) {
        self.write_node(node_id, |node| {
            node.with_rotator(|rotator| rotator.set_target_location(location))
        });
    }

    /// Stops tracking; the node keeps its current orientation.
    pub fn clear_node_target(&mut self, node_id: NodeId) {
        self.write_node(node_id, |node| {
            node.with_rotator(|rotator| rotator.clear_target())
        });
    }

    pub fn set_node_targetting_constraint(
        &mut self,
        node_id: NodeId,
        constraint: TargettingConstraint,
    ) {
        self.write_node(node_id, |node| {
            node.with_rotator(|rotator| rotator.set_targetting_constraint(constraint))
        });
    }

    pub fn set_node_visibility(&mut self, node_id: NodeId, visibility: Visibility) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            Self::missing_node(node_id);
            return;
        };
        node.set_visibility(visibility);
    }

    /// Seeds the node's bounding volume from an external geometry provider.
    pub fn set_node_local_bounds(&mut self, node_id: NodeId, bounds: Option<Aabb>) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            Self::missing_node(node_id);
            return;
        };
        node.set_local_bounds(bounds);
        self.invalidate_ancestor_bounds(node_id);
    }

    pub fn set_node_bounds_padding(&mut self, node_id: NodeId, padding: f32) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            Self::missing_node(node_id);
            return;
        };
        node.set_bounds_padding(padding);
        self.invalidate_ancestor_bounds(node_id);
    }

    /// Applies a transform-affecting write and cascades the dirty flag to
    /// descendants unless the node was already dirty (in which case its
    /// whole subtree must already be dirty and the walk is skipped).
    fn write_node(&mut self, node_id: NodeId, write: impl FnOnce(&mut Node)) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            Self::missing_node(node_id);
            return;
        };
        let was_dirty = node.transform_dirty();
        write(node);
        let now_dirty = node.transform_dirty();
        if !was_dirty && now_dirty {
            self.mark_children_transform_dirty(node_id);
        }
        if now_dirty {
            // A moved node changes every enclosing box up to the root
            self.invalidate_ancestor_bounds(node_id);
        }
    }

    fn missing_node(node_id: NodeId) {
        debug_assert!(false, "node {node_id} not found in scene");
        log::warn!("ignoring write to missing node {node_id}");
    }

    // ========== Dirty Propagation ==========

    /// Marks a node's world transform (and its whole subtree's) dirty.
    ///
    /// If the node is already dirty the walk stops immediately: dirtiness is
    /// monotonic, so an already-dirty node's descendants were marked when it
    /// was, and re-walking them would make dense invalidation quadratic.
    pub fn mark_transform_dirty(&self, node_id: NodeId) {
        let Some(node) = self.get_node(node_id) else {
            return;
        };
        if node.transform_dirty() {
            return;
        }
        node.mark_transform_dirty();
        node.mark_bounds_dirty();
        for &child_id in node.children() {
            self.mark_transform_dirty(child_id);
        }
    }

    /// Cascades the dirty flag to a node's children (not the node itself).
    fn mark_children_transform_dirty(&self, node_id: NodeId) {
        let Some(node) = self.get_node(node_id) else {
            return;
        };
        for &child_id in node.children() {
            self.mark_transform_dirty(child_id);
        }
    }

    /// Invalidates this node's bounding volume and every ancestor's, since
    /// ancestor bounds contain descendant bounds.
    pub fn mark_bounding_volume_dirty(&self, node_id: NodeId) {
        self.invalidate_ancestor_bounds(node_id);
    }

    /// Walks up the parent chain from the given node to the root, clearing
    /// cached bounds on each node.
    fn invalidate_ancestor_bounds(&self, node_id: NodeId) {
        let mut current_id = Some(node_id);

        while let Some(id) = current_id {
            let Some(node) = self.get_node(id) else {
                break;
            };
            node.mark_bounds_dirty();
            current_id = node.parent();
        }
    }

    // ========== Animation API ==========

    /// Attaches animation content to a track on a node, replacing any prior
    /// state on that track.
    pub fn set_animation_track(
        &mut self,
        node_id: NodeId,
        track_id: TrackId,
        sampler: Arc<dyn AnimationSampler>,
    ) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            Self::missing_node(node_id);
            return;
        };
        node.add_animation_state(AnimationState::new(track_id, sampler));
    }

    /// Removes a track's animation state from a node, returning it if it
    /// existed.
    pub fn remove_animation_track(
        &mut self,
        node_id: NodeId,
        track_id: TrackId,
    ) -> Option<AnimationState> {
        let node = self.nodes.get_mut(&node_id)?;
        node.remove_animation_state(track_id)
    }

    /// Enables or disables one track. An unknown track id is a precondition
    /// violation and a release-mode no-op.
    pub fn set_track_enabled(&mut self, node_id: NodeId, track_id: TrackId, enabled: bool) {
        match self
            .nodes
            .get_mut(&node_id)
            .and_then(|node| node.animation_state_mut(track_id))
        {
            Some(state) => state.set_enabled(enabled),
            None => Self::missing_track(node_id, track_id),
        }
    }

    /// The blend weight of one track, or 0.0 for an unknown track.
    pub fn track_weight(&self, node_id: NodeId, track_id: TrackId) -> f32 {
        self.nodes
            .get(&node_id)
            .and_then(|node| node.animation_state(track_id))
            .map(|state| state.blend_weight())
            .unwrap_or(0.0)
    }

    pub fn set_track_weight(&mut self, node_id: NodeId, track_id: TrackId, weight: f32) {
        match self
            .nodes
            .get_mut(&node_id)
            .and_then(|node| node.animation_state_mut(track_id))
        {
            Some(state) => state.set_blend_weight(weight),
            None => Self::missing_track(node_id, track_id),
        }
    }

    /// Enables or disables this node's own blending; descendants keep
    /// animating independently.
    pub fn set_node_animation_enabled(&mut self, node_id: NodeId, enabled: bool) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            Self::missing_node(node_id);
            return;
        };
        node.set_animation_enabled(enabled);
    }

    /// Samples one track at normalized time `t` (clamped to [0, 1]) and
    /// caches the result for the next blend. Does not write the node's
    /// transform properties; blending happens in the update pass.
    pub fn establish_animation_frame_at(&mut self, node_id: NodeId, t: f32, track_id: TrackId) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            Self::missing_node(node_id);
            return;
        };
        let sampled = match node.animation_state_mut(track_id) {
            Some(state) => {
                state.set_current_time(t);
                state.establish_frame_at(t)
            }
            None => {
                Self::missing_track(node_id, track_id);
                return;
            }
        };
        if sampled {
            node.mark_animation_dirty();
        }
    }

    fn missing_track(node_id: NodeId, track_id: TrackId) {
        debug_assert!(false, "animation track {track_id} not found on node {node_id}");
        log::warn!("ignoring access to missing animation track {track_id} on node {node_id}");
    }

    // ========== Transform Listener API ==========

    /// Registers a listener for one node's transform changes. The scene
    /// keeps the registration until [`Scene::remove_transform_listener`] is
    /// called or the node is destroyed.
    pub fn add_transform_listener(
        &mut self,
        node_id: NodeId,
        listener: Box<dyn TransformListener>,
    ) -> ListenerId {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.insert(id, (node_id, listener));
        id
    }

    /// Deregisters a listener. Returns false if the id was unknown.
    pub fn remove_transform_listener(&mut self, listener_id: ListenerId) -> bool {
        self.listeners.remove(&listener_id).is_some()
    }

    // ========== Deferred Attach ==========

    /// Returns a handle for queueing node attaches from other threads.
    pub fn attach_queue(&self) -> AttachQueue {
        AttachQueue {
            tx: self.pending_tx.clone(),
        }
    }

    /// Applies all queued attach requests. Runs at the start of every
    /// update pass so the tree never mutates mid-traversal.
    fn drain_pending_attaches(&mut self) {
        while let Ok(PendingAttach { parent, seed }) = self.pending_rx.try_recv() {
            let result = self.add_node(parent, seed.name, seed.location, seed.rotation, seed.scale);
            if let Err(error) = result {
                log::warn!("dropping deferred attach: {error}");
            }
        }
    }

    // ========== Lazy Transform Queries ==========

    /// Gets the world transform of a node.
    ///
    /// This returns the cached transform if valid, otherwise computes it by
    /// walking from the root to the node, computing and caching transforms
    /// along the way. The result reflects every property write made before
    /// the call.
    pub fn nodes_transform(&self, node_id: NodeId) -> Matrix4<f32> {
        let node = self.get_node(node_id).expect("Node not found");

        if let Some(cached) = node.cached_world_transform() {
            return cached;
        }

        // Build the path from the root down to this node
        let mut path = Vec::new();
        let mut current_id = node_id;

        loop {
            path.push(current_id);
            let current = self.get_node(current_id).expect("Node not found");
            if let Some(parent_id) = current.parent() {
                current_id = parent_id;
            } else {
                break;
            }
        }

        path.reverse();

        // Walk down the path, computing world = parent_world * local for
        // every stale node along the chain
        let mut world_transform = Matrix4::identity();

        for &id in &path {
            let node = self.get_node(id).expect("Node not found");

            if let Some(cached) = node.cached_world_transform() {
                world_transform = cached;
            } else {
                let local_transform = node.compute_local_transform();
                world_transform = world_transform * local_transform;
                node.set_cached_world_transform(world_transform);
            }
        }

        world_transform
    }

    /// Gets the inverse of a node's world transform, lazily cached.
    ///
    /// The scale clamp keeps world matrices invertible; should inversion
    /// still fail numerically, identity is returned rather than corrupting
    /// the cache.
    pub fn nodes_transform_inverted(&self, node_id: NodeId) -> Matrix4<f32> {
        let node = self.get_node(node_id).expect("Node not found");

        if let Some(cached) = node.cached_world_inverse() {
            return cached;
        }

        let world = self.nodes_transform(node_id);
        let inverse = match world.invert() {
            Some(inverse) => inverse,
            None => {
                log::warn!("world transform of node {node_id} is not invertible");
                Matrix4::identity()
            }
        };

        let node = self.get_node(node_id).expect("Node not found");
        node.set_cached_world_inverse(inverse);
        inverse
    }

    /// Gets the composed world rotation of a node, lazily cached.
    pub fn nodes_rotation(&self, node_id: NodeId) -> Quaternion<f32> {
        let node = self.get_node(node_id).expect("Node not found");

        if let Some(cached) = node.cached_world_rotation() {
            return cached;
        }

        let parent_rotation = node
            .parent()
            .map(|parent_id| self.nodes_rotation(parent_id))
            .unwrap_or_else(|| Quaternion::new(1.0, 0.0, 0.0, 0.0));
        let rotation = parent_rotation * node.rotator().orientation();

        // Caching while the node is still transform-dirty would strand the
        // entry: a later ancestor write sees the dirty flag, short-circuits
        // the cascade, and never clears it
        if !node.transform_dirty() {
            node.set_cached_world_rotation(rotation);
        }
        rotation
    }

    /// Gets the rotation-only world matrix of a node.
    pub fn nodes_rotation_matrix(&self, node_id: NodeId) -> Matrix4<f32> {
        Matrix4::from(self.nodes_rotation(node_id))
    }

    // ========== Bounding Volumes ==========

    /// Gets the world-space bounding box of the entire scene, or None if no
    /// node carries bounds.
    pub fn bounding(&self) -> Option<Aabb> {
        let mut merged_bounds: Option<Aabb> = None;

        for &root_id in &self.root_nodes {
            if let Some(root_bounds) = self.nodes_bounding(root_id) {
                merged_bounds = match merged_bounds {
                    Some(existing) => Some(existing.merge(&root_bounds)),
                    None => Some(root_bounds),
                };
            }
        }

        merged_bounds
    }

    /// Gets the world-space bounding box of a node and its subtree, lazily
    /// cached.
    ///
    /// The box covers the node's own (padded) local bounds transformed to
    /// world space, merged with all descendant boxes. A node with no local
    /// bounds and no bounded descendants yields None; that is the expected
    /// empty case, not an error.
    pub fn nodes_bounding(&self, node_id: NodeId) -> Option<Aabb> {
        let node = self.get_node(node_id).expect("Node not found");

        if !node.bounds_dirty() {
            return node.cached_bounds();
        }

        let world_transform = self.nodes_transform(node_id);

        let mut merged_bounds: Option<Aabb> = None;
        for &child_id in node.children() {
            if let Some(child_bounds) = self.nodes_bounding(child_id) {
                merged_bounds = match merged_bounds {
                    Some(existing) => Some(existing.merge(&child_bounds)),
                    None => Some(child_bounds),
                };
            }
        }

        let own_bounds = node.local_bounds().map(|bounds| {
            bounds
                .expanded(node.bounds_padding())
                .transform(&world_transform)
        });

        let node_bounds = match (own_bounds, merged_bounds) {
            (Some(own), Some(children)) => Some(own.merge(&children)),
            (Some(own), None) => Some(own),
            (None, children) => children,
        };

        node.set_cached_bounds(node_bounds);
        node_bounds
    }

    // ========== Update Pass ==========

    /// Runs one frame update with no hooks. See
    /// [`Scene::update_with_hooks`].
    pub fn update(&mut self, dt: f32) {
        self.update_with_hooks(dt, &mut NoHooks);
    }

    /// Runs one frame update over the whole tree.
    ///
    /// Per node, in order: queued attaches are applied first (once, before
    /// traversal); then top-down for each node: animation tracks advance,
    /// sample, and blend into the node's properties; the pre-transform hook
    /// runs; tracking rotators re-orient toward their target; the local and
    /// world matrices are rebuilt if stale; the post-transform hook runs;
    /// children recurse. A parent's matrices are always current before any
    /// descendant is processed. Transform listeners are notified after the
    /// traversal for every node that was rebuilt.
    pub fn update_with_hooks<H: UpdateHooks>(&mut self, dt: f32, hooks: &mut H) {
        self.drain_pending_attaches();

        let roots = self.root_nodes.clone();
        let identity_rotation = Quaternion::new(1.0, 0.0, 0.0, 0.0);
        let mut rebuilt = Vec::new();

        for root_id in roots {
            self.update_node(
                root_id,
                Matrix4::identity(),
                identity_rotation,
                dt,
                hooks,
                &mut rebuilt,
            );
        }

        // Dispatch after the pass so listeners never observe a half-updated
        // tree
        for (node_id, world) in rebuilt {
            for (registered_node, listener) in self.listeners.values_mut() {
                if *registered_node == node_id {
                    listener.transform_changed(node_id, &world);
                }
            }
        }
    }

    fn update_node<H: UpdateHooks>(
        &mut self,
        node_id: NodeId,
        parent_world: Matrix4<f32>,
        parent_rotation: Quaternion<f32>,
        dt: f32,
        hooks: &mut H,
        rebuilt: &mut Vec<(NodeId, Matrix4<f32>)>,
    ) {
        // Phase 1: advance, sample, and blend animation tracks
        {
            let Some(node) = self.nodes.get_mut(&node_id) else {
                return;
            };
            if node.animation_enabled() && node.has_animation() {
                let mut sampled_any = false;
                for state in node.animation_states_mut() {
                    if !state.contributes() {
                        continue;
                    }
                    let t = state.advance(dt);
                    if state.establish_frame_at(t) {
                        sampled_any = true;
                    }
                }
                if sampled_any {
                    node.mark_animation_dirty();
                }

                if node.take_animation_dirty() {
                    let frame = blend_states(node.animation_states());
                    if let Some(location) = frame.location {
                        node.set_location(location);
                    }
                    if let Some(rotation) = frame.rotation {
                        node.with_rotator(|rotator| rotator.set_orientation(rotation));
                    }
                    if let Some(scale) = frame.scale {
                        node.set_scale(scale);
                    }
                }
            }
        }

        // Phase 2: pre-transform hook
        {
            let Some(node) = self.nodes.get_mut(&node_id) else {
                return;
            };
            hooks.pre_transform(node);
        }

        // Phase 3: tracking rotators re-seek their target
        self.retarget_node(node_id, parent_world, parent_rotation);

        // Phase 4: rebuild matrices if stale
        let (world, world_rotation, was_rebuilt, children) = {
            let Some(node) = self.nodes.get_mut(&node_id) else {
                return;
            };

            let was_rebuilt = node.transform_dirty();
            let world = if was_rebuilt {
                let local = node.compute_local_transform();
                let world = parent_world * local;
                node.set_cached_world_transform(world);
                world
            } else {
                node.cached_world_transform()
                    .unwrap_or_else(|| parent_world * node.compute_local_transform())
            };

            let world_rotation = parent_rotation * node.rotator().orientation();
            node.set_cached_world_rotation(world_rotation);

            hooks.post_transform(node, &world);

            (world, world_rotation, was_rebuilt, node.children().to_vec())
        };

        if was_rebuilt {
            rebuilt.push((node_id, world));
            // This node's world changed, so every descendant's is stale.
            // The short-circuit keeps this from re-walking subtrees that
            // were already marked at write time.
            self.mark_children_transform_dirty(node_id);
            // Animation and hook writes bypass the scene setters, so catch
            // up on ancestor bounds here
            self.invalidate_ancestor_bounds(node_id);
        }

        // Phase 5: children, in stored order
        for child_id in children {
            self.update_node(child_id, world, world_rotation, dt, hooks, rebuilt);
        }
    }

    /// Re-orients a tracking node so its world forward axis points at its
    /// target. A target that no longer exists reverts the node to
    /// `NotTracking`.
    fn retarget_node(
        &mut self,
        node_id: NodeId,
        parent_world: Matrix4<f32>,
        parent_rotation: Quaternion<f32>,
    ) {
        let mode = match self.nodes.get(&node_id) {
            Some(node) => node.rotator().tracking_mode(),
            None => return,
        };

        let target_location = match mode {
            TrackingMode::NotTracking => return,
            TrackingMode::FixedLocation(location) => location,
            TrackingMode::TargetNode(target) => {
                if !self.nodes.contains_key(&target) {
                    log::warn!("tracking target {target} no longer exists; tracking stopped");
                    if let Some(node) = self.nodes.get_mut(&node_id) {
                        node.with_rotator(|rotator| rotator.clear_target());
                    }
                    return;
                }
                let target_world = self.nodes_transform(target);
                Point3::new(target_world[3][0], target_world[3][1], target_world[3][2])
            }
        };

        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        let world_location = parent_world.transform_point(node.location_point());
        let direction = target_location - world_location;
        node.with_rotator(|rotator| rotator.apply_tracking(direction, parent_rotation));
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}
