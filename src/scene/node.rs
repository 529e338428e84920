use std::cell::Cell;
use std::collections::BTreeMap;

use cgmath::{Matrix4, Point3, Quaternion, Vector3};

use super::animation::{AnimationState, TrackId};
use super::rotator::Rotator;
use crate::common::transform_ops::clamp_scale;
use crate::common::Aabb;

/// Unique identifier for a Node in the scene tree.
pub type NodeId = u32;

/// Explicit visibility state set by the user.
///
/// The transform core only carries the flag; collaborators that consume
/// global transforms decide what invisibility means for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Invisible,
}

/// A node in the scene tree hierarchy.
///
/// A node owns its local transform properties (location, rotator, scale),
/// its animation states, and a cluster of lazily computed matrix caches.
/// Hierarchy edges are ids into the owning [`super::Scene`]: children are
/// an ordered, owned sequence; the parent edge is a non-owning
/// back-reference maintained by the scene.
///
/// Setters on the node mark only the node itself dirty. The scene-level
/// setters additionally cascade the dirty flag to descendants; use those to
/// keep the tree consistent.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: Option<String>,

    // Local transform properties
    location: Vector3<f32>,
    rotator: Rotator,
    scale: Vector3<f32>,

    // Hierarchy
    parent: Option<NodeId>,
    children: Vec<NodeId>,

    visibility: Visibility,

    // Animation, keyed by track id; BTreeMap keeps blending order
    // deterministic (ascending track id)
    animation_states: BTreeMap<TrackId, AnimationState>,
    animation_enabled: bool,
    animation_dirty: Cell<bool>,

    // Bounding volume seed and padding
    local_bounds: Option<Aabb>,
    bounds_padding: f32,

    // Cached computed values
    cached_local_transform: Cell<Option<Matrix4<f32>>>,
    cached_world_transform: Cell<Option<Matrix4<f32>>>,
    cached_world_inverse: Cell<Option<Matrix4<f32>>>,
    cached_world_rotation: Cell<Option<Quaternion<f32>>>,
    cached_bounds: Cell<Option<Aabb>>,
}

impl Node {
    /// Creates a new node with the given transform components.
    pub fn new(
        id: NodeId,
        name: Option<String>,
        location: Vector3<f32>,
        rotation: Quaternion<f32>,
        scale: Vector3<f32>,
    ) -> Self {
        Self {
            id,
            name,
            location,
            rotator: Rotator::from_quaternion(rotation),
            scale,
            parent: None,
            children: Vec::new(),
            visibility: Visibility::default(),
            animation_states: BTreeMap::new(),
            animation_enabled: true,
            animation_dirty: Cell::new(false),
            local_bounds: None,
            bounds_padding: 0.0,
            cached_local_transform: Cell::new(None),
            cached_world_transform: Cell::new(None),
            cached_world_inverse: Cell::new(None),
            cached_world_rotation: Cell::new(None),
            cached_bounds: Cell::new(None),
        }
    }

    /// Creates a new node with default transform (identity).
    pub fn new_default(id: NodeId) -> Self {
        Self::new(
            id,
            None,
            Vector3::new(0.0, 0.0, 0.0),
            Quaternion::new(1.0, 0.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 1.0),
        )
    }

    /// Clones this node's properties into a fresh node with a new id.
    ///
    /// Hierarchy edges and all caches are reset; animation states are
    /// cloned (sharing their content sources, with independent playback).
    pub(super) fn duplicate(&self, new_id: NodeId) -> Self {
        let mut copy = self.clone();
        copy.id = new_id;
        copy.parent = None;
        copy.children = Vec::new();
        copy.cached_local_transform = Cell::new(None);
        copy.cached_world_transform = Cell::new(None);
        copy.cached_world_inverse = Cell::new(None);
        copy.cached_world_rotation = Cell::new(None);
        copy.cached_bounds = Cell::new(None);
        copy
    }

    // ========== Transform properties ==========

    pub fn location(&self) -> Vector3<f32> {
        self.location
    }

    pub fn set_location(&mut self, location: Vector3<f32>) {
        self.location = location;
        self.invalidate_local();
        self.mark_bounds_dirty();
    }

    pub fn scale(&self) -> Vector3<f32> {
        self.scale
    }

    pub fn set_scale(&mut self, scale: Vector3<f32>) {
        self.scale = scale;
        self.invalidate_local();
        self.mark_bounds_dirty();
    }

    /// The orientation strategy currently owned by this node.
    pub fn rotator(&self) -> &Rotator {
        &self.rotator
    }

    /// Applies a closure to the rotator and invalidates the local matrix.
    pub(super) fn with_rotator<R>(&mut self, f: impl FnOnce(&mut Rotator) -> R) -> R {
        let result = f(&mut self.rotator);
        self.invalidate_local();
        self.mark_bounds_dirty();
        result
    }

    /// The net orientation quaternion of the rotator.
    pub fn rotation_quaternion(&self) -> Quaternion<f32> {
        self.rotator.orientation()
    }

    /// Euler angles in degrees reported by the rotator.
    pub fn rotation_angles(&self) -> Vector3<f32> {
        self.rotator.angles()
    }

    // ========== Hierarchy ==========

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Sets the parent node id (internal - use Scene methods to maintain
    /// consistency).
    pub(super) fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
        self.mark_transform_dirty();
        self.mark_bounds_dirty();
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Appends a child id (internal - use Scene methods to maintain
    /// consistency). Child order is update-sequence significant.
    pub(super) fn add_child(&mut self, child: NodeId) {
        if !self.children.contains(&child) {
            self.children.push(child);
            self.mark_bounds_dirty();
        }
    }

    /// Removes a child id (internal - use Scene methods to maintain
    /// consistency).
    pub(super) fn remove_child(&mut self, child: NodeId) {
        self.children.retain(|&id| id != child);
        self.mark_bounds_dirty();
    }

    // ========== Visibility ==========

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn set_visibility(&mut self, visibility: Visibility) {
        self.visibility = visibility;
    }

    // ========== Animation ==========

    pub fn animation_enabled(&self) -> bool {
        self.animation_enabled
    }

    /// Enables or disables this node's own blending. Descendants animate
    /// independently.
    pub fn set_animation_enabled(&mut self, enabled: bool) {
        self.animation_enabled = enabled;
    }

    /// Installs an animation state, replacing any prior state on the same
    /// track.
    pub fn add_animation_state(&mut self, state: AnimationState) {
        self.animation_states.insert(state.track_id(), state);
        self.animation_dirty.set(true);
    }

    /// Removes the state on `track`, returning it if present.
    pub fn remove_animation_state(&mut self, track: TrackId) -> Option<AnimationState> {
        let removed = self.animation_states.remove(&track);
        if removed.is_some() {
            self.animation_dirty.set(true);
        }
        removed
    }

    pub fn animation_state(&self, track: TrackId) -> Option<&AnimationState> {
        self.animation_states.get(&track)
    }

    pub fn animation_state_mut(&mut self, track: TrackId) -> Option<&mut AnimationState> {
        self.animation_states.get_mut(&track)
    }

    /// All animation states in ascending track-id order.
    pub fn animation_states(&self) -> impl Iterator<Item = &AnimationState> {
        self.animation_states.values()
    }

    pub(super) fn animation_states_mut(&mut self) -> impl Iterator<Item = &mut AnimationState> {
        self.animation_states.values_mut()
    }

    pub fn has_animation(&self) -> bool {
        !self.animation_states.is_empty()
    }

    pub fn mark_animation_dirty(&self) {
        self.animation_dirty.set(true);
    }

    pub fn animation_dirty(&self) -> bool {
        self.animation_dirty.get()
    }

    /// Clears and returns the animation-dirty flag.
    pub(super) fn take_animation_dirty(&self) -> bool {
        self.animation_dirty.replace(false)
    }

    // ========== Bounding volume ==========

    /// The local-space bounding box seeded from an external geometry
    /// provider, if any.
    pub fn local_bounds(&self) -> Option<Aabb> {
        self.local_bounds
    }

    pub fn set_local_bounds(&mut self, bounds: Option<Aabb>) {
        self.local_bounds = bounds;
        self.mark_bounds_dirty();
    }

    pub fn bounds_padding(&self) -> f32 {
        self.bounds_padding
    }

    pub fn set_bounds_padding(&mut self, padding: f32) {
        self.bounds_padding = padding;
        self.mark_bounds_dirty();
    }

    pub fn mark_bounds_dirty(&self) {
        self.cached_bounds.set(None);
    }

    pub fn bounds_dirty(&self) -> bool {
        self.cached_bounds.get().is_none()
    }

    pub(super) fn cached_bounds(&self) -> Option<Aabb> {
        self.cached_bounds.get()
    }

    pub(super) fn set_cached_bounds(&self, bounds: Option<Aabb>) {
        self.cached_bounds.set(bounds);
    }

    // ========== Matrix caches ==========

    /// Computes (or returns the cached) local transform matrix.
    ///
    /// The composition order is fixed: translation * rotation * scale, with
    /// scale components clamped away from zero so the matrix is invertible.
    pub fn compute_local_transform(&self) -> Matrix4<f32> {
        if let Some(cached) = self.cached_local_transform.get() {
            return cached;
        }

        let translation = Matrix4::from_translation(self.location);
        let rotation = Matrix4::from(self.rotator.orientation());
        let scale = clamp_scale(self.scale);
        let scale = Matrix4::from_nonuniform_scale(scale.x, scale.y, scale.z);

        let local = translation * rotation * scale;
        self.cached_local_transform.set(Some(local));
        local
    }

    /// Invalidates the local matrix (and therefore everything derived from
    /// it). Called by property writes.
    pub(super) fn invalidate_local(&self) {
        self.cached_local_transform.set(None);
        self.mark_transform_dirty();
    }

    /// Marks the world-level caches stale. The local matrix stays valid;
    /// this is what the dirty cascade applies to descendants whose own
    /// properties did not change.
    pub fn mark_transform_dirty(&self) {
        self.cached_world_transform.set(None);
        self.cached_world_inverse.set(None);
        self.cached_world_rotation.set(None);
    }

    /// True if the world transform needs recomputation.
    pub fn transform_dirty(&self) -> bool {
        self.cached_world_transform.get().is_none()
    }

    /// Gets the cached world transform if valid.
    /// You probably want [`super::Scene::nodes_transform`].
    pub fn cached_world_transform(&self) -> Option<Matrix4<f32>> {
        self.cached_world_transform.get()
    }

    pub(super) fn set_cached_world_transform(&self, transform: Matrix4<f32>) {
        self.cached_world_transform.set(Some(transform));
    }

    pub(super) fn cached_world_inverse(&self) -> Option<Matrix4<f32>> {
        self.cached_world_inverse.get()
    }

    pub(super) fn set_cached_world_inverse(&self, inverse: Matrix4<f32>) {
        self.cached_world_inverse.set(Some(inverse));
    }

    pub(super) fn cached_world_rotation(&self) -> Option<Quaternion<f32>> {
        self.cached_world_rotation.get()
    }

    pub(super) fn set_cached_world_rotation(&self, rotation: Quaternion<f32>) {
        self.cached_world_rotation.set(Some(rotation));
    }

    /// This node's location expressed as a point, for world-space math.
    pub(super) fn location_point(&self) -> Point3<f32> {
        Point3::new(self.location.x, self.location.y, self.location.z)
    }
}
