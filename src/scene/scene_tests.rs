use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;

use cgmath::{InnerSpace, Matrix4, Point3, Quaternion, Rotation, SquareMatrix, Vector3};

use super::*;
use crate::common::{Aabb, EPSILON};
use crate::common::transform_ops::quaternion_from_euler_degrees;

// ========== Helpers ==========

fn assert_vec3_eq(actual: Vector3<f32>, expected: Vector3<f32>) {
    assert!(
        (actual.x - expected.x).abs() < 1e-4
            && (actual.y - expected.y).abs() < 1e-4
            && (actual.z - expected.z).abs() < 1e-4,
        "expected {:?}, got {:?}",
        expected,
        actual
    );
}

fn assert_mat4_eq(actual: Matrix4<f32>, expected: Matrix4<f32>) {
    for col in 0..4 {
        for row in 0..4 {
            assert!(
                (actual[col][row] - expected[col][row]).abs() < 1e-4,
                "matrices differ at [{}][{}]: expected {:?}, got {:?}",
                col,
                row,
                expected,
                actual
            );
        }
    }
}

fn translation_of(matrix: &Matrix4<f32>) -> Vector3<f32> {
    Vector3::new(matrix[3][0], matrix[3][1], matrix[3][2])
}

/// Builds a three-deep chain: root -> child -> grandchild, all at identity.
fn build_chain(scene: &mut Scene) -> (NodeId, NodeId, NodeId) {
    let root = scene
        .add_default_node(None, Some("root".to_string()))
        .unwrap();
    let child = scene
        .add_default_node(Some(root), Some("child".to_string()))
        .unwrap();
    let grandchild = scene
        .add_default_node(Some(child), Some("grandchild".to_string()))
        .unwrap();
    (root, child, grandchild)
}

struct ConstSampler {
    frame: AnimationFrame,
}

impl AnimationSampler for ConstSampler {
    fn frame_count(&self) -> usize {
        1
    }

    fn sample(&self, _t: f32) -> AnimationFrame {
        self.frame
    }
}

fn location_sampler(location: Vector3<f32>) -> Arc<dyn AnimationSampler> {
    Arc::new(ConstSampler {
        frame: AnimationFrame {
            location: Some(location),
            ..Default::default()
        },
    })
}

fn rotation_sampler(rotation: Quaternion<f32>) -> Arc<dyn AnimationSampler> {
    Arc::new(ConstSampler {
        frame: AnimationFrame {
            rotation: Some(rotation),
            ..Default::default()
        },
    })
}

// ========== Hierarchy ==========

#[test]
fn test_add_node_under_missing_parent_fails() {
    let mut scene = Scene::new();
    let result = scene.add_default_node(Some(99), None);
    assert!(result.is_err());
    assert!(scene.nodes.is_empty());
}

#[test]
fn test_remove_node_detaches_subtree() {
    let mut scene = Scene::new();
    let (root, child, grandchild) = build_chain(&mut scene);

    scene.remove_node(child);

    assert!(scene.get_node(child).is_none());
    assert!(scene.get_node(grandchild).is_none());
    assert!(scene.get_node(root).unwrap().children().is_empty());
    assert_eq!(scene.root_nodes(), &[root]);
}

#[test]
fn test_reparent_rejects_cycle() {
    let mut scene = Scene::new();
    let (root, _child, grandchild) = build_chain(&mut scene);

    assert!(scene.reparent_node(root, Some(grandchild)).is_err());
    assert!(scene.reparent_node(root, Some(root)).is_err());
    // Tree unchanged
    assert_eq!(scene.root_nodes(), &[root]);
}

#[test]
fn test_reparent_to_root_and_back() {
    let mut scene = Scene::new();
    let (root, child, grandchild) = build_chain(&mut scene);

    scene.reparent_node(grandchild, None).unwrap();
    assert_eq!(scene.get_node(grandchild).unwrap().parent(), None);
    assert!(scene.root_nodes().contains(&grandchild));
    assert!(scene.get_node(child).unwrap().children().is_empty());

    scene.reparent_node(grandchild, Some(root)).unwrap();
    assert_eq!(scene.get_node(grandchild).unwrap().parent(), Some(root));
    assert!(!scene.root_nodes().contains(&grandchild));
}

#[test]
fn test_reparent_changes_world_transform() {
    let mut scene = Scene::new();
    let (root, child, grandchild) = build_chain(&mut scene);
    scene.set_node_location(root, Vector3::new(10.0, 0.0, 0.0));
    scene.set_node_location(child, Vector3::new(0.0, 5.0, 0.0));
    scene.set_node_location(grandchild, Vector3::new(0.0, 0.0, 1.0));

    assert_vec3_eq(
        translation_of(&scene.nodes_transform(grandchild)),
        Vector3::new(10.0, 5.0, 1.0),
    );

    // Moving the grandchild directly under the root drops the child's offset
    scene.reparent_node(grandchild, Some(root)).unwrap();
    assert_vec3_eq(
        translation_of(&scene.nodes_transform(grandchild)),
        Vector3::new(10.0, 0.0, 1.0),
    );
}

// ========== Dirty propagation ==========

#[test]
fn test_write_cascades_dirty_to_descendants() {
    let mut scene = Scene::new();
    let (root, child, grandchild) = build_chain(&mut scene);

    // Query everything clean first
    scene.nodes_transform(grandchild);
    assert!(!scene.get_node(root).unwrap().transform_dirty());
    assert!(!scene.get_node(child).unwrap().transform_dirty());
    assert!(!scene.get_node(grandchild).unwrap().transform_dirty());

    scene.set_node_location(root, Vector3::new(1.0, 0.0, 0.0));

    assert!(scene.get_node(root).unwrap().transform_dirty());
    assert!(scene.get_node(child).unwrap().transform_dirty());
    assert!(scene.get_node(grandchild).unwrap().transform_dirty());
}

#[test]
fn test_dirty_cascade_short_circuits_at_dirty_nodes() {
    let mut scene = Scene::new();
    let (root, _child, grandchild) = build_chain(&mut scene);

    // Everything starts dirty. Hand the grandchild a cache so we can watch
    // whether a second invalidation reaches it.
    scene
        .get_node(grandchild)
        .unwrap()
        .set_cached_world_transform(Matrix4::identity());
    assert!(!scene.get_node(grandchild).unwrap().transform_dirty());

    // The root is already dirty, so the cascade stops there and never
    // touches the grandchild
    scene.mark_transform_dirty(root);
    assert!(!scene.get_node(grandchild).unwrap().transform_dirty());

    // Same for a property write to an already-dirty node
    scene.set_node_location(root, Vector3::new(3.0, 0.0, 0.0));
    assert!(!scene.get_node(grandchild).unwrap().transform_dirty());
}

#[test]
fn test_dirty_is_monotonic_until_rebuild() {
    let mut scene = Scene::new();
    let (root, _child, grandchild) = build_chain(&mut scene);
    scene.update(0.0);

    scene.set_node_location(root, Vector3::new(1.0, 0.0, 0.0));
    scene.set_node_location(root, Vector3::new(2.0, 0.0, 0.0));
    scene.set_node_scale(root, Vector3::new(2.0, 2.0, 2.0));
    assert!(scene.get_node(grandchild).unwrap().transform_dirty());

    // Only a rebuild clears the flag
    scene.nodes_transform(grandchild);
    assert!(!scene.get_node(grandchild).unwrap().transform_dirty());
}

// ========== Lazy transform queries ==========

#[test]
fn test_nodes_transform_deep_chain() {
    let mut scene = Scene::new();
    let mut parent = None;
    let mut ids = Vec::new();
    for _ in 0..8 {
        let id = scene.add_default_node(parent, None).unwrap();
        scene.set_node_location(id, Vector3::new(1.0, 2.0, 3.0));
        ids.push(id);
        parent = Some(id);
    }

    let leaf = *ids.last().unwrap();
    assert_vec3_eq(
        translation_of(&scene.nodes_transform(leaf)),
        Vector3::new(8.0, 16.0, 24.0),
    );

    // The whole chain was cached on the way down
    for &id in &ids {
        assert!(!scene.get_node(id).unwrap().transform_dirty());
    }
}

#[test]
fn test_nodes_transform_composes_rotation_and_translation() {
    let mut scene = Scene::new();
    let root = scene.add_default_node(None, None).unwrap();
    let child = scene.add_default_node(Some(root), None).unwrap();

    scene.set_node_rotation_angles(root, Vector3::new(0.0, 90.0, 0.0));
    scene.set_node_location(child, Vector3::new(5.0, 2.0, 0.0));

    // 90 degrees about +Y carries (5, 2, 0) to (0, 2, -5)
    assert_vec3_eq(
        translation_of(&scene.nodes_transform(child)),
        Vector3::new(0.0, 2.0, -5.0),
    );
}

#[test]
fn test_writing_intermediate_node_leaves_ancestors_clean() {
    let mut scene = Scene::new();
    let (root, child, grandchild) = build_chain(&mut scene);
    scene.set_node_location(child, Vector3::new(5.0, 0.0, 0.0));
    scene.set_node_location(grandchild, Vector3::new(0.0, 2.0, 0.0));

    assert_vec3_eq(
        translation_of(&scene.nodes_transform(grandchild)),
        Vector3::new(5.0, 2.0, 0.0),
    );
    assert!(!scene.get_node(root).unwrap().transform_dirty());

    // Rewriting the middle node dirties only its own subtree
    scene.set_node_location(child, Vector3::new(0.0, 0.0, 0.0));
    assert!(!scene.get_node(root).unwrap().transform_dirty());
    assert!(scene.get_node(child).unwrap().transform_dirty());
    assert!(scene.get_node(grandchild).unwrap().transform_dirty());

    assert_vec3_eq(
        translation_of(&scene.nodes_transform(grandchild)),
        Vector3::new(0.0, 2.0, 0.0),
    );
    assert_mat4_eq(scene.nodes_transform(root), Matrix4::identity());
    assert!(!scene.get_node(root).unwrap().transform_dirty());
}

#[test]
fn test_query_reflects_latest_write() {
    let mut scene = Scene::new();
    let (root, _child, grandchild) = build_chain(&mut scene);
    scene.update(0.0);

    scene.set_node_location(root, Vector3::new(1.0, 0.0, 0.0));
    scene.set_node_location(root, Vector3::new(-7.0, 0.0, 0.0));

    assert_vec3_eq(
        translation_of(&scene.nodes_transform(grandchild)),
        Vector3::new(-7.0, 0.0, 0.0),
    );
}

#[test]
fn test_nodes_transform_inverted_roundtrip() {
    let mut scene = Scene::new();
    let root = scene.add_default_node(None, None).unwrap();
    let child = scene.add_default_node(Some(root), None).unwrap();
    scene.set_node_location(root, Vector3::new(3.0, -1.0, 2.0));
    scene.set_node_rotation_angles(child, Vector3::new(30.0, 45.0, 0.0));
    scene.set_node_scale(child, Vector3::new(2.0, 0.5, 1.0));

    let world = scene.nodes_transform(child);
    let inverse = scene.nodes_transform_inverted(child);
    assert_mat4_eq(world * inverse, Matrix4::identity());
}

#[test]
fn test_zero_scale_is_clamped_and_stays_invertible() {
    let mut scene = Scene::new();
    let node = scene.add_default_node(None, None).unwrap();
    scene.set_node_scale(node, Vector3::new(0.0, 1.0, 1.0));

    let world = scene.nodes_transform(node);
    assert!(world.determinant().abs() > 0.0);

    let inverse = scene.nodes_transform_inverted(node);
    assert_mat4_eq(world * inverse, Matrix4::identity());
}

#[test]
fn test_nodes_rotation_reflects_ancestor_write_after_short_circuit() {
    let mut scene = Scene::new();
    let root = scene.add_default_node(None, None).unwrap();
    let child = scene.add_default_node(Some(root), None).unwrap();

    // Query the rotation while the chain has never been rebuilt, then write
    // the root. The root is still transform-dirty at that point, so the
    // cascade short-circuits; the child's rotation read must not come back
    // from a cache the cascade never reached.
    let before = scene.nodes_rotation(child);
    assert!(before.dot(Quaternion::new(1.0, 0.0, 0.0, 0.0)).abs() > 1.0 - EPSILON);

    scene.set_node_rotation_angles(root, Vector3::new(0.0, 90.0, 0.0));

    let expected = quaternion_from_euler_degrees(Vector3::new(0.0, 90.0, 0.0));
    let after = scene.nodes_rotation(child);
    assert!(after.dot(expected).abs() > 1.0 - EPSILON);

    let forward = scene.nodes_rotation_matrix(child)
        * cgmath::Vector4::new(0.0, 0.0, 1.0, 0.0);
    assert_vec3_eq(forward.truncate(), Vector3::new(1.0, 0.0, 0.0));
}

#[test]
fn test_nodes_rotation_composes_down_the_chain() {
    let mut scene = Scene::new();
    let root = scene.add_default_node(None, None).unwrap();
    let child = scene.add_default_node(Some(root), None).unwrap();
    scene.set_node_rotation_angles(root, Vector3::new(0.0, 45.0, 0.0));
    scene.set_node_rotation_angles(child, Vector3::new(0.0, 45.0, 0.0));

    let expected = quaternion_from_euler_degrees(Vector3::new(0.0, 90.0, 0.0));
    let actual = scene.nodes_rotation(child);
    assert!(actual.dot(expected).abs() > 1.0 - EPSILON);
}

// ========== Update pass ==========

#[test]
fn test_update_rebuilds_parents_before_children() {
    struct OrderHooks {
        order: Vec<NodeId>,
    }
    impl UpdateHooks for OrderHooks {
        fn post_transform(&mut self, node: &Node, _world: &Matrix4<f32>) {
            self.order.push(node.id);
        }
    }

    let mut scene = Scene::new();
    let (root, child, grandchild) = build_chain(&mut scene);
    let sibling = scene.add_default_node(Some(root), None).unwrap();

    let mut hooks = OrderHooks { order: Vec::new() };
    scene.update_with_hooks(0.0, &mut hooks);

    assert_eq!(hooks.order, vec![root, child, grandchild, sibling]);
}

#[test]
fn test_pre_transform_hook_writes_are_picked_up_same_frame() {
    struct NudgeHooks {
        target: NodeId,
    }
    impl UpdateHooks for NudgeHooks {
        fn pre_transform(&mut self, node: &mut Node) {
            if node.id == self.target {
                node.set_location(Vector3::new(0.0, 9.0, 0.0));
            }
        }
    }

    let mut scene = Scene::new();
    let (root, _child, grandchild) = build_chain(&mut scene);
    scene.update(0.0);

    let mut hooks = NudgeHooks { target: root };
    scene.update_with_hooks(0.0, &mut hooks);

    assert_vec3_eq(
        translation_of(&scene.nodes_transform(grandchild)),
        Vector3::new(0.0, 9.0, 0.0),
    );
}

// ========== Animation ==========

#[test]
fn test_blend_weighted_average_location() {
    let mut scene = Scene::new();
    let node = scene.add_default_node(None, None).unwrap();

    scene.set_animation_track(node, 0, location_sampler(Vector3::new(10.0, 0.0, 0.0)));
    scene.set_animation_track(node, 1, location_sampler(Vector3::new(1.0, 0.0, 0.0)));
    scene.set_track_weight(node, 0, 2.0);
    scene.set_track_weight(node, 1, 1.0);

    scene.update(0.0);

    // (2 * 10 + 1 * 1) / 3 = 7
    assert_vec3_eq(
        scene.get_node(node).unwrap().location(),
        Vector3::new(7.0, 0.0, 0.0),
    );
}

#[test]
fn test_blend_rotation_order_is_track_id_not_insertion() {
    let identity = Quaternion::new(1.0, 0.0, 0.0, 0.0);
    let quarter = quaternion_from_euler_degrees(Vector3::new(0.0, 0.0, 90.0));

    let run = |first_inserted_low: bool| {
        let mut scene = Scene::new();
        let node = scene.add_default_node(None, None).unwrap();
        if first_inserted_low {
            scene.set_animation_track(node, 0, rotation_sampler(identity));
            scene.set_animation_track(node, 1, rotation_sampler(quarter));
        } else {
            scene.set_animation_track(node, 1, rotation_sampler(quarter));
            scene.set_animation_track(node, 0, rotation_sampler(identity));
        }
        scene.update(0.0);
        scene.get_node(node).unwrap().rotation_quaternion()
    };

    let forward = run(true);
    let reversed = run(false);
    assert!(forward.dot(reversed).abs() > 1.0 - EPSILON);

    // Equal weights over identity and 90 degrees land at 45
    let expected = quaternion_from_euler_degrees(Vector3::new(0.0, 0.0, 45.0));
    assert!(forward.dot(expected).abs() > 1.0 - EPSILON);
}

#[test]
fn test_disabled_track_contributes_nothing() {
    let mut scene = Scene::new();
    let node = scene.add_default_node(None, None).unwrap();

    scene.set_animation_track(node, 0, location_sampler(Vector3::new(10.0, 0.0, 0.0)));
    scene.set_animation_track(node, 1, location_sampler(Vector3::new(4.0, 0.0, 0.0)));
    scene.set_track_enabled(node, 0, false);

    scene.update(0.0);

    assert_vec3_eq(
        scene.get_node(node).unwrap().location(),
        Vector3::new(4.0, 0.0, 0.0),
    );
}

#[test]
fn test_node_animation_disable_freezes_properties() {
    let mut scene = Scene::new();
    let node = scene.add_default_node(None, None).unwrap();
    scene.set_animation_track(node, 0, location_sampler(Vector3::new(10.0, 0.0, 0.0)));
    scene.set_node_animation_enabled(node, false);

    scene.update(0.5);

    assert_vec3_eq(scene.get_node(node).unwrap().location(), Vector3::new(0.0, 0.0, 0.0));
}

#[test]
fn test_animated_parent_moves_children() {
    let mut scene = Scene::new();
    let (root, _child, grandchild) = build_chain(&mut scene);
    scene.update(0.0);

    scene.set_animation_track(root, 0, location_sampler(Vector3::new(0.0, 3.0, 0.0)));
    scene.update(0.1);

    assert_vec3_eq(
        translation_of(&scene.nodes_transform(grandchild)),
        Vector3::new(0.0, 3.0, 0.0),
    );
}

#[test]
fn test_establish_frame_at_clamps_time() {
    let times = vec![0.0, 1.0];
    let values = vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(10.0, 0.0, 0.0)];
    let track = KeyframeTrack::new()
        .with_location_channel(times, values)
        .unwrap();

    let mut scene = Scene::new();
    let node = scene.add_default_node(None, None).unwrap();
    scene.set_animation_track(node, 0, Arc::new(track));
    scene
        .get_node_mut(node)
        .unwrap()
        .animation_state_mut(0)
        .unwrap()
        .set_looping(false);

    scene.establish_animation_frame_at(node, 5.0, 0);
    scene.update(0.0);

    assert_vec3_eq(
        scene.get_node(node).unwrap().location(),
        Vector3::new(10.0, 0.0, 0.0),
    );
}

#[test]
fn test_remove_animation_track_returns_state() {
    let mut scene = Scene::new();
    let node = scene.add_default_node(None, None).unwrap();
    scene.set_animation_track(node, 3, location_sampler(Vector3::new(1.0, 0.0, 0.0)));

    let state = scene.remove_animation_track(node, 3);
    assert_eq!(state.map(|s| s.track_id()), Some(3));
    assert!(scene.remove_animation_track(node, 3).is_none());
    assert!(!scene.get_node(node).unwrap().has_animation());
}

// ========== Tracking ==========

#[test]
fn test_tracking_fixed_location_points_forward_at_target() {
    let mut scene = Scene::new();
    let node = scene.add_default_node(None, None).unwrap();
    scene.set_node_target_location(node, Point3::new(0.0, 0.0, 10.0));

    scene.update(0.0);

    let forward = scene.get_node(node).unwrap().rotator().forward();
    assert_vec3_eq(forward.normalize(), Vector3::new(0.0, 0.0, 1.0));
}

#[test]
fn test_tracking_follows_moving_target() {
    let mut scene = Scene::new();
    let tracker = scene.add_default_node(None, None).unwrap();
    let target = scene.add_default_node(None, None).unwrap();
    scene.set_node_location(target, Vector3::new(10.0, 0.0, 0.0));
    scene.set_node_target(tracker, target);

    scene.update(0.0);
    let forward = scene.get_node(tracker).unwrap().rotator().forward();
    assert_vec3_eq(forward.normalize(), Vector3::new(1.0, 0.0, 0.0));

    scene.set_node_location(target, Vector3::new(0.0, 10.0, 0.0));
    scene.update(0.0);
    let forward = scene.get_node(tracker).unwrap().rotator().forward();
    assert_vec3_eq(forward.normalize(), Vector3::new(0.0, 1.0, 0.0));
}

#[test]
fn test_tracking_accounts_for_parent_transform() {
    let mut scene = Scene::new();
    let parent = scene.add_default_node(None, None).unwrap();
    let tracker = scene.add_default_node(Some(parent), None).unwrap();
    scene.set_node_location(parent, Vector3::new(0.0, 0.0, 5.0));
    scene.set_node_target_location(tracker, Point3::new(0.0, 0.0, 15.0));

    scene.update(0.0);

    // The tracker sits at world (0, 0, 5), so the target is 10 ahead on +Z.
    // World rotation must aim there even though the stored rotation is local.
    let world_rotation = scene.nodes_rotation(tracker);
    let world_forward = world_rotation.rotate_vector(Vector3::new(0.0, 0.0, 1.0));
    assert_vec3_eq(world_forward.normalize(), Vector3::new(0.0, 0.0, 1.0));
}

#[test]
fn test_removing_target_reverts_tracker_to_not_tracking() {
    let mut scene = Scene::new();
    let tracker = scene.add_default_node(None, None).unwrap();
    let target = scene.add_default_node(None, None).unwrap();
    scene.set_node_location(target, Vector3::new(10.0, 0.0, 0.0));
    scene.set_node_target(tracker, target);
    scene.update(0.0);

    let orientation_before = scene.get_node(tracker).unwrap().rotation_quaternion();
    scene.remove_node(target);

    let node = scene.get_node(tracker).unwrap();
    assert_eq!(node.rotator().tracking_mode(), TrackingMode::NotTracking);
    // The last tracked orientation persists
    let orientation_after = node.rotation_quaternion();
    assert!(orientation_before.dot(orientation_after).abs() > 1.0 - EPSILON);

    // Later updates don't resurrect tracking or panic
    scene.update(0.0);
    assert_eq!(
        scene.get_node(tracker).unwrap().rotator().tracking_mode(),
        TrackingMode::NotTracking
    );
}

// ========== Deferred attach ==========

#[test]
fn test_attach_queue_defers_until_update() {
    let mut scene = Scene::new();
    let root = scene.add_default_node(None, None).unwrap();

    let queue = scene.attach_queue();
    queue.enqueue(
        Some(root),
        NodeSeed {
            name: Some("queued".to_string()),
            location: Vector3::new(1.0, 2.0, 3.0),
            ..Default::default()
        },
    );

    // Not visible before the update pass drains the queue
    assert_eq!(scene.nodes.len(), 1);

    scene.update(0.0);

    assert_eq!(scene.nodes.len(), 2);
    let child = scene.get_node(root).unwrap().children()[0];
    let node = scene.get_node(child).unwrap();
    assert_eq!(node.name.as_deref(), Some("queued"));
    assert_vec3_eq(node.location(), Vector3::new(1.0, 2.0, 3.0));
}

#[test]
fn test_attach_queue_works_across_threads() {
    let mut scene = Scene::new();
    let root = scene.add_default_node(None, None).unwrap();
    let queue = scene.attach_queue();

    let handle = thread::spawn(move || {
        for i in 0..4 {
            queue.enqueue(
                Some(root),
                NodeSeed {
                    location: Vector3::new(i as f32, 0.0, 0.0),
                    ..Default::default()
                },
            );
        }
    });
    handle.join().unwrap();

    scene.update(0.0);
    assert_eq!(scene.get_node(root).unwrap().children().len(), 4);
}

#[test]
fn test_attach_queue_drops_requests_with_missing_parent() {
    let mut scene = Scene::new();
    let root = scene.add_default_node(None, None).unwrap();
    let queue = scene.attach_queue();
    scene.remove_node(root);

    queue.enqueue(Some(root), NodeSeed::default());
    scene.update(0.0);

    assert!(scene.nodes.is_empty());
}

// ========== Clone subtree ==========

#[test]
fn test_clone_subtree_copies_structure_with_fresh_ids() {
    let mut scene = Scene::new();
    let (root, child, grandchild) = build_chain(&mut scene);
    scene.set_node_location(child, Vector3::new(1.0, 1.0, 1.0));

    let copy = scene.clone_subtree(child, None).unwrap();

    assert_ne!(copy, child);
    assert_eq!(scene.get_node(copy).unwrap().parent(), None);
    assert!(scene.root_nodes().contains(&copy));
    assert_vec3_eq(
        scene.get_node(copy).unwrap().location(),
        Vector3::new(1.0, 1.0, 1.0),
    );

    // One copied child, itself a fresh id
    let copied_children = scene.get_node(copy).unwrap().children().to_vec();
    assert_eq!(copied_children.len(), 1);
    assert_ne!(copied_children[0], grandchild);

    // Mutating the copy leaves the source untouched
    scene.set_node_location(copy, Vector3::new(9.0, 9.0, 9.0));
    assert_vec3_eq(
        scene.get_node(child).unwrap().location(),
        Vector3::new(1.0, 1.0, 1.0),
    );
    let _ = root;
}

#[test]
fn test_clone_subtree_into_own_subtree_fails() {
    let mut scene = Scene::new();
    let (_root, child, grandchild) = build_chain(&mut scene);

    assert!(scene.clone_subtree(child, Some(child)).is_err());
    assert!(scene.clone_subtree(child, Some(grandchild)).is_err());
}

#[test]
fn test_clone_subtree_invalidates_ancestor_bounds() {
    let mut scene = Scene::new();
    let (root, _child, grandchild) = build_chain(&mut scene);
    let unit = Aabb::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));

    let far = scene.add_default_node(None, None).unwrap();
    scene.set_node_local_bounds(far, Some(unit));
    scene.set_node_location(far, Vector3::new(50.0, 0.0, 0.0));

    scene.set_node_local_bounds(root, Some(unit));
    let before = scene.nodes_bounding(root).unwrap();
    assert!((before.max.x - 1.0).abs() < 1e-4);

    // Attaching a clone deep in the tree must reach the root's cached box
    scene.clone_subtree(far, Some(grandchild)).unwrap();
    let after = scene.nodes_bounding(root).unwrap();
    assert!((after.max.x - 51.0).abs() < 1e-4);
}

#[test]
fn test_clone_subtree_shares_animation_content() {
    let mut scene = Scene::new();
    let node = scene.add_default_node(None, None).unwrap();
    let sampler = location_sampler(Vector3::new(2.0, 0.0, 0.0));
    scene.set_animation_track(node, 0, Arc::clone(&sampler));

    let copy = scene.clone_subtree(node, None).unwrap();

    assert!(scene.get_node(copy).unwrap().has_animation());
    // Playback state is independent
    scene.set_track_weight(copy, 0, 0.5);
    assert!((scene.track_weight(node, 0) - 1.0).abs() < EPSILON);
    assert!((scene.track_weight(copy, 0) - 0.5).abs() < EPSILON);
}

// ========== Transform listeners ==========

#[derive(Default)]
struct ListenerLog {
    changes: Vec<(NodeId, Vector3<f32>)>,
    destroyed: Vec<NodeId>,
}

struct RecordingListener {
    log: Rc<RefCell<ListenerLog>>,
}

impl TransformListener for RecordingListener {
    fn transform_changed(&mut self, node: NodeId, world: &Matrix4<f32>) {
        self.log
            .borrow_mut()
            .changes
            .push((node, translation_of(world)));
    }

    fn node_destroyed(&mut self, node: NodeId) {
        self.log.borrow_mut().destroyed.push(node);
    }
}

#[test]
fn test_listener_fires_once_per_rebuild_with_final_matrix() {
    let mut scene = Scene::new();
    let node = scene.add_default_node(None, None).unwrap();
    let log = Rc::new(RefCell::new(ListenerLog::default()));
    scene.add_transform_listener(node, Box::new(RecordingListener { log: Rc::clone(&log) }));

    scene.set_node_location(node, Vector3::new(1.0, 0.0, 0.0));
    scene.set_node_location(node, Vector3::new(2.0, 0.0, 0.0));
    scene.update(0.0);

    {
        let log = log.borrow();
        assert_eq!(log.changes.len(), 1);
        assert_eq!(log.changes[0].0, node);
        assert_vec3_eq(log.changes[0].1, Vector3::new(2.0, 0.0, 0.0));
    }

    // A quiet frame notifies nothing
    scene.update(0.0);
    assert_eq!(log.borrow().changes.len(), 1);
}

#[test]
fn test_listener_removed_on_node_destruction() {
    let mut scene = Scene::new();
    let node = scene.add_default_node(None, None).unwrap();
    let log = Rc::new(RefCell::new(ListenerLog::default()));
    scene.add_transform_listener(node, Box::new(RecordingListener { log: Rc::clone(&log) }));

    scene.remove_node(node);
    assert_eq!(log.borrow().destroyed, vec![node]);

    // The registration is gone; a new node reusing activity doesn't fire it
    scene.update(0.0);
    assert!(log.borrow().changes.is_empty());
}

#[test]
fn test_remove_transform_listener() {
    let mut scene = Scene::new();
    let node = scene.add_default_node(None, None).unwrap();
    let log = Rc::new(RefCell::new(ListenerLog::default()));
    let listener_id =
        scene.add_transform_listener(node, Box::new(RecordingListener { log: Rc::clone(&log) }));

    assert!(scene.remove_transform_listener(listener_id));
    assert!(!scene.remove_transform_listener(listener_id));

    scene.set_node_location(node, Vector3::new(1.0, 0.0, 0.0));
    scene.update(0.0);
    assert!(log.borrow().changes.is_empty());
}

// ========== Tree traversal ==========

#[test]
fn test_walk_tree_enter_exit_order_and_pruning() {
    struct Walk {
        entered: Vec<NodeId>,
        exited: Vec<NodeId>,
        prune: Option<NodeId>,
    }
    impl TreeVisitor for Walk {
        fn enter_node(&mut self, node: &Node) -> bool {
            self.entered.push(node.id);
            Some(node.id) != self.prune
        }
        fn exit_node(&mut self, node: &Node) {
            self.exited.push(node.id);
        }
    }

    let mut scene = Scene::new();
    let (root, child, grandchild) = build_chain(&mut scene);

    let mut walk = Walk {
        entered: Vec::new(),
        exited: Vec::new(),
        prune: None,
    };
    walk_tree(&scene, root, &mut walk);
    assert_eq!(walk.entered, vec![root, child, grandchild]);
    assert_eq!(walk.exited, vec![grandchild, child, root]);

    let mut walk = Walk {
        entered: Vec::new(),
        exited: Vec::new(),
        prune: Some(child),
    };
    walk_tree(&scene, root, &mut walk);
    assert_eq!(walk.entered, vec![root, child]);
}

// ========== Bounding volumes ==========

#[test]
fn test_nodes_bounding_merges_subtree() {
    let mut scene = Scene::new();
    let (root, child, _grandchild) = build_chain(&mut scene);
    let unit = Aabb::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));

    scene.set_node_local_bounds(root, Some(unit));
    scene.set_node_local_bounds(child, Some(unit));
    scene.set_node_location(child, Vector3::new(10.0, 0.0, 0.0));

    let bounds = scene.nodes_bounding(root).unwrap();
    assert!((bounds.min.x - -1.0).abs() < 1e-4);
    assert!((bounds.max.x - 11.0).abs() < 1e-4);
}

#[test]
fn test_bounds_padding_expands_world_box() {
    let mut scene = Scene::new();
    let node = scene.add_default_node(None, None).unwrap();
    let unit = Aabb::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
    scene.set_node_local_bounds(node, Some(unit));
    scene.set_node_bounds_padding(node, 0.5);

    let bounds = scene.nodes_bounding(node).unwrap();
    assert!((bounds.max.x - 1.5).abs() < 1e-4);
    assert!((bounds.min.y - -1.5).abs() < 1e-4);
}

#[test]
fn test_boundless_scene_has_no_bounding() {
    let mut scene = Scene::new();
    build_chain(&mut scene);
    assert!(scene.bounding().is_none());
}

#[test]
fn test_moving_a_node_invalidates_ancestor_bounds() {
    let mut scene = Scene::new();
    let (root, child, _grandchild) = build_chain(&mut scene);
    let unit = Aabb::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
    scene.set_node_local_bounds(child, Some(unit));

    let before = scene.nodes_bounding(root).unwrap();
    assert!((before.max.x - 1.0).abs() < 1e-4);

    scene.set_node_location(child, Vector3::new(5.0, 0.0, 0.0));
    let after = scene.nodes_bounding(root).unwrap();
    assert!((after.max.x - 6.0).abs() < 1e-4);
}

// ========== Scene lifecycle ==========

#[test]
fn test_clear_resets_ids_and_queue() {
    let mut scene = Scene::new();
    let (root, _child, _grandchild) = build_chain(&mut scene);
    let queue = scene.attach_queue();
    queue.enqueue(Some(root), NodeSeed::default());

    scene.clear();
    assert!(scene.nodes.is_empty());
    assert!(scene.root_nodes().is_empty());

    // Stale queued attaches against the old tree are gone
    scene.update(0.0);
    assert!(scene.nodes.is_empty());

    // Id allocation restarts
    let id = scene.add_default_node(None, None).unwrap();
    assert_eq!(id, 0);
}
