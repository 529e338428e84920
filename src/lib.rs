pub mod common;
pub mod scene;

pub use scene::{
    AnimationFrame, AnimationSampler, AnimationState, AttachQueue, Interpolation, KeyframeTrack,
    ListenerId, Node, NodeId, NodeSeed, Rotator, Scene, TargettingConstraint, TrackError, TrackId,
    TrackingMode, TransformListener, TreeVisitor, UpdateHooks, Visibility,
};
