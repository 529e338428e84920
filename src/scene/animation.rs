//! Animation tracks, sampling, and blending.
//!
//! A node can carry any number of independently weighted animation states,
//! one per track id. Each state samples an external, time-indexed content
//! source ([`AnimationSampler`]) at a normalized time and caches the result;
//! the update pass blends all cached samples into the node's location,
//! rotation, and scale before the node's matrices are rebuilt.

use std::sync::Arc;

use cgmath::{Quaternion, Vector3};
use thiserror::Error;

/// Identifier for one animation track on a node.
pub type TrackId = u32;

/// The property values a track supplies at one point in time.
///
/// A track may animate any subset of the three properties; absent properties
/// leave the node's current value untouched during blending.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AnimationFrame {
    pub location: Option<Vector3<f32>>,
    pub rotation: Option<Quaternion<f32>>,
    pub scale: Option<Vector3<f32>>,
}

impl AnimationFrame {
    /// True if the frame supplies at least one property.
    pub fn contributes(&self) -> bool {
        self.location.is_some() || self.rotation.is_some() || self.scale.is_some()
    }
}

/// A time-indexed animation content source.
///
/// The transform core treats this as an opaque sampling function over
/// normalized time. Sources are shared (`Arc`) between the animation states
/// that reference them; playback state lives in [`AnimationState`], not here.
pub trait AnimationSampler: Send + Sync {
    /// Number of keyframes in the source. A source with zero frames
    /// contributes nothing when sampled.
    fn frame_count(&self) -> usize;

    /// Samples the source at normalized time `t` in [0, 1].
    fn sample(&self, t: f32) -> AnimationFrame;
}

/// Errors constructing a [`KeyframeTrack`] from raw channel data.
#[derive(Error, Debug)]
pub enum TrackError {
    #[error("keyframe times and values differ in length ({times} times, {values} values)")]
    LengthMismatch { times: usize, values: usize },
    #[error("keyframe times must be in ascending order")]
    UnsortedTimes,
}

/// How values between two keyframes are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// Hold the earlier keyframe's value.
    Step,
    /// Linear interpolation for vectors, spherical interpolation for
    /// rotations.
    Linear,
}

/// One keyed channel: parallel keyframe times (normalized to [0, 1]) and
/// values.
#[derive(Debug, Clone)]
struct Channel<T> {
    times: Vec<f32>,
    values: Vec<T>,
}

impl<T: Copy> Channel<T> {
    fn new(times: Vec<f32>, values: Vec<T>) -> Result<Self, TrackError> {
        if times.len() != values.len() {
            return Err(TrackError::LengthMismatch {
                times: times.len(),
                values: values.len(),
            });
        }
        if times.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(TrackError::UnsortedTimes);
        }
        Ok(Self { times, values })
    }

    /// Finds the keyframe interval containing `t` and the interpolation
    /// factor within it via binary search.
    fn interval(&self, t: f32) -> Option<(usize, usize, f32)> {
        if self.times.is_empty() {
            return None;
        }
        if self.times.len() == 1 || t <= self.times[0] {
            return Some((0, 0, 0.0));
        }
        let last = self.times.len() - 1;
        if t >= self.times[last] {
            return Some((last, last, 0.0));
        }

        let mut lo = 0;
        let mut hi = last;
        while lo < hi - 1 {
            let mid = (lo + hi) / 2;
            if self.times[mid] <= t {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        let t0 = self.times[lo];
        let t1 = self.times[hi];
        let span = t1 - t0;
        let factor = if span > 0.0 { (t - t0) / span } else { 0.0 };
        Some((lo, hi, factor))
    }

    fn sample(&self, t: f32, lerp: impl Fn(T, T, f32) -> T) -> Option<T> {
        let (i0, i1, factor) = self.interval(t)?;
        let v0 = self.values[i0];
        if i0 == i1 || factor <= 0.0 {
            return Some(v0);
        }
        Some(lerp(v0, self.values[i1], factor))
    }
}

/// A concrete keyframe-based animation content source.
///
/// Channels are optional; a track that only keys location leaves rotation
/// and scale alone. Times are normalized to [0, 1].
#[derive(Debug, Clone, Default)]
pub struct KeyframeTrack {
    location: Option<Channel<Vector3<f32>>>,
    rotation: Option<Channel<Quaternion<f32>>>,
    scale: Option<Channel<Vector3<f32>>>,
    interpolation: Interpolation,
}

impl Default for Interpolation {
    fn default() -> Self {
        Self::Linear
    }
}

impl KeyframeTrack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn with_location_channel(
        mut self,
        times: Vec<f32>,
        values: Vec<Vector3<f32>>,
    ) -> Result<Self, TrackError> {
        self.location = Some(Channel::new(times, values)?);
        Ok(self)
    }

    pub fn with_rotation_channel(
        mut self,
        times: Vec<f32>,
        values: Vec<Quaternion<f32>>,
    ) -> Result<Self, TrackError> {
        self.rotation = Some(Channel::new(times, values)?);
        Ok(self)
    }

    pub fn with_scale_channel(
        mut self,
        times: Vec<f32>,
        values: Vec<Vector3<f32>>,
    ) -> Result<Self, TrackError> {
        self.scale = Some(Channel::new(times, values)?);
        Ok(self)
    }
}

fn lerp_vec3(a: Vector3<f32>, b: Vector3<f32>, t: f32) -> Vector3<f32> {
    a + (b - a) * t
}

impl AnimationSampler for KeyframeTrack {
    fn frame_count(&self) -> usize {
        let lens = [
            self.location.as_ref().map_or(0, |c| c.times.len()),
            self.rotation.as_ref().map_or(0, |c| c.times.len()),
            self.scale.as_ref().map_or(0, |c| c.times.len()),
        ];
        lens.into_iter().max().unwrap_or(0)
    }

    fn sample(&self, t: f32) -> AnimationFrame {
        let t = t.clamp(0.0, 1.0);
        let step = self.interpolation == Interpolation::Step;

        AnimationFrame {
            location: self.location.as_ref().and_then(|c| {
                c.sample(t, |a, b, f| if step { a } else { lerp_vec3(a, b, f) })
            }),
            rotation: self.rotation.as_ref().and_then(|c| {
                c.sample(t, |a, b, f| if step { a } else { a.slerp(b, f) })
            }),
            scale: self.scale.as_ref().and_then(|c| {
                c.sample(t, |a, b, f| if step { a } else { lerp_vec3(a, b, f) })
            }),
        }
    }
}

/// Per-node, per-track playback state over a shared content source.
#[derive(Clone)]
pub struct AnimationState {
    track_id: TrackId,
    sampler: Arc<dyn AnimationSampler>,
    blend_weight: f32,
    enabled: bool,
    /// Normalized playback position in [0, 1].
    current_time: f32,
    /// Playback rate in normalized time per second.
    speed: f32,
    looping: bool,
    sampled: AnimationFrame,
}

impl std::fmt::Debug for AnimationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimationState")
            .field("track_id", &self.track_id)
            .field("blend_weight", &self.blend_weight)
            .field("enabled", &self.enabled)
            .field("current_time", &self.current_time)
            .field("speed", &self.speed)
            .field("looping", &self.looping)
            .finish()
    }
}

impl AnimationState {
    pub fn new(track_id: TrackId, sampler: Arc<dyn AnimationSampler>) -> Self {
        Self {
            track_id,
            sampler,
            blend_weight: 1.0,
            enabled: true,
            current_time: 0.0,
            speed: 1.0,
            looping: true,
            sampled: AnimationFrame::default(),
        }
    }

    pub fn track_id(&self) -> TrackId {
        self.track_id
    }

    pub fn blend_weight(&self) -> f32 {
        self.blend_weight
    }

    pub fn set_blend_weight(&mut self, weight: f32) {
        self.blend_weight = weight;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn current_time(&self) -> f32 {
        self.current_time
    }

    pub fn set_current_time(&mut self, t: f32) {
        self.current_time = t.clamp(0.0, 1.0);
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.speed = speed;
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// The most recently sampled frame.
    pub fn sampled(&self) -> AnimationFrame {
        self.sampled
    }

    /// Advances the normalized playback position by `dt` seconds, wrapping
    /// when looping and clamping at the end otherwise. Returns the new
    /// position.
    pub fn advance(&mut self, dt: f32) -> f32 {
        let mut t = self.current_time + dt * self.speed;
        if self.looping {
            t = t.rem_euclid(1.0);
        } else {
            t = t.clamp(0.0, 1.0);
        }
        self.current_time = t;
        t
    }

    /// Samples the content source at normalized time `t` (clamped) and
    /// caches the result. Returns true if the sample supplies any property;
    /// a zero-frame source always returns false.
    pub fn establish_frame_at(&mut self, t: f32) -> bool {
        if self.sampler.frame_count() == 0 {
            self.sampled = AnimationFrame::default();
            return false;
        }
        self.sampled = self.sampler.sample(t.clamp(0.0, 1.0));
        self.sampled.contributes()
    }

    /// True if this state takes part in blending: enabled, non-zero weight,
    /// and backed by a source with at least one frame.
    pub fn contributes(&self) -> bool {
        self.enabled && self.blend_weight != 0.0 && self.sampler.frame_count() > 0
    }
}

/// Blends the cached samples of the given states into a single frame.
///
/// For each property independently: the weighted linear average over the
/// contributing tracks for location and scale, and a weighted spherical
/// interpolation fold for rotation. The fold visits states in iteration
/// order, which callers keep deterministic by storing states in ascending
/// track-id order; quaternion blending is not order-independent.
pub fn blend_states<'a>(states: impl Iterator<Item = &'a AnimationState>) -> AnimationFrame {
    let mut location_sum = Vector3::new(0.0, 0.0, 0.0);
    let mut location_weight = 0.0f32;
    let mut scale_sum = Vector3::new(0.0, 0.0, 0.0);
    let mut scale_weight = 0.0f32;
    let mut rotation: Option<Quaternion<f32>> = None;
    let mut rotation_weight = 0.0f32;

    for state in states.filter(|s| s.contributes()) {
        let weight = state.blend_weight();
        let frame = state.sampled();

        if let Some(value) = frame.location {
            location_sum += value * weight;
            location_weight += weight;
        }
        if let Some(value) = frame.scale {
            scale_sum += value * weight;
            scale_weight += weight;
        }
        if let Some(value) = frame.rotation {
            rotation = Some(match rotation {
                None => value,
                Some(acc) => acc.slerp(value, weight / (rotation_weight + weight)),
            });
            rotation_weight += weight;
        }
    }

    AnimationFrame {
        location: (location_weight != 0.0).then(|| location_sum / location_weight),
        rotation,
        scale: (scale_weight != 0.0).then(|| scale_sum / scale_weight),
    }
}
