//! # Tracks
//!
//! A track is a time-parameterized function that computes part of an object's
//! state. The concrete track types (position curves, IK solvers, constraint
//! chains, ...) live outside this crate; the evaluator and the undo engine
//! only rely on the contract below.

use smallvec::SmallVec;

use crate::id::ObjectId;
use crate::scene::Scene;

/// Coarse classification the evaluator dispatches on.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TrackKind {
    /// Drives the origin of the object's coordinate system.
    Position,
    /// Drives the orientation of the object's coordinate system.
    Rotation,
    /// Produces a pose keyframe to be applied to the geometry.
    Pose,
    /// Constrains the object against other objects' state.
    Constraint,
    /// Inverse kinematics. Treated like [`TrackKind::Pose`] for baseline
    /// classification and like [`TrackKind::Constraint`] for the
    /// leading-run scan after a direct edit.
    Ik,
    Other,
}

/// A pose produced by a track, applied to the object's geometry once the
/// object's whole track list has been evaluated.
pub trait Keyframe: Send + Sync {
    fn duplicate(&self) -> Box<dyn Keyframe>;
    fn as_any(&self) -> &dyn std::any::Any;
}

/// The contract a track must satisfy for the evaluator and the undo engine.
///
/// `apply` receives the whole scene: a track may read any object it declared
/// in [`Track::dependencies`] and writes the state of `target`. While a
/// track is being applied its owning object's track list is temporarily
/// detached from the scene, so `apply` must not inspect it.
pub trait Track: Send + Sync {
    fn kind(&self) -> TrackKind;
    fn is_enabled(&self) -> bool {
        true
    }
    /// A track that currently does nothing when applied (no keys, unbound
    /// handle, ...). Skipped by dependency scanning.
    fn is_null_track(&self) -> bool {
        false
    }
    /// Objects whose current state this track reads when applied.
    /// May legitimately form cycles with other objects' tracks.
    fn dependencies(&self) -> SmallVec<[ObjectId; 2]> {
        SmallVec::new()
    }
    /// Evaluate at `time` and write the result into `target`'s state.
    fn apply(&mut self, scene: &mut Scene, target: ObjectId, time: f64);
    fn duplicate(&self) -> Box<dyn Track>;
    /// Overwrite this track's keys and settings with `other`'s, in place.
    fn copy_from(&mut self, other: &dyn Track);
    fn as_any(&self) -> &dyn std::any::Any;
}
