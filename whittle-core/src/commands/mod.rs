//! # Commands
//!
//! One atomic mutation of the scene, as recorded into an [`crate::undo::UndoRecord`].
//! Every command is a closed variant carrying exactly the payload its
//! execution needs - a malformed command is unrepresentable, so execution
//! never validates argument shapes at runtime.

use std::sync::Arc;

use bitvec::vec::BitVec;
use parking_lot::Mutex;

use crate::id::ObjectId;
use crate::math::{CoordinateSystem, Vec3};
use crate::scene::track::Track;
use crate::scene::{ObjectGeometry, ObjectInfo, Scene, Skeleton};

/// Ownership state of a payload that may be spilled to a scratch file.
///
/// Executing a command requires `Resident`; [`crate::undo::UndoRecord::execute`]
/// reloads everything up front, so an `Evicted` payload reaching a handler is
/// a bug in the cache, not a runtime condition.
pub enum Payload<T> {
    Resident(T),
    Evicted,
}

impl<T> Payload<T> {
    #[must_use]
    pub fn resident(&self) -> Option<&T> {
        match self {
            Self::Resident(value) => Some(value),
            Self::Evicted => None,
        }
    }
    /// Move the value out, leaving the slot evicted.
    pub fn take(&mut self) -> Option<T> {
        match std::mem::replace(self, Self::Evicted) {
            Self::Resident(value) => Some(value),
            Self::Evicted => None,
        }
    }
    #[must_use]
    pub fn is_evicted(&self) -> bool {
        matches!(self, Self::Evicted)
    }
}

/// An immutable geometry snapshot captured for undo. Shared so the payload
/// cache can retain a best-effort clone after spilling it.
pub type GeometrySnapshot = Arc<dyn ObjectGeometry>;
pub type SharedMeshController = Arc<Mutex<dyn MeshEditController>>;
pub type SharedEdit = Arc<Mutex<dyn UndoableEdit>>;

/// Which mesh components a [`MeshEditController`] selection addresses.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MeshSelectionMode {
    Point,
    Edge,
    Face,
}

/// The component-selection state of an open mesh editor. Out of scope here;
/// commands only capture and restore its mode and mask.
pub trait MeshEditController: Send {
    fn selection_mode(&self) -> MeshSelectionMode;
    fn selection(&self) -> BitVec;
    fn set_selection_mode(&mut self, mode: MeshSelectionMode);
    fn set_selection(&mut self, selection: BitVec);
}

/// A self-inverting edit supplied by a tool. The same edit object flips
/// between its two states as the record and its inverses are executed.
pub trait UndoableEdit: Send {
    fn name(&self) -> &str;
    fn undo(&mut self, scene: &mut Scene);
    fn redo(&mut self, scene: &mut Scene);
}

pub enum Command {
    /// Overwrite the target's geometry in place with the snapshot.
    /// Heavy: the snapshot mirrors arbitrary mesh data.
    CopyObject {
        target: ObjectId,
        snapshot: Payload<GeometrySnapshot>,
    },
    /// Overwrite the target's coordinate system in place.
    CopyCoords {
        target: ObjectId,
        coords: CoordinateSystem,
    },
    /// Overwrite everything but identity and group structure.
    CopyObjectInfo {
        target: ObjectId,
        snapshot: Box<ObjectInfo>,
    },
    /// Swap in a whole new geometry object.
    SetObject {
        target: ObjectId,
        geometry: Box<dyn ObjectGeometry>,
    },
    /// Ask the editing surface to insert the object at `index`.
    AddObject { info: Box<ObjectInfo>, index: usize },
    /// Ask the editing surface to remove the object at `index`.
    DeleteObject { index: usize },
    RenameObject { index: usize, name: String },
    AddToGroup {
        group: ObjectId,
        child: ObjectId,
        position: usize,
    },
    RemoveFromGroup { group: ObjectId, child: ObjectId },
    SetGroupContents {
        group: ObjectId,
        children: Vec<ObjectId>,
    },
    /// Replace one track of the target.
    SetTrack {
        target: ObjectId,
        index: usize,
        track: Box<dyn Track>,
    },
    /// Replace the target's whole track list.
    SetTrackList {
        target: ObjectId,
        tracks: Vec<Box<dyn Track>>,
    },
    /// Overwrite one track of the target in place with the snapshot.
    CopyTrack {
        target: ObjectId,
        index: usize,
        snapshot: Box<dyn Track>,
    },
    /// Overwrite the target's vertex positions.
    /// Heavy: the array length is bounded only by the mesh.
    CopyVertexPositions {
        target: ObjectId,
        positions: Payload<Arc<[Vec3]>>,
    },
    CopySkeleton {
        target: ObjectId,
        skeleton: Skeleton,
    },
    SetMeshSelection {
        controller: SharedMeshController,
        mode: MeshSelectionMode,
        mask: BitVec,
    },
    SetSceneSelection { selection: Vec<usize> },
    /// Defer to a self-inverting edit object.
    UserDefined { edit: SharedEdit },
}

impl Command {
    /// Whether this command's payload is unbounded by construction and
    /// eligible for spilling to a scratch file.
    #[must_use]
    pub fn is_heavy(&self) -> bool {
        matches!(
            self,
            Self::CopyObject { .. } | Self::CopyVertexPositions { .. }
        )
    }
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Self::CopyObject { .. } => "CopyObject",
            Self::CopyCoords { .. } => "CopyCoords",
            Self::CopyObjectInfo { .. } => "CopyObjectInfo",
            Self::SetObject { .. } => "SetObject",
            Self::AddObject { .. } => "AddObject",
            Self::DeleteObject { .. } => "DeleteObject",
            Self::RenameObject { .. } => "RenameObject",
            Self::AddToGroup { .. } => "AddToGroup",
            Self::RemoveFromGroup { .. } => "RemoveFromGroup",
            Self::SetGroupContents { .. } => "SetGroupContents",
            Self::SetTrack { .. } => "SetTrack",
            Self::SetTrackList { .. } => "SetTrackList",
            Self::CopyTrack { .. } => "CopyTrack",
            Self::CopyVertexPositions { .. } => "CopyVertexPositions",
            Self::CopySkeleton { .. } => "CopySkeleton",
            Self::SetMeshSelection { .. } => "SetMeshSelection",
            Self::SetSceneSelection { .. } => "SetSceneSelection",
            Self::UserDefined { .. } => "UserDefined",
        }
    }
}

// Hand-written: several payloads are trait objects with no Debug bound.
impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct(self.kind_name());
        match self {
            Self::CopyObject { target, snapshot } => {
                s.field("target", target)
                    .field("evicted", &snapshot.is_evicted());
            }
            Self::CopyVertexPositions { target, positions } => {
                s.field("target", target)
                    .field("evicted", &positions.is_evicted());
            }
            Self::CopyCoords { target, .. }
            | Self::CopyObjectInfo { target, .. }
            | Self::SetObject { target, .. }
            | Self::SetTrack { target, .. }
            | Self::SetTrackList { target, .. }
            | Self::CopyTrack { target, .. }
            | Self::CopySkeleton { target, .. } => {
                s.field("target", target);
            }
            Self::AddObject { index, .. }
            | Self::DeleteObject { index }
            | Self::RenameObject { index, .. } => {
                s.field("index", index);
            }
            Self::AddToGroup { group, child, .. } | Self::RemoveFromGroup { group, child } => {
                s.field("group", group).field("child", child);
            }
            Self::SetGroupContents { group, .. } => {
                s.field("group", group);
            }
            Self::SetSceneSelection { selection } => {
                s.field("selection", selection);
            }
            Self::SetMeshSelection { .. } | Self::UserDefined { .. } => {}
        }
        s.finish()
    }
}
