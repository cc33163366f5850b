//! # Scene
//!
//! The mutable scene graph the undo engine and the track evaluator operate
//! on: a flat, ordered list of objects, a separate grouping relation between
//! them, and the scene-wide selection. The geometry of each object is opaque
//! to this crate and reached through [`ObjectGeometry`].

pub mod track;

use crate::id::ObjectId;
use crate::math::{CoordinateSystem, Vec3};
use track::{Keyframe, Track};

/// The contract the concrete geometry model must satisfy.
///
/// `type_tag` and `write_to` exist so a geometry snapshot captured by an undo
/// command can be spilled to a scratch file and reconstructed later through
/// the registry in [`crate::undo::cache`].
pub trait ObjectGeometry: Send + Sync {
    fn duplicate(&self) -> Box<dyn ObjectGeometry>;
    /// Overwrite this geometry in place with `other`'s state.
    fn copy_from(&mut self, other: &dyn ObjectGeometry);
    fn vertex_positions(&self) -> Vec<Vec3>;
    fn set_vertex_positions(&mut self, positions: &[Vec3]);
    fn skeleton(&self) -> Option<&Skeleton> {
        None
    }
    fn skeleton_mut(&mut self) -> Option<&mut Skeleton> {
        None
    }
    fn apply_pose(&mut self, pose: &dyn Keyframe) {
        let _ = pose;
    }
    /// Invalidate any baked derived meshes (subdivision, deformation, ...).
    fn clear_cached_meshes(&mut self) {}
    /// Stable tag identifying the concrete type inside a scratch file.
    fn type_tag(&self) -> &'static str;
    /// Serialize to a scratch file. Must write a self-delimiting encoding:
    /// the registered reconstructor reads exactly the bytes written here.
    fn write_to(&self, out: &mut dyn std::io::Write) -> std::io::Result<()>;
    fn as_any(&self) -> &dyn std::any::Any;
}

/// A joint hierarchy attached to a piece of geometry.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Skeleton {
    pub joints: Vec<Joint>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct Joint {
    pub id: u32,
    pub parent: Option<u32>,
    pub coords: CoordinateSystem,
}

impl Skeleton {
    pub fn copy_from(&mut self, other: &Skeleton) {
        self.joints.clone_from(&other.joints);
    }
}

/// One object in the scene: a name, opaque geometry, a coordinate system,
/// an ordered track list and its place in the grouping relation.
pub struct ObjectInfo {
    id: ObjectId,
    pub name: String,
    geometry: Box<dyn ObjectGeometry>,
    coords: CoordinateSystem,
    tracks: Vec<Box<dyn Track>>,
    children: Vec<ObjectId>,
    parent: Option<ObjectId>,
    pub selected: bool,
    pose: Option<Box<dyn Keyframe>>,
    distorted: bool,
}

impl ObjectInfo {
    pub fn new(name: impl Into<String>, geometry: Box<dyn ObjectGeometry>) -> Self {
        Self {
            id: ObjectId::next(),
            name: name.into(),
            geometry,
            coords: CoordinateSystem::default(),
            tracks: Vec::new(),
            children: Vec::new(),
            parent: None,
            selected: false,
            pose: None,
            distorted: false,
        }
    }
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }
    #[must_use]
    pub fn geometry(&self) -> &dyn ObjectGeometry {
        &*self.geometry
    }
    pub fn geometry_mut(&mut self) -> &mut dyn ObjectGeometry {
        &mut *self.geometry
    }
    /// Swap in a whole new geometry, returning the old one.
    pub fn set_geometry(&mut self, geometry: Box<dyn ObjectGeometry>) -> Box<dyn ObjectGeometry> {
        std::mem::replace(&mut self.geometry, geometry)
    }
    #[must_use]
    pub fn coords(&self) -> &CoordinateSystem {
        &self.coords
    }
    pub fn coords_mut(&mut self) -> &mut CoordinateSystem {
        &mut self.coords
    }
    #[must_use]
    pub fn tracks(&self) -> &[Box<dyn Track>] {
        &self.tracks
    }
    pub fn tracks_mut(&mut self) -> &mut Vec<Box<dyn Track>> {
        &mut self.tracks
    }
    pub fn add_track(&mut self, track: Box<dyn Track>) {
        self.tracks.push(track);
    }
    /// Swap in a whole new track list, returning the old one.
    pub fn set_tracks(&mut self, tracks: Vec<Box<dyn Track>>) -> Vec<Box<dyn Track>> {
        std::mem::replace(&mut self.tracks, tracks)
    }
    /// Detach the track list so it can be walked while the scene is mutated.
    /// Pair with [`ObjectInfo::set_tracks`].
    pub(crate) fn take_tracks(&mut self) -> Vec<Box<dyn Track>> {
        std::mem::take(&mut self.tracks)
    }
    #[must_use]
    pub fn children(&self) -> &[ObjectId] {
        &self.children
    }
    #[must_use]
    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }
    #[must_use]
    pub fn pose(&self) -> Option<&dyn Keyframe> {
        self.pose.as_deref()
    }
    pub fn set_pose(&mut self, pose: Option<Box<dyn Keyframe>>) {
        self.pose = pose;
    }
    /// Apply the pending pose keyframe (if any) to the geometry.
    /// The keyframe stays pending afterwards.
    pub fn apply_pending_pose(&mut self) {
        if let Some(pose) = &self.pose {
            self.geometry.apply_pose(&**pose);
        }
    }
    #[must_use]
    pub fn is_distorted(&self) -> bool {
        self.distorted
    }
    pub fn set_distortion(&mut self, distorted: bool) {
        self.distorted = distorted;
    }
    pub fn clear_distortion(&mut self) {
        self.distorted = false;
    }
    /// Deep copy keeping the same id - a snapshot of this object, not a new
    /// object.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            geometry: self.geometry.duplicate(),
            coords: self.coords.clone(),
            tracks: self.tracks.iter().map(|t| t.duplicate()).collect(),
            children: self.children.clone(),
            parent: self.parent,
            selected: self.selected,
            pose: self.pose.as_ref().map(|p| p.duplicate()),
            distorted: self.distorted,
        }
    }
    /// Overwrite everything but identity and group structure with `other`'s
    /// state. Group membership is restored by its own commands.
    pub fn copy_info_from(&mut self, other: &ObjectInfo) {
        self.name.clone_from(&other.name);
        self.geometry = other.geometry.duplicate();
        self.coords = other.coords.clone();
        self.tracks = other.tracks.iter().map(|t| t.duplicate()).collect();
        self.selected = other.selected;
        self.pose = other.pose.as_ref().map(|p| p.duplicate());
        self.distorted = other.distorted;
    }
}

/// The scene graph: objects in scene order plus selection and clock state.
#[derive(Default)]
pub struct Scene {
    objects: Vec<ObjectInfo>,
    selection: Vec<usize>,
    time: f64,
}

impl Scene {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
    #[must_use]
    pub fn time(&self) -> f64 {
        self.time
    }
    /// Store the clock value. Does not re-evaluate anything - that is
    /// [`crate::eval::apply_full`]'s job.
    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }
    #[must_use]
    pub fn objects(&self) -> &[ObjectInfo] {
        &self.objects
    }
    pub fn objects_mut(&mut self) -> &mut [ObjectInfo] {
        &mut self.objects
    }
    #[must_use]
    pub fn object(&self, index: usize) -> Option<&ObjectInfo> {
        self.objects.get(index)
    }
    pub fn object_mut(&mut self, index: usize) -> Option<&mut ObjectInfo> {
        self.objects.get_mut(index)
    }
    #[must_use]
    pub fn index_of(&self, id: ObjectId) -> Option<usize> {
        self.objects.iter().position(|info| info.id == id)
    }
    #[must_use]
    pub fn get(&self, id: ObjectId) -> Option<&ObjectInfo> {
        self.objects.iter().find(|info| info.id == id)
    }
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut ObjectInfo> {
        self.objects.iter_mut().find(|info| info.id == id)
    }

    /// Insert `info` at `index` (clamped), shifting selection indices to
    /// keep them pointing at the same objects.
    pub fn add_object(&mut self, info: ObjectInfo, index: usize) {
        let index = index.min(self.objects.len());
        for sel in &mut self.selection {
            if *sel >= index {
                *sel += 1;
            }
        }
        self.objects.insert(index, info);
    }

    /// Remove and return the object at `index`, fixing up selection indices.
    pub fn remove_object(&mut self, index: usize) -> ObjectInfo {
        self.selection.retain(|&sel| sel != index);
        for sel in &mut self.selection {
            if *sel > index {
                *sel -= 1;
            }
        }
        self.objects.remove(index)
    }

    #[must_use]
    pub fn selection(&self) -> &[usize] {
        &self.selection
    }

    /// Replace the scene-wide selection. Out-of-range indices are dropped;
    /// per-object `selected` flags are kept in sync.
    pub fn set_selection(&mut self, selection: &[usize]) {
        for info in &mut self.objects {
            info.selected = false;
        }
        self.selection.clear();
        for &index in selection {
            if let Some(info) = self.objects.get_mut(index) {
                if !info.selected {
                    info.selected = true;
                    self.selection.push(index);
                }
            }
        }
    }

    /// Dedup on the index list, not the per-object flag: an object can
    /// arrive in the scene with `selected` already set (restored from a
    /// snapshot) before it has an entry here.
    pub fn add_to_selection(&mut self, index: usize) {
        if let Some(info) = self.objects.get_mut(index) {
            info.selected = true;
            if !self.selection.contains(&index) {
                self.selection.push(index);
            }
        }
    }

    /// Invalidate derived state after `id`'s geometry was mutated behind the
    /// tracks' back (e.g. by a Copy command).
    pub fn object_modified(&mut self, id: ObjectId) {
        if let Some(info) = self.get_mut(id) {
            info.set_pose(None);
            info.geometry_mut().clear_cached_meshes();
        }
    }

    /// Insert `child` into `group`'s children at `position` (clamped) and
    /// reparent it.
    pub fn add_to_group(&mut self, group: ObjectId, child: ObjectId, position: usize) {
        let group_info = self.get_mut(group).expect("group not present in scene");
        let position = position.min(group_info.children.len());
        group_info.children.insert(position, child);
        if let Some(child_info) = self.get_mut(child) {
            child_info.parent = Some(group);
        }
    }

    /// Remove `child` from `group`, returning the position it held, or None
    /// if the relationship does not exist (already severed).
    pub fn remove_from_group(&mut self, group: ObjectId, child: ObjectId) -> Option<usize> {
        let group_info = self.get_mut(group)?;
        let position = group_info.children.iter().position(|&c| c == child)?;
        group_info.children.remove(position);
        if let Some(child_info) = self.get_mut(child) {
            child_info.parent = None;
        }
        Some(position)
    }

    /// Replace `group`'s entire child list, reparenting both the outgoing
    /// and incoming children. Returns the old list.
    pub fn set_group_contents(&mut self, group: ObjectId, children: Vec<ObjectId>) -> Vec<ObjectId> {
        let old = {
            let group_info = self.get_mut(group).expect("group not present in scene");
            std::mem::replace(&mut group_info.children, children)
        };
        for &id in &old {
            if let Some(info) = self.get_mut(id) {
                info.parent = None;
            }
        }
        let new: Vec<ObjectId> = self
            .get(group)
            .expect("group not present in scene")
            .children
            .clone();
        for id in new {
            if let Some(info) = self.get_mut(id) {
                info.parent = Some(group);
            }
        }
        old
    }
}


#[cfg(test)]
mod test {
    use super::test_support::NullGeometry;
    use super::*;

    fn object(name: &str) -> ObjectInfo {
        ObjectInfo::new(name, Box::new(NullGeometry))
    }

    #[test]
    fn group_round_trip() {
        let mut scene = Scene::new();
        let group = object("group");
        let child = object("child");
        let (gid, cid) = (group.id(), child.id());
        scene.add_object(group, 0);
        scene.add_object(child, 1);

        scene.add_to_group(gid, cid, 5);
        assert_eq!(scene.get(gid).unwrap().children(), &[cid]);
        assert_eq!(scene.get(cid).unwrap().parent(), Some(gid));

        assert_eq!(scene.remove_from_group(gid, cid), Some(0));
        assert_eq!(scene.get(cid).unwrap().parent(), None);
        // Severing twice is not an error.
        assert_eq!(scene.remove_from_group(gid, cid), None);
    }

    #[test]
    fn selection_tracks_structure() {
        let mut scene = Scene::new();
        scene.add_object(object("a"), 0);
        scene.add_object(object("b"), 1);
        scene.add_object(object("c"), 2);
        scene.set_selection(&[1, 2, 2, 9]);
        assert_eq!(scene.selection(), &[1, 2]);
        assert!(scene.object(1).unwrap().selected);

        // Insert ahead of the selection: indices shift.
        scene.add_object(object("d"), 0);
        assert_eq!(scene.selection(), &[2, 3]);

        // Remove a selected object: it leaves the selection.
        scene.remove_object(2);
        assert_eq!(scene.selection(), &[2]);
    }

    #[test]
    fn preselected_object_still_joins_selection() {
        let mut scene = Scene::new();
        let mut info = object("restored");
        info.selected = true;
        scene.add_object(info, 0);
        assert!(scene.selection().is_empty(), "flag alone is not a selection");

        scene.add_to_selection(0);
        assert_eq!(scene.selection(), &[0]);
        // Idempotent.
        scene.add_to_selection(0);
        assert_eq!(scene.selection(), &[0]);
    }

    #[test]
    fn duplicate_keeps_identity() {
        let mut info = object("original");
        info.coords_mut().set_origin(Vec3::new(1.0, 0.0, 0.0));
        let copy = info.duplicate();
        assert_eq!(copy.id(), info.id());
        assert_eq!(copy.name, "original");
        assert_eq!(copy.coords(), info.coords());
    }
}
