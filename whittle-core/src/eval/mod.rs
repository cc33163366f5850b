//! # Evaluation
//!
//! Re-derives object state from tracks. Three entry points:
//!
//! * [`apply_full`] moves the scene clock and re-evaluates every object.
//! * [`apply_after_edit`] re-evaluates the minimal change set after objects
//!   were edited directly: only the edited objects and the objects whose
//!   tracks (transitively) depend on them get their tracks re-applied.
//! * [`apply_to_object`] re-evaluates a single object and its dependencies.
//!
//! Dependencies between tracks may form cycles. The pass tolerates them with
//! a first-visit-wins rule: each object is evaluated at most once, and a
//! dependency that is already in progress is read as-is rather than
//! re-entered. The result is an approximation for genuinely cyclic setups
//! (mutual constraints settle over successive passes, not within one), and
//! exact for acyclic ones.

use crate::context::DerivedStateObserver;
use crate::id::ObjectId;
use crate::math::Vec3;
use crate::scene::track::{Track, TrackKind};
use crate::scene::Scene;

/// Per-pass bookkeeping, indexed by scene position.
struct Pass {
    processed: Vec<bool>,
    /// `None` means every object is treated as changed (full re-evaluation).
    changed: Option<Vec<bool>>,
}

impl Pass {
    fn full(len: usize) -> Self {
        Self {
            processed: vec![false; len],
            changed: None,
        }
    }
    fn tracking(len: usize) -> Self {
        Self {
            processed: vec![false; len],
            changed: Some(vec![false; len]),
        }
    }
    fn is_changed(&self, index: usize) -> bool {
        self.changed.as_ref().map_or(true, |c| c[index])
    }
    fn mark_changed(&mut self, index: usize) {
        if let Some(changed) = &mut self.changed {
            changed[index] = true;
        }
    }
}

/// Move the scene clock to `time` and re-evaluate every object's tracks.
pub fn apply_full(scene: &mut Scene, time: f64, observer: &mut dyn DerivedStateObserver) {
    scene.set_time(time);
    let mut pass = Pass::full(scene.len());
    for index in 0..scene.len() {
        evaluate(scene, index, &mut pass, observer);
    }
}

/// Re-evaluate one object (and, first, anything it depends on) at the
/// current scene time. Unknown ids are ignored.
pub fn apply_to_object(scene: &mut Scene, target: ObjectId, observer: &mut dyn DerivedStateObserver) {
    let Some(index) = scene.index_of(target) else {
        return;
    };
    let mut pass = Pass::full(scene.len());
    evaluate(scene, index, &mut pass, observer);
}

/// Propagate a direct edit of `edited` through the dependency graph.
///
/// The edited objects themselves are not re-driven by their animation
/// tracks (that would overwrite the edit); only their leading run of
/// constraint-style tracks is re-applied, so constraints keep holding.
/// Every other object is re-evaluated only if some track of it depends,
/// transitively, on a changed object.
pub fn apply_after_edit(
    scene: &mut Scene,
    edited: &[ObjectId],
    observer: &mut dyn DerivedStateObserver,
) {
    let time = scene.time();
    let mut pass = Pass::tracking(scene.len());
    for &id in edited {
        let Some(index) = scene.index_of(id) else {
            continue;
        };
        pass.processed[index] = true;
        pass.mark_changed(index);

        let mut tracks = scene.objects_mut()[index].take_tracks();
        let run = tracks
            .iter()
            .position(|t| !is_constraint_style(&**t))
            .unwrap_or(tracks.len());
        for track in tracks[..run].iter_mut().rev() {
            if track.is_enabled() {
                track.apply(scene, id, time);
            }
        }
        let info = &mut scene.objects_mut()[index];
        info.set_tracks(tracks);
        info.apply_pending_pose();
    }
    // Edited objects are notified by the revisit path of the pass below.
    for index in 0..scene.len() {
        evaluate(scene, index, &mut pass, observer);
    }
}

fn is_constraint_style(track: &dyn Track) -> bool {
    matches!(track.kind(), TrackKind::Constraint | TrackKind::Ik) || track.is_null_track()
}

/// Evaluate one object's tracks, recursing into unprocessed dependencies
/// first. Applies nothing (and raises no notification) when change tracking
/// is on and no dependency changed. A revisit of an already-processed
/// object re-raises the notification without re-deriving anything.
fn evaluate(scene: &mut Scene, index: usize, pass: &mut Pass, observer: &mut dyn DerivedStateObserver) {
    if pass.processed[index] {
        // Already settled in this pass, but a revisit means someone reads
        // this object's state: re-raise the invalidation signal.
        observer.derived_state_changed(scene.objects()[index].id());
        return;
    }
    pass.processed[index] = true;

    let id = scene.objects()[index].id();
    let time = scene.time();
    // Detach the track list so recursion and `apply` can take the scene
    // mutably. Reattached on every exit path below.
    let mut tracks = scene.objects_mut()[index].take_tracks();

    let mut changed = pass.is_changed(index);
    for track in &tracks {
        if track.is_null_track() || !track.is_enabled() {
            continue;
        }
        for dep in track.dependencies() {
            let Some(dep_index) = scene.index_of(dep) else {
                continue;
            };
            evaluate(scene, dep_index, pass, observer);
            if pass.is_changed(dep_index) {
                changed = true;
            }
        }
    }
    if !changed {
        scene.objects_mut()[index].set_tracks(tracks);
        return;
    }
    pass.mark_changed(index);

    // Tracks overwrite rather than accumulate: zero the baselines a track
    // class is about to drive, so a disabled or deleted track leaves no
    // stale contribution behind.
    let mut drives_position = false;
    let mut drives_rotation = false;
    let mut drives_pose = false;
    for track in &tracks {
        if !track.is_enabled() {
            continue;
        }
        match track.kind() {
            TrackKind::Position => drives_position = true,
            TrackKind::Rotation => drives_rotation = true,
            TrackKind::Pose | TrackKind::Ik => drives_pose = true,
            TrackKind::Constraint | TrackKind::Other => {}
        }
    }
    {
        let info = &mut scene.objects_mut()[index];
        if drives_position {
            info.coords_mut().set_origin(Vec3::default());
        }
        if drives_rotation {
            info.coords_mut().set_orientation(0.0, 0.0, 0.0);
        }
        if drives_pose {
            info.geometry_mut().clear_cached_meshes();
        }
        // A pending pose is derived state: drop it even when no track will
        // produce a fresh one, or a stale keyframe gets re-applied below.
        info.set_pose(None);
        info.clear_distortion();
    }

    // Last track in the list is the bottom of the stack: apply in reverse
    // so earlier tracks win conflicts.
    for track in tracks.iter_mut().rev() {
        if track.is_enabled() {
            track.apply(scene, id, time);
        }
    }
    let info = &mut scene.objects_mut()[index];
    info.set_tracks(tracks);
    info.apply_pending_pose();
    observer.derived_state_changed(id);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::scene::test_support::NullGeometry;
    use crate::scene::track::Keyframe;
    use crate::scene::{ObjectGeometry, ObjectInfo};
    use parking_lot::Mutex;
    use smallvec::SmallVec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Track that logs its applications and adds an offset to the target's
    /// origin.
    struct RecordingTrack {
        kind: TrackKind,
        label: &'static str,
        deps: Vec<ObjectId>,
        offset: Vec3,
        enabled: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl RecordingTrack {
        fn new(kind: TrackKind, label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Self {
            Self {
                kind,
                label,
                deps: Vec::new(),
                offset: Vec3::default(),
                enabled: true,
                log: Arc::clone(log),
            }
        }
        fn depending_on(mut self, dep: ObjectId) -> Self {
            self.deps.push(dep);
            self
        }
        fn offsetting(mut self, offset: Vec3) -> Self {
            self.offset = offset;
            self
        }
        fn disabled(mut self) -> Self {
            self.enabled = false;
            self
        }
    }

    impl Track for RecordingTrack {
        fn kind(&self) -> TrackKind {
            self.kind
        }
        fn is_enabled(&self) -> bool {
            self.enabled
        }
        fn dependencies(&self) -> SmallVec<[ObjectId; 2]> {
            self.deps.iter().copied().collect()
        }
        fn apply(&mut self, scene: &mut Scene, target: ObjectId, _time: f64) {
            self.log.lock().push(self.label);
            let info = scene.get_mut(target).unwrap();
            let origin = info.coords().origin();
            info.coords_mut().set_origin(Vec3::new(
                origin.x + self.offset.x,
                origin.y + self.offset.y,
                origin.z + self.offset.z,
            ));
        }
        fn duplicate(&self) -> Box<dyn Track> {
            Box::new(Self {
                kind: self.kind,
                label: self.label,
                deps: self.deps.clone(),
                offset: self.offset,
                enabled: self.enabled,
                log: Arc::clone(&self.log),
            })
        }
        fn copy_from(&mut self, other: &dyn Track) {
            let other = other.as_any().downcast_ref::<Self>().unwrap();
            self.offset = other.offset;
            self.enabled = other.enabled;
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    struct NotifyLog(Vec<ObjectId>);
    impl DerivedStateObserver for NotifyLog {
        fn derived_state_changed(&mut self, object: ObjectId) {
            self.0.push(object);
        }
    }

    fn object(name: &str) -> ObjectInfo {
        ObjectInfo::new(name, Box::new(NullGeometry))
    }

    #[test]
    fn cyclic_dependencies_terminate() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scene = Scene::new();
        let a = object("a");
        let b = object("b");
        let (aid, bid) = (a.id(), b.id());
        scene.add_object(a, 0);
        scene.add_object(b, 1);
        scene
            .get_mut(aid)
            .unwrap()
            .add_track(Box::new(RecordingTrack::new(TrackKind::Constraint, "a", &log).depending_on(bid)));
        scene
            .get_mut(bid)
            .unwrap()
            .add_track(Box::new(RecordingTrack::new(TrackKind::Constraint, "b", &log).depending_on(aid)));

        apply_full(&mut scene, 1.0, &mut NotifyLog(Vec::new()));

        // Each object's tracks ran exactly once despite the cycle.
        let mut applied = log.lock().clone();
        applied.sort_unstable();
        assert_eq!(applied, vec!["a", "b"]);
    }

    #[test]
    fn edit_propagates_only_through_dependents() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scene = Scene::new();
        let root = object("root");
        let child = object("child");
        let grandchild = object("grandchild");
        let unrelated = object("unrelated");
        let (rid, cid, gid, uid) = (root.id(), child.id(), grandchild.id(), unrelated.id());
        scene.add_object(root, 0);
        scene.add_object(child, 1);
        scene.add_object(grandchild, 2);
        scene.add_object(unrelated, 3);
        scene
            .get_mut(cid)
            .unwrap()
            .add_track(Box::new(RecordingTrack::new(TrackKind::Constraint, "child", &log).depending_on(rid)));
        scene
            .get_mut(gid)
            .unwrap()
            .add_track(Box::new(
                RecordingTrack::new(TrackKind::Constraint, "grandchild", &log).depending_on(cid),
            ));
        scene
            .get_mut(uid)
            .unwrap()
            .add_track(Box::new(RecordingTrack::new(TrackKind::Position, "unrelated", &log)));

        let mut notifications = NotifyLog(Vec::new());
        apply_after_edit(&mut scene, &[rid], &mut notifications);

        assert_eq!(&*log.lock(), &["child", "grandchild"]);
        for id in [rid, cid, gid] {
            assert!(notifications.0.contains(&id));
        }
        assert!(!notifications.0.contains(&uid));
    }

    #[test]
    fn disabled_track_dependencies_do_not_propagate() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scene = Scene::new();
        let edited = object("edited");
        let bystander = object("bystander");
        let (eid, bid) = (edited.id(), bystander.id());
        scene.add_object(edited, 0);
        scene.add_object(bystander, 1);
        // The only link to the edited object is switched off, so the
        // bystander must stay out of the change set entirely.
        scene.get_mut(bid).unwrap().add_track(Box::new(
            RecordingTrack::new(TrackKind::Constraint, "bystander", &log)
                .depending_on(eid)
                .disabled(),
        ));

        let mut notifications = NotifyLog(Vec::new());
        apply_after_edit(&mut scene, &[eid], &mut notifications);

        assert!(log.lock().is_empty());
        assert!(!notifications.0.contains(&bid));
    }

    #[test]
    fn tracks_apply_bottom_up() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scene = Scene::new();
        let obj = object("obj");
        let id = obj.id();
        scene.add_object(obj, 0);
        let info = scene.get_mut(id).unwrap();
        info.add_track(Box::new(RecordingTrack::new(TrackKind::Position, "top", &log)));
        info.add_track(Box::new(RecordingTrack::new(TrackKind::Position, "bottom", &log)));

        apply_full(&mut scene, 0.0, &mut NotifyLog(Vec::new()));
        assert_eq!(&*log.lock(), &["bottom", "top"]);
    }

    #[test]
    fn position_baseline_is_zeroed_before_apply() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scene = Scene::new();
        let obj = object("obj");
        let id = obj.id();
        scene.add_object(obj, 0);
        {
            let info = scene.get_mut(id).unwrap();
            info.coords_mut().set_origin(Vec3::new(5.0, 5.0, 5.0));
            info.add_track(Box::new(
                RecordingTrack::new(TrackKind::Position, "pos", &log)
                    .offsetting(Vec3::new(1.0, 2.0, 3.0)),
            ));
        }

        apply_full(&mut scene, 2.0, &mut NotifyLog(Vec::new()));
        // The stale origin did not leak into the result.
        assert_eq!(scene.get(id).unwrap().coords().origin(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(scene.time(), 2.0);
    }

    #[test]
    fn disabled_tracks_do_not_run_or_zero() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scene = Scene::new();
        let obj = object("obj");
        let id = obj.id();
        scene.add_object(obj, 0);
        {
            let info = scene.get_mut(id).unwrap();
            info.coords_mut().set_origin(Vec3::new(5.0, 5.0, 5.0));
            info.add_track(Box::new(
                RecordingTrack::new(TrackKind::Position, "off", &log).disabled(),
            ));
        }

        apply_full(&mut scene, 0.0, &mut NotifyLog(Vec::new()));
        assert!(log.lock().is_empty());
        assert_eq!(scene.get(id).unwrap().coords().origin(), Vec3::new(5.0, 5.0, 5.0));
    }

    #[test]
    fn direct_edit_reapplies_leading_constraints_only() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scene = Scene::new();
        let obj = object("obj");
        let id = obj.id();
        scene.add_object(obj, 0);
        {
            let info = scene.get_mut(id).unwrap();
            info.add_track(Box::new(RecordingTrack::new(TrackKind::Constraint, "hold", &log)));
            info.add_track(Box::new(RecordingTrack::new(TrackKind::Position, "anim", &log)));
            // Behind the first non-constraint track: not part of the
            // leading run.
            info.add_track(Box::new(RecordingTrack::new(TrackKind::Constraint, "late", &log)));
        }

        apply_after_edit(&mut scene, &[id], &mut NotifyLog(Vec::new()));
        // The animation track must not overwrite the edit, and constraints
        // past the run boundary stay untouched too.
        assert_eq!(&*log.lock(), &["hold"]);
    }

    #[test]
    fn revisits_renotify_without_reapplying() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scene = Scene::new();
        let follower = object("follower");
        let anchor = object("anchor");
        let (fid, aid) = (follower.id(), anchor.id());
        // Dependency points backwards in scene order, so the main pass
        // revisits the anchor after recursion already settled it.
        scene.add_object(follower, 0);
        scene.add_object(anchor, 1);
        scene
            .get_mut(fid)
            .unwrap()
            .add_track(Box::new(
                RecordingTrack::new(TrackKind::Constraint, "follower", &log).depending_on(aid),
            ));
        scene
            .get_mut(aid)
            .unwrap()
            .add_track(Box::new(RecordingTrack::new(TrackKind::Position, "anchor", &log)));

        let mut notifications = NotifyLog(Vec::new());
        apply_full(&mut scene, 0.0, &mut notifications);

        assert_eq!(&*log.lock(), &["anchor", "follower"]);
        assert_eq!(notifications.0, vec![aid, fid, aid]);
    }

    struct IdlePose;
    impl Keyframe for IdlePose {
        fn duplicate(&self) -> Box<dyn Keyframe> {
            Box::new(IdlePose)
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    struct PoseCountingGeometry {
        applied: Arc<AtomicUsize>,
    }
    impl ObjectGeometry for PoseCountingGeometry {
        fn duplicate(&self) -> Box<dyn ObjectGeometry> {
            Box::new(Self {
                applied: Arc::clone(&self.applied),
            })
        }
        fn copy_from(&mut self, _other: &dyn ObjectGeometry) {}
        fn vertex_positions(&self) -> Vec<Vec3> {
            Vec::new()
        }
        fn set_vertex_positions(&mut self, _positions: &[Vec3]) {}
        fn apply_pose(&mut self, _pose: &dyn Keyframe) {
            self.applied.fetch_add(1, Ordering::Relaxed);
        }
        fn type_tag(&self) -> &'static str {
            "pose-counting"
        }
        fn write_to(&self, _out: &mut dyn std::io::Write) -> std::io::Result<()> {
            Ok(())
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn stale_pose_is_cleared_not_reapplied() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let applied = Arc::new(AtomicUsize::new(0));
        let mut scene = Scene::new();
        let mut posed = ObjectInfo::new(
            "posed",
            Box::new(PoseCountingGeometry {
                applied: Arc::clone(&applied),
            }),
        );
        let id = posed.id();
        posed.set_pose(Some(Box::new(IdlePose)));
        posed.add_track(Box::new(RecordingTrack::new(TrackKind::Position, "pos", &log)));
        scene.add_object(posed, 0);

        apply_full(&mut scene, 1.0, &mut NotifyLog(Vec::new()));

        // No pose track produced a keyframe, so nothing may be applied and
        // nothing may stay pending.
        assert_eq!(applied.load(Ordering::Relaxed), 0);
        assert!(scene.get(id).unwrap().pose().is_none());
    }

    #[test]
    fn single_object_pass_pulls_dependencies_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scene = Scene::new();
        let anchor = object("anchor");
        let follower = object("follower");
        let (aid, fid) = (anchor.id(), follower.id());
        scene.add_object(anchor, 0);
        scene.add_object(follower, 1);
        scene
            .get_mut(aid)
            .unwrap()
            .add_track(Box::new(RecordingTrack::new(TrackKind::Position, "anchor", &log)));
        scene
            .get_mut(fid)
            .unwrap()
            .add_track(Box::new(
                RecordingTrack::new(TrackKind::Constraint, "follower", &log).depending_on(aid),
            ));

        let mut notifications = NotifyLog(Vec::new());
        apply_to_object(&mut scene, fid, &mut notifications);
        assert_eq!(&*log.lock(), &["anchor", "follower"]);
        assert_eq!(notifications.0, vec![aid, fid]);
    }
}
