//! The editing surface the undo engine issues structural requests to, and
//! the notification hook the evaluator raises per touched object. Both are
//! implemented outside this crate (the layout window, render caches, ...).

use crate::id::ObjectId;
use crate::scene::{ObjectInfo, Scene};
use crate::undo::UndoRecord;

/// The editing surface that owns the scene being mutated.
///
/// `insert_object` and `remove_object` receive the inverse record under
/// construction: the surface prepends whatever cascading sub-commands are
/// needed to undo side effects it performs (group-membership fixups,
/// dependency cleanup). Ordering contract: prepend the fixups first and the
/// operation's natural inverse (the matching Add/Delete) last, so that on
/// replay the object is re-added before its relationships are restored.
pub trait EditingContext {
    fn scene(&self) -> &Scene;
    fn scene_mut(&mut self) -> &mut Scene;
    fn insert_object(&mut self, info: ObjectInfo, index: usize, inverse: &mut UndoRecord);
    fn remove_object(&mut self, index: usize, inverse: &mut UndoRecord);
    fn set_object_name(&mut self, index: usize, name: String);
    fn set_selection(&mut self, selection: &[usize]);
    fn add_to_selection(&mut self, index: usize);
    /// Flag the document as having unsaved changes.
    fn mark_modified(&mut self);
}

/// Invoked by the evaluator for every object whose derived state may have
/// changed, so dependent caches (render previews, bounding boxes) can
/// invalidate.
pub trait DerivedStateObserver {
    fn derived_state_changed(&mut self, object: ObjectId);
}

/// Observer that ignores every notification.
pub struct NoopObserver;

impl DerivedStateObserver for NoopObserver {
    fn derived_state_changed(&mut self, _object: ObjectId) {}
}
