//! # Undo
//!
//! The transactional heart of the editor. An [`UndoRecord`] is an ordered
//! script of [`Command`]s; executing it mutates the scene and produces the
//! inverse script, captured lazily because the "before" state of most
//! commands is only known at execution time. [`stack::UndoStack`] owns the
//! bounded undo/redo history, and [`cache`] spills oversized payloads to a
//! scratch file behind the record's back.

pub mod cache;
pub mod stack;

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

pub use cache::CacheError;

use crate::commands::{Command, GeometrySnapshot, Payload};
use crate::context::EditingContext;
use crate::math::Vec3;

/// Script state shared with the background cache writer. The mutex mirrors
/// the exclusivity the original design got from synchronized spill/reload:
/// a reload on the control thread blocks until any in-flight spill of the
/// same record finishes.
pub(crate) struct RecordInner {
    pub(crate) commands: VecDeque<Command>,
    pub(crate) cache: cache::PayloadCache,
}

/// An ordered script of commands plus the machinery to execute and invert it.
///
/// Lifecycle: authored (commands appended or prepended), pushed onto an
/// [`stack::UndoStack`], executed at most once - execution drains the script
/// and the record is superseded by the returned inverse.
pub struct UndoRecord {
    shared: Arc<Mutex<RecordInner>>,
    redo: bool,
}

impl UndoRecord {
    /// Create an empty script.
    #[must_use]
    pub fn new(is_redo: bool) -> Self {
        Self {
            shared: Arc::new(Mutex::new(RecordInner {
                commands: VecDeque::new(),
                cache: cache::PayloadCache::default(),
            })),
            redo: is_redo,
        }
    }
    /// Create a script holding a single command.
    #[must_use]
    pub fn with_command(is_redo: bool, command: Command) -> Self {
        let record = Self::new(is_redo);
        record.shared.lock().commands.push_back(command);
        record
    }
    /// Whether this record re-does a previously undone operation.
    #[must_use]
    pub fn is_redo(&self) -> bool {
        self.redo
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().commands.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.lock().commands.is_empty()
    }
    /// Label for undo/redo menu entries: the name of the leading
    /// user-defined edit, or empty.
    #[must_use]
    pub fn name(&self) -> String {
        let inner = self.shared.lock();
        match inner.commands.front() {
            Some(Command::UserDefined { edit }) => edit.lock().name().to_owned(),
            _ => String::new(),
        }
    }
    /// True when executing this record can only ever change the selection.
    #[must_use]
    pub fn is_selection_only(&self) -> bool {
        self.shared
            .lock()
            .commands
            .iter()
            .all(|c| matches!(c, Command::SetSceneSelection { .. }))
    }

    /// Append a command to the script.
    pub fn add_command(&mut self, command: Command) {
        self.shared.lock().commands.push_back(command);
    }
    /// Prepend a command: it will run *before* everything already recorded.
    /// Used by low-level fixups whose undo must happen after the triggering
    /// command's own inverse (e.g. restoring group membership only once the
    /// deleted object has been re-added).
    pub fn add_command_at_beginning(&mut self, command: Command) {
        self.shared.lock().commands.push_front(command);
    }

    /// Queue this record's heavy payloads for spilling on the background
    /// writer. No-op if the script holds no heavy command. Never blocks on
    /// I/O and never fails: a spill that goes wrong simply leaves the data
    /// in memory.
    pub fn cache_to_disk(&self) {
        let any_heavy = self.shared.lock().commands.iter().any(Command::is_heavy);
        if any_heavy {
            cache::submit(Arc::clone(&self.shared));
        }
    }

    /// Run the spill synchronously on the calling thread. Normal callers go
    /// through [`UndoRecord::cache_to_disk`]; this exists for shutdown paths
    /// and tests.
    pub fn flush_cache(&self) {
        self.shared.lock().write_cache();
    }

    /// Memory-pressure hook: drop the retained clones of payloads that have
    /// safely reached the scratch file. Purely an optimization valve - the
    /// data comes back from disk on the next execute.
    pub fn release_cached_memory(&self) {
        self.shared.lock().release_memory();
    }

    /// Execute the script against `ctx`'s scene, returning the inverse
    /// record.
    ///
    /// On a cache reload failure the scene is left untouched, the script
    /// stays intact, and the error is surfaced; otherwise the script is
    /// drained and this record becomes an empty shell superseded by the
    /// returned inverse.
    pub fn execute(&self, ctx: &mut dyn EditingContext) -> Result<UndoRecord, CacheError> {
        let mut inverse = UndoRecord::new(!self.redo);

        let commands = {
            let mut inner = self.shared.lock();
            inner.reload()?;
            std::mem::take(&mut inner.commands)
        };

        let selection_snapshot = ctx.scene().selection().to_vec();
        let mut restore_selection = false;
        let selection_only = commands
            .iter()
            .all(|c| matches!(c, Command::SetSceneSelection { .. }));

        for command in commands {
            log::trace!("applying {command:?}");
            match command {
                Command::CopyObject { target, snapshot } => {
                    let Payload::Resident(snapshot) = snapshot else {
                        unreachable!("heavy payload still evicted after reload");
                    };
                    let scene = ctx.scene_mut();
                    let info = scene
                        .get_mut(target)
                        .expect("CopyObject target not present in scene");
                    let before: GeometrySnapshot = Arc::from(info.geometry().duplicate());
                    inverse.add_command_at_beginning(Command::CopyObject {
                        target,
                        snapshot: Payload::Resident(before),
                    });
                    info.geometry_mut().copy_from(&*snapshot);
                    scene.object_modified(target);
                }
                Command::CopyCoords { target, coords } => {
                    let info = ctx
                        .scene_mut()
                        .get_mut(target)
                        .expect("CopyCoords target not present in scene");
                    inverse.add_command_at_beginning(Command::CopyCoords {
                        target,
                        coords: info.coords().clone(),
                    });
                    info.coords_mut().copy_from(&coords);
                }
                Command::CopyObjectInfo { target, snapshot } => {
                    let info = ctx
                        .scene_mut()
                        .get_mut(target)
                        .expect("CopyObjectInfo target not present in scene");
                    inverse.add_command_at_beginning(Command::CopyObjectInfo {
                        target,
                        snapshot: Box::new(info.duplicate()),
                    });
                    info.copy_info_from(&snapshot);
                }
                Command::SetObject { target, geometry } => {
                    let info = ctx
                        .scene_mut()
                        .get_mut(target)
                        .expect("SetObject target not present in scene");
                    let old = info.set_geometry(geometry);
                    inverse.add_command_at_beginning(Command::SetObject {
                        target,
                        geometry: old,
                    });
                }
                Command::AddObject { info, index } => {
                    let selected = info.selected;
                    ctx.insert_object(*info, index, &mut inverse);
                    if selected {
                        ctx.add_to_selection(index);
                    }
                    restore_selection = true;
                }
                Command::DeleteObject { index } => {
                    ctx.remove_object(index, &mut inverse);
                    restore_selection = true;
                }
                Command::RenameObject { index, name } => {
                    let old = ctx
                        .scene()
                        .object(index)
                        .expect("RenameObject index out of range")
                        .name
                        .clone();
                    inverse.add_command_at_beginning(Command::RenameObject { index, name: old });
                    ctx.set_object_name(index, name);
                }
                Command::AddToGroup {
                    group,
                    child,
                    position,
                } => {
                    inverse.add_command_at_beginning(Command::RemoveFromGroup { group, child });
                    ctx.scene_mut().add_to_group(group, child, position);
                }
                Command::RemoveFromGroup { group, child } => {
                    // Silent no-op when the relationship is already gone: an
                    // earlier command in this same script severed it.
                    if let Some(position) = ctx.scene_mut().remove_from_group(group, child) {
                        inverse.add_command_at_beginning(Command::AddToGroup {
                            group,
                            child,
                            position,
                        });
                    }
                }
                Command::SetGroupContents { group, children } => {
                    let old = ctx.scene_mut().set_group_contents(group, children);
                    inverse.add_command_at_beginning(Command::SetGroupContents {
                        group,
                        children: old,
                    });
                }
                Command::SetTrack {
                    target,
                    index,
                    track,
                } => {
                    let info = ctx
                        .scene_mut()
                        .get_mut(target)
                        .expect("SetTrack target not present in scene");
                    let slot = info
                        .tracks_mut()
                        .get_mut(index)
                        .expect("SetTrack index out of range");
                    let old = std::mem::replace(slot, track);
                    inverse.add_command_at_beginning(Command::SetTrack {
                        target,
                        index,
                        track: old,
                    });
                }
                Command::SetTrackList { target, tracks } => {
                    let info = ctx
                        .scene_mut()
                        .get_mut(target)
                        .expect("SetTrackList target not present in scene");
                    let old = info.set_tracks(tracks);
                    inverse.add_command_at_beginning(Command::SetTrackList {
                        target,
                        tracks: old,
                    });
                }
                Command::CopyTrack {
                    target,
                    index,
                    snapshot,
                } => {
                    let info = ctx
                        .scene_mut()
                        .get_mut(target)
                        .expect("CopyTrack target not present in scene");
                    let current = info
                        .tracks_mut()
                        .get_mut(index)
                        .expect("CopyTrack index out of range");
                    inverse.add_command_at_beginning(Command::CopyTrack {
                        target,
                        index,
                        snapshot: current.duplicate(),
                    });
                    current.copy_from(&*snapshot);
                }
                Command::CopyVertexPositions { target, positions } => {
                    let Payload::Resident(positions) = positions else {
                        unreachable!("heavy payload still evicted after reload");
                    };
                    let scene = ctx.scene_mut();
                    let info = scene
                        .get_mut(target)
                        .expect("CopyVertexPositions target not present in scene");
                    let before: Arc<[Vec3]> = info.geometry().vertex_positions().into();
                    inverse.add_command_at_beginning(Command::CopyVertexPositions {
                        target,
                        positions: Payload::Resident(before),
                    });
                    info.geometry_mut().set_vertex_positions(&positions);
                    scene.object_modified(target);
                }
                Command::CopySkeleton { target, skeleton } => {
                    let info = ctx
                        .scene_mut()
                        .get_mut(target)
                        .expect("CopySkeleton target not present in scene");
                    let before = info
                        .geometry()
                        .skeleton()
                        .expect("CopySkeleton target has no skeleton")
                        .clone();
                    inverse.add_command_at_beginning(Command::CopySkeleton {
                        target,
                        skeleton: before,
                    });
                    info.geometry_mut()
                        .skeleton_mut()
                        .expect("CopySkeleton target has no skeleton")
                        .copy_from(&skeleton);
                }
                Command::SetMeshSelection {
                    controller,
                    mode,
                    mask,
                } => {
                    let mut guard = controller.lock();
                    inverse.add_command_at_beginning(Command::SetMeshSelection {
                        controller: Arc::clone(&controller),
                        mode: guard.selection_mode(),
                        mask: guard.selection(),
                    });
                    guard.set_selection_mode(mode);
                    guard.set_selection(mask);
                }
                Command::SetSceneSelection { selection } => {
                    restore_selection = true;
                    ctx.set_selection(&selection);
                }
                Command::UserDefined { edit } => {
                    {
                        let mut guard = edit.lock();
                        if self.redo {
                            guard.redo(ctx.scene_mut());
                        } else {
                            guard.undo(ctx.scene_mut());
                        }
                    }
                    // Appended, not prepended: the edit object itself is the
                    // shared state that flips between undo and redo.
                    inverse.add_command(Command::UserDefined { edit });
                }
            }
        }

        if restore_selection {
            // Structural commands churn the selection as they go; pin the
            // exact pre-execution selection back at the end of the inverse.
            inverse.add_command(Command::SetSceneSelection {
                selection: selection_snapshot,
            });
        }
        if !selection_only {
            ctx.mark_modified();
        }
        inverse.cache_to_disk();
        Ok(inverse)
    }
}
