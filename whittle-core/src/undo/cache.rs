//! # Payload cache
//!
//! `CopyObject` and `CopyVertexPositions` are the only command kinds whose
//! payload size is unbounded by construction - they mirror arbitrary mesh
//! data. Once a record lands on a history stack, those payloads are spilled
//! to a per-record scratch file by a background writer so the memory can be
//! reclaimed, and reloaded sequentially right before the record executes.
//!
//! A spilled slot keeps a best-effort retained clone of its payload; the
//! explicit [`release`](super::UndoRecord::release_cached_memory) hook (not
//! collector timing) decides when that clone is dropped. Correctness never
//! depends on the clone surviving - only the fast reload path does.
//!
//! Polymorphic geometry snapshots are reconstructed through an explicit
//! type-tag registry rather than any runtime type lookup.

use std::collections::VecDeque;
use std::io::{BufReader, BufWriter, Read, Write};
use std::sync::mpsc;
use std::sync::Arc;

use parking_lot::{const_mutex, const_rwlock, Mutex, RwLock};

use crate::commands::{Command, GeometrySnapshot, Payload};
use crate::math::Vec3;
use crate::scene::ObjectGeometry;

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("scratch file i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("no geometry reconstructor registered for tag {0:?}")]
    UnknownTag(String),
}

/// Rebuilds a geometry snapshot from the bytes its `write_to` produced.
pub type ReconstructFn = fn(&mut dyn Read) -> std::io::Result<Box<dyn ObjectGeometry>>;

static RECONSTRUCTORS: RwLock<Option<hashbrown::HashMap<&'static str, ReconstructFn>>> =
    const_rwlock(None);

/// Register the reconstructor for a geometry type tag. Call once per
/// concrete geometry type before any record holding its snapshots is
/// reloaded; re-registering a tag replaces the previous entry.
pub fn register_geometry(tag: &'static str, reconstruct: ReconstructFn) {
    RECONSTRUCTORS
        .write()
        .get_or_insert_with(hashbrown::HashMap::new)
        .insert(tag, reconstruct);
}

fn reconstructor_for(tag: &str) -> Option<ReconstructFn> {
    RECONSTRUCTORS.read().as_ref()?.get(tag).copied()
}

type CacheJob = Arc<Mutex<super::RecordInner>>;

// One lazily-spawned writer thread for the whole process, fed over a
// channel. The per-record mutex gives the ordering guarantee: a reload on
// the control thread waits out any in-flight spill of the same record.
static WRITE_SERVICE: Mutex<Option<mpsc::Sender<CacheJob>>> = const_mutex(None);

pub(super) fn submit(job: CacheJob) {
    let mut guard = WRITE_SERVICE.lock();
    let sender = guard.get_or_insert_with(|| {
        let (send, recv) = mpsc::channel::<CacheJob>();
        std::thread::Builder::new()
            .name("undo-cache-writer".into())
            .spawn(move || {
                while let Ok(job) = recv.recv() {
                    job.lock().write_cache();
                }
            })
            .expect("failed to spawn undo cache writer");
        send
    });
    if sender.send(job).is_err() {
        // Worker is gone (only possible if it panicked). Degraded but
        // correct: the data just stays resident.
        log::warn!("undo cache writer is gone; keeping payloads in memory");
    }
}

/// Best-effort retained clone of a spilled payload.
pub(crate) enum SoftSlot {
    Geometry(Option<GeometrySnapshot>),
    Vertices(Option<Arc<[Vec3]>>),
}

impl SoftSlot {
    fn is_retained(&self) -> bool {
        match self {
            Self::Geometry(g) => g.is_some(),
            Self::Vertices(v) => v.is_some(),
        }
    }
    fn release(&mut self) {
        match self {
            Self::Geometry(g) => *g = None,
            Self::Vertices(v) => *v = None,
        }
    }
}

/// Disk-spill state of one record. Invariant: either every heavy payload is
/// resident in its command and `scratch` is `None`, or `scratch` holds a
/// serialized copy of every heavy payload (in command order) and the
/// corresponding command slots are evicted.
#[derive(Default)]
pub(crate) struct PayloadCache {
    /// Parallel to the command script; `None` for non-heavy commands.
    /// Empty when nothing has been spilled.
    slots: Vec<Option<SoftSlot>>,
    scratch: Option<tempfile::NamedTempFile>,
}

impl super::RecordInner {
    /// Spill every heavy payload to a fresh scratch file and evict it.
    /// Failures are logged and leave all data resident - degraded, correct.
    pub(crate) fn write_cache(&mut self) {
        // Consumed-and-recached records resubmit harmlessly.
        if self.cache.scratch.is_some() {
            return;
        }
        if !self.commands.iter().any(Command::is_heavy) {
            return;
        }
        match write_scratch(&self.commands) {
            Ok(file) => {
                // Nothing was touched until the file was fully written, so
                // eviction is all-or-nothing.
                self.cache.slots = self
                    .commands
                    .iter_mut()
                    .map(|command| match command {
                        Command::CopyObject { snapshot, .. } => {
                            let arc = snapshot
                                .take()
                                .expect("heavy payload missing during eviction");
                            Some(SoftSlot::Geometry(Some(arc)))
                        }
                        Command::CopyVertexPositions { positions, .. } => {
                            let arc = positions
                                .take()
                                .expect("heavy payload missing during eviction");
                            Some(SoftSlot::Vertices(Some(arc)))
                        }
                        _ => None,
                    })
                    .collect();
                self.cache.scratch = Some(file);
            }
            Err(e) => {
                log::warn!("undo payload spill failed; keeping payloads resident: {e}");
            }
        }
    }

    /// Make every payload resident again, preferring retained clones and
    /// falling back to a sequential read of the scratch file. On success the
    /// cache is consumed: the scratch file is deleted and the slot table
    /// dropped. A failure leaves the commands unexecuted and the scratch
    /// file in place.
    pub(crate) fn reload(&mut self) -> Result<(), CacheError> {
        if self.cache.scratch.is_none() {
            return Ok(());
        }
        let all_retained = self
            .cache
            .slots
            .iter()
            .flatten()
            .all(SoftSlot::is_retained);
        if all_retained {
            // Cheap path: memory pressure never dropped the clones.
            let slots = std::mem::take(&mut self.cache.slots);
            for (command, slot) in self.commands.iter_mut().zip(slots) {
                match (command, slot) {
                    (
                        Command::CopyObject { snapshot, .. },
                        Some(SoftSlot::Geometry(Some(arc))),
                    ) => *snapshot = Payload::Resident(arc),
                    (
                        Command::CopyVertexPositions { positions, .. },
                        Some(SoftSlot::Vertices(Some(arc))),
                    ) => *positions = Payload::Resident(arc),
                    (_, None) => {}
                    _ => unreachable!("cache slot table out of sync with command script"),
                }
            }
        } else {
            // The writer and this reader agree on exactly one order: command
            // order. No seeking.
            let scratch = self
                .cache
                .scratch
                .as_ref()
                .expect("checked scratch above");
            let mut input = BufReader::new(scratch.reopen()?);
            for command in &mut self.commands {
                match command {
                    Command::CopyObject { snapshot, .. } => {
                        *snapshot = Payload::Resident(Arc::from(read_geometry(&mut input)?));
                    }
                    Command::CopyVertexPositions { positions, .. } => {
                        *positions = Payload::Resident(read_vertices(&mut input)?);
                    }
                    _ => {}
                }
            }
            self.cache.slots.clear();
        }
        // Consumed exactly once: dropping the handle deletes the file.
        self.cache.scratch = None;
        Ok(())
    }

    /// Drop retained clones whose data has safely reached disk.
    pub(crate) fn release_memory(&mut self) {
        if self.cache.scratch.is_none() {
            return;
        }
        for slot in self.cache.slots.iter_mut().flatten() {
            slot.release();
        }
    }
}

fn write_scratch(commands: &VecDeque<Command>) -> std::io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::new()?;
    {
        let mut out = BufWriter::new(&mut file);
        for command in commands {
            match command {
                Command::CopyObject { snapshot, .. } => {
                    let snapshot = snapshot
                        .resident()
                        .expect("heavy payload missing before spill");
                    write_geometry(&mut out, &**snapshot)?;
                }
                Command::CopyVertexPositions { positions, .. } => {
                    let positions = positions
                        .resident()
                        .expect("heavy payload missing before spill");
                    write_vertices(&mut out, positions)?;
                }
                _ => {}
            }
        }
        out.flush()?;
    }
    Ok(file)
}

fn write_geometry(out: &mut dyn Write, snapshot: &dyn ObjectGeometry) -> std::io::Result<()> {
    let tag = snapshot.type_tag();
    let len = u16::try_from(tag.len()).expect("geometry type tag too long");
    out.write_all(&len.to_le_bytes())?;
    out.write_all(tag.as_bytes())?;
    snapshot.write_to(out)
}

fn read_geometry(input: &mut dyn Read) -> Result<Box<dyn ObjectGeometry>, CacheError> {
    let mut len = [0u8; 2];
    input.read_exact(&mut len)?;
    let mut tag = vec![0u8; usize::from(u16::from_le_bytes(len))];
    input.read_exact(&mut tag)?;
    let tag = String::from_utf8_lossy(&tag).into_owned();
    let reconstruct = reconstructor_for(&tag).ok_or(CacheError::UnknownTag(tag))?;
    Ok(reconstruct(input)?)
}

// The scratch file never leaves this process, so native endianness via Pod
// casts is fine for the bulk data.
fn write_vertices(out: &mut dyn Write, positions: &[Vec3]) -> std::io::Result<()> {
    let count = positions.len() as u64;
    out.write_all(&count.to_le_bytes())?;
    out.write_all(bytemuck::cast_slice(positions))
}

fn read_vertices(input: &mut dyn Read) -> std::io::Result<Arc<[Vec3]>> {
    let mut count = [0u8; 8];
    input.read_exact(&mut count)?;
    let count = usize::try_from(u64::from_le_bytes(count))
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidData))?;
    let mut positions = vec![Vec3::default(); count];
    input.read_exact(bytemuck::cast_slice_mut(&mut positions))?;
    Ok(positions.into())
}
