//! Local references and the frame-scoped table that owns them
//!
//! Slots are pooled: a slot freed when its frame closes is reused by the
//! next allocation, with its generation bumped so that any [`Local`] still
//! pointing at it is reported as stale instead of resolving to the new
//! occupant.
//!
//! Each frame keeps the list of slots it owns. Promotion only retags the
//! slot with the parent depth and appends it to the parent's list; the
//! child's entry is skipped at close because the owner no longer matches.

use tracing::trace;

use crate::config::EngineConfig;
use crate::engine::EngineId;
use crate::error::{Fatal, Result, ScopeError, fatal};

/// Handle to a value owned by an engine frame
///
/// A `Local` is plain data; its validity is checked against the owning
/// engine's table on every use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Local {
    engine: EngineId,
    slot: u32,
    generation: u32,
}

impl Local {
    pub fn engine(&self) -> EngineId {
        self.engine
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Identifies one open frame of one engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId {
    engine: EngineId,
    depth: usize,
    serial: u64,
}

impl FrameId {
    pub fn engine(&self) -> EngineId {
        self.engine
    }

    /// Zero for the outermost frame
    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    generation: u32,
    owner: usize,
}

#[derive(Debug)]
struct FrameRecord {
    serial: u64,
    owned: Vec<u32>,
}

#[derive(Debug)]
pub struct LocalTable<T> {
    engine: EngineId,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    frames: Vec<FrameRecord>,
    next_serial: u64,
    live: usize,
    max_depth: usize,
    max_locals: usize,
}

impl<T> LocalTable<T> {
    pub fn new(engine: EngineId, config: &EngineConfig) -> Self {
        Self {
            engine,
            slots: Vec::new(),
            free: Vec::new(),
            frames: Vec::new(),
            next_serial: 1,
            live: 0,
            max_depth: config.max_frame_depth,
            max_locals: config.max_locals,
        }
    }

    /// Number of open frames
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Number of locals currently resolvable
    pub fn live(&self) -> usize {
        self.live
    }

    /// Number of slots ever allocated (live or pooled)
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn open_frame(&mut self) -> Result<FrameId> {
        if self.frames.len() >= self.max_depth {
            return Err(ScopeError::StackOverflow {
                limit: self.max_depth,
            });
        }

        let serial = self.next_serial;
        self.next_serial += 1;
        self.frames.push(FrameRecord {
            serial,
            owned: Vec::new(),
        });

        Ok(FrameId {
            engine: self.engine,
            depth: self.frames.len() - 1,
            serial,
        })
    }

    /// Close the innermost frame, returning how many locals it released
    pub fn close_frame(&mut self, frame: FrameId) -> usize {
        self.check_innermost(frame, "close");

        let Some(record) = self.frames.pop() else {
            return 0;
        };

        let mut released = 0;
        for index in record.owned {
            let slot = &mut self.slots[index as usize];
            if slot.owner != frame.depth || slot.value.is_none() {
                // promoted out of this frame
                continue;
            }
            slot.value = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index);
            released += 1;
        }
        self.live -= released;

        trace!(
            engine = self.engine.get(),
            depth = frame.depth,
            released,
            "frame closed"
        );
        released
    }

    pub fn alloc(&mut self, frame: FrameId, value: T) -> Result<Local> {
        self.check_open(frame)?;
        if self.live >= self.max_locals {
            return Err(ScopeError::TooManyLocals {
                limit: self.max_locals,
            });
        }

        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.value = Some(value);
                slot.owner = frame.depth;
                index
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    value: Some(value),
                    generation: 0,
                    owner: frame.depth,
                });
                index
            }
        };

        self.frames[frame.depth].owned.push(index);
        self.live += 1;

        Ok(Local {
            engine: self.engine,
            slot: index,
            generation: self.slots[index as usize].generation,
        })
    }

    pub fn get(&self, local: Local) -> Result<&T> {
        if local.engine != self.engine {
            return Err(ScopeError::EngineMismatch {
                expected: self.engine,
                found: local.engine,
            });
        }

        self.slots
            .get(local.slot as usize)
            .filter(|slot| slot.generation == local.generation)
            .and_then(|slot| slot.value.as_ref())
            .ok_or(ScopeError::StaleReference {
                slot: local.slot,
                generation: local.generation,
            })
    }

    /// Depth of the frame currently owning `local`
    pub fn owner_depth(&self, local: Local) -> Result<usize> {
        self.get(local)?;
        Ok(self.slots[local.slot as usize].owner)
    }

    /// Move `local` into the frame enclosing `frame`
    ///
    /// The handle itself does not change. A local already owned by an
    /// outer frame is returned untouched.
    pub fn promote(&mut self, frame: FrameId, local: Local) -> Result<Local> {
        self.check_open(frame)?;
        self.get(local)?;

        let Some(parent) = frame.depth.checked_sub(1) else {
            return Err(ScopeError::NoEnclosingFrame { depth: frame.depth });
        };

        let slot = &mut self.slots[local.slot as usize];
        if slot.owner < frame.depth {
            return Ok(local);
        }

        slot.owner = parent;
        self.frames[parent].owned.push(local.slot);
        Ok(local)
    }

    fn check_open(&self, frame: FrameId) -> Result<()> {
        if frame.engine != self.engine {
            return Err(ScopeError::EngineMismatch {
                expected: self.engine,
                found: frame.engine,
            });
        }
        match self.frames.get(frame.depth) {
            Some(record) if record.serial == frame.serial => Ok(()),
            _ => Err(ScopeError::FrameClosed { depth: frame.depth }),
        }
    }

    fn check_innermost(&self, frame: FrameId, action: &str) {
        let innermost = self.frames.last().map(|record| record.serial);
        if frame.engine != self.engine || innermost != Some(frame.serial) {
            fatal(
                Fatal::ScopeOrderViolation,
                format_args!(
                    "cannot {} frame at depth {} of engine {}: innermost open frame is at depth {}",
                    action,
                    frame.depth,
                    frame.engine,
                    self.frames.len() as isize - 1
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> LocalTable<&'static str> {
        LocalTable::new(EngineId::next(), &EngineConfig::default())
    }

    #[test]
    fn test_unpromoted_locals_die_with_frame() {
        let mut table = table();
        let outer = table.open_frame().unwrap();
        let inner = table.open_frame().unwrap();
        let local = table.alloc(inner, "temp").unwrap();
        assert_eq!(*table.get(local).unwrap(), "temp");

        assert_eq!(table.close_frame(inner), 1);
        assert!(matches!(
            table.get(local),
            Err(ScopeError::StaleReference { .. })
        ));
        table.close_frame(outer);
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn test_promoted_local_survives_frame() {
        let mut table = table();
        let outer = table.open_frame().unwrap();
        let inner = table.open_frame().unwrap();
        let kept = table.alloc(inner, "kept").unwrap();
        let dropped = table.alloc(inner, "dropped").unwrap();

        let promoted = table.promote(inner, kept).unwrap();
        assert_eq!(promoted, kept);
        assert_eq!(table.owner_depth(promoted).unwrap(), 0);

        assert_eq!(table.close_frame(inner), 1);
        assert_eq!(*table.get(promoted).unwrap(), "kept");
        assert!(table.get(dropped).is_err());

        assert_eq!(table.close_frame(outer), 1);
        assert!(table.get(promoted).is_err());
    }

    #[test]
    fn test_promote_outer_local_is_noop() {
        let mut table = table();
        let outer = table.open_frame().unwrap();
        let local = table.alloc(outer, "outer").unwrap();
        let inner = table.open_frame().unwrap();

        assert_eq!(table.promote(inner, local).unwrap(), local);
        assert_eq!(table.owner_depth(local).unwrap(), 0);
        table.close_frame(inner);
        assert!(table.get(local).is_ok());
        table.close_frame(outer);
    }

    #[test]
    fn test_promote_without_parent() {
        let mut table = table();
        let base = table.open_frame().unwrap();
        let local = table.alloc(base, "base").unwrap();
        assert_eq!(
            table.promote(base, local),
            Err(ScopeError::NoEnclosingFrame { depth: 0 })
        );
        table.close_frame(base);
    }

    #[test]
    fn test_reused_slot_does_not_resurrect_stale_local() {
        let mut table = table();
        let base = table.open_frame().unwrap();
        let frame = table.open_frame().unwrap();
        let old = table.alloc(frame, "old").unwrap();
        table.close_frame(frame);

        let frame = table.open_frame().unwrap();
        let new = table.alloc(frame, "new").unwrap();
        assert_eq!(new.slot(), old.slot());
        assert_ne!(new.generation(), old.generation());
        assert!(table.get(old).is_err());
        assert_eq!(*table.get(new).unwrap(), "new");
        assert_eq!(table.capacity(), 1);

        table.close_frame(frame);
        table.close_frame(base);
    }

    #[test]
    fn test_frame_depth_limit() {
        let config = EngineConfig::default().with_max_frame_depth(2);
        let mut table: LocalTable<u8> = LocalTable::new(EngineId::next(), &config);
        let a = table.open_frame().unwrap();
        let b = table.open_frame().unwrap();
        assert_eq!(
            table.open_frame(),
            Err(ScopeError::StackOverflow { limit: 2 })
        );
        table.close_frame(b);
        table.close_frame(a);
    }

    #[test]
    fn test_local_limit() {
        let config = EngineConfig::default().with_max_locals(1);
        let mut table: LocalTable<u8> = LocalTable::new(EngineId::next(), &config);
        let frame = table.open_frame().unwrap();
        table.alloc(frame, 1).unwrap();
        assert_eq!(
            table.alloc(frame, 2),
            Err(ScopeError::TooManyLocals { limit: 1 })
        );
        table.close_frame(frame);
    }

    #[test]
    fn test_foreign_local_rejected() {
        let mut mine = table();
        let mut theirs = table();
        let frame = theirs.open_frame().unwrap();
        let local = theirs.alloc(frame, "theirs").unwrap();
        let _base = mine.open_frame().unwrap();

        assert!(matches!(
            mine.get(local),
            Err(ScopeError::EngineMismatch { .. })
        ));
        theirs.close_frame(frame);
    }

    #[test]
    fn test_alloc_into_closed_frame_fails() {
        let mut table = table();
        let base = table.open_frame().unwrap();
        let frame = table.open_frame().unwrap();
        table.close_frame(frame);
        assert_eq!(
            table.alloc(frame, "late"),
            Err(ScopeError::FrameClosed { depth: 1 })
        );
        table.close_frame(base);
    }

    #[test]
    #[should_panic(expected = "Scope order violation")]
    fn test_out_of_order_close_is_fatal() {
        let mut table = table();
        let outer = table.open_frame().unwrap();
        let _inner = table.open_frame().unwrap();
        table.close_frame(outer);
    }
}
