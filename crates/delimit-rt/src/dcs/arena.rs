// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Routine slots.
//!
//! Routines form an ownership tree stored by index. A child's link to
//! its parent is a plain id, so it never keeps the parent alive; a stale
//! id (slot reused, generation bumped) simply fails to resolve.

use std::fmt;

use indexmap::IndexSet;

use super::instruction::Script;

/// Generational handle to a routine slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutineId {
    index: u32,
    generation: u32,
}

impl fmt::Display for RoutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// One started execution of an operation.
pub(crate) struct Routine {
    pub name: &'static str,
    /// `None` while the scheduler is advancing it.
    pub script: Option<Script>,
    pub parent: Option<RoutineId>,
    /// Live children in spawn order.
    pub children: IndexSet<RoutineId>,
}

impl Routine {
    pub fn new(name: &'static str, script: Script) -> Self {
        Self {
            name,
            script: Some(script),
            parent: None,
            children: IndexSet::new(),
        }
    }
}

struct Slot {
    generation: u32,
    routine: Option<Routine>,
}

#[derive(Default)]
pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn insert(&mut self, routine: Routine) -> RoutineId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.routine = Some(routine);
            return RoutineId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            routine: Some(routine),
        });
        RoutineId {
            index,
            generation: 0,
        }
    }

    /// Insert a routine and register it as a child of `parent`.
    pub fn spawn(
        &mut self,
        name: &'static str,
        script: Script,
        parent: Option<RoutineId>,
    ) -> RoutineId {
        let id = self.insert(Routine::new(name, script));
        self.adopt(id, parent);
        id
    }

    /// Link `child` under `parent`. A dead parent leaves it parentless.
    pub fn adopt(&mut self, child: RoutineId, parent: Option<RoutineId>) {
        let parent = parent.filter(|p| self.contains(*p));
        if let Some(p) = parent {
            if let Some(routine) = self.get_mut(p) {
                routine.children.insert(child);
            }
        }
        if let Some(routine) = self.get_mut(child) {
            routine.parent = parent;
        }
    }

    pub fn contains(&self, id: RoutineId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: RoutineId) -> Option<&Routine> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.routine.as_ref())
    }

    pub fn get_mut(&mut self, id: RoutineId) -> Option<&mut Routine> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.routine.as_mut())
    }

    /// Free the slot. The id, and every copy of it, goes stale.
    pub fn remove(&mut self, id: RoutineId) -> Option<Routine> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let routine = slot.routine.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(routine)
    }
}
