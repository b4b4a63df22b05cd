// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Try-frames: catch-maps installed by `TRY`/`CATCH` and consulted by the
//! unwinder.

use std::collections::HashMap;

use viua_value::Atom;

/// A catch-map keyed by exception-type name, associated with the frame index
/// that installed it (frames are addressed by position in the owning
/// stack's frame vector).
#[derive(Clone, Debug, Default)]
pub struct TryFrame {
    pub frame_index: usize,
    catchers: HashMap<Atom, usize>,
}

impl TryFrame {
    #[must_use]
    pub fn new(frame_index: usize) -> Self {
        Self { frame_index, catchers: HashMap::new() }
    }

    pub fn install(&mut self, exception_type: Atom, handler_address: usize) {
        self.catchers.insert(exception_type, handler_address);
    }

    /// Resolve a catcher for `exception_type`, consulting `ancestors` (a
    /// kernel-registered inheritance map: type -> parent type) when there is
    /// no exact match.
    #[must_use]
    pub fn resolve(&self, exception_type: &Atom, ancestors: &HashMap<Atom, Atom>) -> Option<usize> {
        let mut current = exception_type.clone();
        loop {
            if let Some(&address) = self.catchers.get(&current) {
                return Some(address);
            }
            current = ancestors.get(&current)?.clone();
        }
    }
}
