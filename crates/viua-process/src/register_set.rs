// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Register sets: fixed-size, ordered sequences of register cells.

use viua_value::{RegisterCell, Value};

/// The number of cells a per-function static register set is lazily
/// materialised with.
pub const STATIC_REGISTER_SET_SIZE: usize = 16;

/// An ordered, fixed-size sequence of register cells.
#[derive(Clone, Debug, Default)]
pub struct RegisterSet {
    cells: Vec<RegisterCell>,
}

/// A register index named an out-of-range cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid register index {index} (set has {len} cells)")]
pub struct InvalidRegisterIndex {
    pub index: u16,
    pub len: usize,
}

impl RegisterSet {
    /// Allocate `n` cells, all empty (`to-be-bound`).
    #[must_use]
    pub fn allocate(n: usize) -> Self {
        Self { cells: (0..n).map(|_| RegisterCell::empty()).collect() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, index: u16) -> Result<&RegisterCell, InvalidRegisterIndex> {
        self.cells
            .get(index as usize)
            .ok_or(InvalidRegisterIndex { index, len: self.cells.len() })
    }

    pub fn get_mut(&mut self, index: u16) -> Result<&mut RegisterCell, InvalidRegisterIndex> {
        let len = self.cells.len();
        self.cells.get_mut(index as usize).ok_or(InvalidRegisterIndex { index, len })
    }

    /// True if every cell has been written since allocation - the "frame
    /// balance" check `FRAME`/`CALL` pairs rely on.
    #[must_use]
    pub fn all_bound(&self) -> bool {
        self.cells.iter().all(viua_value::RegisterCell::is_bound)
    }

    pub fn bind(&mut self, index: u16, value: Value) -> Result<(), InvalidRegisterIndex> {
        self.get_mut(index)?.bind(value);
        Ok(())
    }

    /// Clone every cell's current value, in register order, for a
    /// diagnostics snapshot (a stack trace frame).
    #[must_use]
    pub fn snapshot(&self) -> Vec<Value> {
        self.cells.iter().map(|cell| cell.get().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_set_is_not_all_bound_unless_empty() {
        let empty = RegisterSet::allocate(0);
        assert!(empty.all_bound());
        let one = RegisterSet::allocate(1);
        assert!(!one.all_bound());
    }

    #[test]
    fn binding_every_cell_satisfies_frame_balance() {
        let mut set = RegisterSet::allocate(2);
        set.bind(0, Value::Int64(1)).unwrap();
        assert!(!set.all_bound());
        set.bind(1, Value::Int64(2)).unwrap();
        assert!(set.all_bound());
    }

    #[test]
    fn out_of_range_access_is_rejected() {
        let set = RegisterSet::allocate(1);
        assert!(set.get(1).is_err());
    }
}
