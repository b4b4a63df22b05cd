// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Resolving a catcher for a thrown value against the active stack's
//! installed try-frames.

use std::collections::HashMap;

use viua_process::Stack;
use viua_value::Atom;

/// Where a catcher was found: the frame depth to unwind down to (the frame
/// that installed the matching try-frame stays active) and the bytecode
/// address of the handler.
pub struct Catch {
    pub frame_depth: usize,
    pub handler_address: usize,
}

/// Search `stack`'s installed try-frames, innermost first, for one that
/// resolves `exception_type` (directly or through `ancestors`).
#[must_use]
pub fn find_catcher(stack: &Stack, exception_type: &Atom, ancestors: &HashMap<Atom, Atom>) -> Option<Catch> {
    stack
        .try_frames()
        .iter()
        .rev()
        .find_map(|tf| tf.resolve(exception_type, ancestors).map(|addr| Catch { frame_depth: tf.frame_index + 1, handler_address: addr }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use viua_isa::{RegisterAccess, RegisterSet as Rs};
    use viua_process::{Frame, RegisterSet, TryFrame};

    fn frame() -> Frame {
        Frame::new(Atom::intern("f"), Atom::intern("m"), RegisterSet::allocate(0), 0, RegisterAccess::direct(Rs::Local, 0).unwrap())
    }

    #[test]
    fn resolves_the_innermost_matching_try_frame() {
        let mut stack = Stack::new();
        stack.push_frame(frame()).unwrap();
        let mut outer = TryFrame::new(0);
        outer.install(Atom::intern("Error"), 10);
        stack.install_try_frame(outer);
        stack.push_frame(frame()).unwrap();
        let mut inner = TryFrame::new(1);
        inner.install(Atom::intern("Error"), 20);
        stack.install_try_frame(inner);

        let found = find_catcher(&stack, &Atom::intern("Error"), &HashMap::new()).unwrap();
        assert_eq!(found.handler_address, 20);
        assert_eq!(found.frame_depth, 2);
    }

    #[test]
    fn no_try_frame_means_no_catcher() {
        let stack = Stack::new();
        assert!(find_catcher(&stack, &Atom::intern("Error"), &HashMap::new()).is_none());
    }
}
