// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Interned atoms.
//!
//! Atoms are the VM's interned-string currency: exception type names, struct
//! keys, and `.rodata` atom literals are all atoms so comparison is a pointer
//! (well, `Arc` pointer) compare rather than a byte compare.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

/// An interned string.
#[derive(Clone, Eq)]
pub struct Atom(Arc<str>);

impl Atom {
    #[must_use]
    pub fn intern(text: &str) -> Self {
        static TABLE: OnceLock<Mutex<HashMap<Arc<str>, ()>>> = OnceLock::new();
        let table = TABLE.get_or_init(|| Mutex::new(HashMap::new()));
        let mut guard = table.lock().expect("atom table mutex poisoned");
        if let Some((existing, ())) = guard.get_key_value(text) {
            return Self(existing.clone());
        }
        let arc: Arc<str> = Arc::from(text);
        guard.insert(arc.clone(), ());
        Self(arc)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

impl PartialOrd for Atom {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Atom {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl std::hash::Hash for Atom {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}", self.0)
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::Atom;

    #[test]
    fn interning_deduplicates_identical_text() {
        let a = Atom::intern("example");
        let b = Atom::intern("example");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_text_is_distinct() {
        assert_ne!(Atom::intern("foo"), Atom::intern("bar"));
    }
}
