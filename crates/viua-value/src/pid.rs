// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Process identifiers.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Opaque 128-bit process identifier.
///
/// Allocated from a monotonic sequence owned by the kernel; never reused
/// while a mailbox exists for it. The high word is a generation counter that
/// only advances when the low word wraps, which at one allocation per
/// nanosecond would take longer than the age of the universe - in practice
/// `high` stays zero for the lifetime of any real VM invocation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Pid(u128);

impl Pid {
    /// The never-valid sentinel PID, used for "no process" fields.
    pub const NULL: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_raw(self) -> u128 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({:#034x})", self.0)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{:#018x}.{:#018x}>", (self.0 >> 64) as u64, self.0 as u64)
    }
}

/// Monotonic PID allocator.
///
/// Owned by the kernel, never by a process. `next` starts at 1 so `Pid::NULL`
/// is never handed out.
#[derive(Debug, Default)]
pub struct PidGenerator {
    low: AtomicU64,
    high: AtomicU64,
}

impl PidGenerator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            low: AtomicU64::new(1),
            high: AtomicU64::new(0),
        }
    }

    /// Allocate the next PID. Wraps the low word into a generation bump on
    /// the high word rather than ever returning `Pid::NULL`.
    pub fn next(&self) -> Pid {
        let low = self.low.fetch_add(1, Ordering::Relaxed);
        let high = if low == u64::MAX {
            self.high.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.high.load(Ordering::Relaxed)
        };
        Pid::from_raw((u128::from(high) << 64) | u128::from(low.wrapping_add(1)))
    }
}
