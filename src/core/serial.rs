//! Wraparound-safe command id arithmetic.
//!
//! Command ids are 32-bit serial numbers that cycle. Two ids are only
//! comparable when they are within half the id space of each other; the
//! session never lets more than `command_limit` ids be outstanding, which
//! keeps every comparison it makes inside that window.
//!
//! All id ordering in the crate goes through this module. `CommandId`
//! deliberately does not implement `Ord`.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(u32);

impl CommandId {
    pub const ZERO: CommandId = CommandId(0);

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn next(self) -> CommandId {
        CommandId(self.0.wrapping_add(1))
    }

    pub const fn prev(self) -> CommandId {
        CommandId(self.0.wrapping_sub(1))
    }

    pub const fn add(self, delta: u32) -> CommandId {
        CommandId(self.0.wrapping_add(delta))
    }

    /// Forward distance from `base` to `self`, modulo 2^32.
    pub const fn offset_from(self, base: CommandId) -> u32 {
        self.0.wrapping_sub(base.0)
    }
}

impl fmt::Debug for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandId({})", self.0)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for CommandId {
    fn from(value: u32) -> Self {
        CommandId(value)
    }
}

impl From<CommandId> for u32 {
    fn from(value: CommandId) -> u32 {
        value.0
    }
}

/// `a < b` iff `a - b` (mod 2^32) has its high bit set.
pub const fn lt(a: CommandId, b: CommandId) -> bool {
    (a.0.wrapping_sub(b.0) as i32) < 0
}

pub const fn le(a: CommandId, b: CommandId) -> bool {
    (a.0.wrapping_sub(b.0) as i32) <= 0
}

pub const fn gt(a: CommandId, b: CommandId) -> bool {
    (a.0.wrapping_sub(b.0) as i32) > 0
}

pub const fn ge(a: CommandId, b: CommandId) -> bool {
    (a.0.wrapping_sub(b.0) as i32) >= 0
}

pub const fn max(a: CommandId, b: CommandId) -> CommandId {
    if gt(a, b) { a } else { b }
}

pub const fn min(a: CommandId, b: CommandId) -> CommandId {
    if lt(a, b) { a } else { b }
}
