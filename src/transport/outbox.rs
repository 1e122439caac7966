//! Replay buffer for sent, not-yet-completed commands.

use std::collections::HashMap;

use crate::core::{Command, CommandId, Range, RangeSet, SessionLimits, serial};

/// Outcome of applying one completed range.
#[derive(Debug, Default)]
pub struct Completion {
    /// The watermark moved forward.
    pub advanced: bool,
    /// Buffered commands released by this range, in id order. Their
    /// completion listeners are fired by the caller once no lock is held.
    pub finished: Vec<Command>,
}

#[derive(Debug)]
pub struct Outbox {
    commands: HashMap<CommandId, Command>,
    command_bytes: usize,
    /// Highest id such that every id up to and including it is complete.
    max_complete: CommandId,
    /// Completed ranges that are not yet contiguous with `max_complete`.
    early: RangeSet,
    command_limit: u32,
    byte_limit: usize,
}

impl Outbox {
    pub fn new(limits: &SessionLimits) -> Self {
        Self {
            commands: HashMap::new(),
            command_bytes: 0,
            max_complete: CommandId::ZERO.prev(),
            early: RangeSet::new(),
            command_limit: limits.command_limit.clamp(1, i32::MAX as u32),
            byte_limit: limits.byte_limit,
        }
    }

    pub fn max_complete(&self) -> CommandId {
        self.max_complete
    }

    pub fn command_bytes(&self) -> usize {
        self.command_bytes
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn buffer(&mut self, id: CommandId, command: Command) {
        self.command_bytes += command.body_size();
        if let Some(previous) = self.commands.insert(id, command) {
            self.command_bytes -= previous.body_size();
        }
    }

    pub fn get(&self, id: CommandId) -> Option<&Command> {
        self.commands.get(&id)
    }

    pub fn get_mut(&mut self, id: CommandId) -> Option<&mut Command> {
        self.commands.get_mut(&id)
    }

    /// At most `command_limit` commands may be outstanding, and buffered
    /// bodies may not reach `byte_limit`.
    pub fn is_full(&self, id: CommandId) -> bool {
        self.is_commands_full(id) || self.is_bytes_full()
    }

    /// Serial comparison, so a watermark already past `id` never reads as a
    /// wrapped, near-2^32 distance.
    pub fn is_commands_full(&self, id: CommandId) -> bool {
        serial::gt(id, self.max_complete.add(self.command_limit))
    }

    pub fn is_bytes_full(&self) -> bool {
        self.command_bytes >= self.byte_limit
    }

    /// Removes buffered commands in `[max(max_complete, lower), upper]` and
    /// advances the watermark when the range touches it.
    pub fn complete(&mut self, lower: CommandId, upper: CommandId) -> Completion {
        let Some(range) = Range::new(serial::max(self.max_complete, lower), upper) else {
            return Completion::default();
        };

        let mut finished = Vec::new();
        if range.count() <= self.commands.len() as u64 {
            let mut id = range.lower();
            loop {
                if let Some(command) = self.commands.remove(&id) {
                    finished.push(command);
                }
                if id == range.upper() {
                    break;
                }
                id = id.next();
            }
        } else {
            let mut ids: Vec<CommandId> = self
                .commands
                .keys()
                .copied()
                .filter(|id| range.includes(*id))
                .collect();
            ids.sort_by_key(|id| id.offset_from(range.lower()));
            for id in ids {
                if let Some(command) = self.commands.remove(&id) {
                    finished.push(command);
                }
            }
        }
        for command in &finished {
            self.command_bytes -= command.body_size();
        }

        let old = self.max_complete;
        if serial::le(lower, self.max_complete.next()) {
            self.max_complete = serial::max(self.max_complete, upper);
            self.absorb_early();
        } else if let Some(early) = Range::new(lower, upper) {
            self.early.add_range(early);
        }

        Completion {
            advanced: serial::gt(self.max_complete, old),
            finished,
        }
    }

    /// Ids that must be retransmitted on resume, oldest first, up to
    /// (excluding) `commands_out`.
    pub fn replay_window(&self, commands_out: CommandId) -> impl Iterator<Item = CommandId> {
        let start = self.max_complete.next();
        let count = if serial::lt(start, commands_out) {
            commands_out.offset_from(start)
        } else {
            0
        };
        (0..count).map(move |offset| start.add(offset))
    }

    fn absorb_early(&mut self) {
        while let Some(first) = self.early.first() {
            if serial::gt(first.lower(), self.max_complete.next()) {
                break;
            }
            self.max_complete = serial::max(self.max_complete, first.upper());
            let mut consumed = RangeSet::new();
            consumed.add_range(first);
            self.early.subtract(&consumed);
        }
    }
}
