//! Channel ID allocation.

use crate::state::channel::ChannelId;
use std::collections::VecDeque;

/// First ID handed out; 0 is reserved as "no channel".
const CHANNEL_ID_START: u32 = 1;

/// Free-list allocator for 16-bit channel IDs.
///
/// Released IDs are reused oldest-first before the counter advances, which
/// keeps the ID space bounded for servers with many short-lived private
/// channels. The caller supplies an "in use" predicate so an ID held by a
/// live channel is never returned, whatever the queue contains.
#[derive(Debug)]
pub struct ChannelIdAllocator {
    next: u32,
    released: VecDeque<ChannelId>,
}

impl Default for ChannelIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelIdAllocator {
    pub fn new() -> Self {
        Self {
            next: CHANNEL_ID_START,
            released: VecDeque::new(),
        }
    }

    /// Next usable ID, or `None` when all 65535 IDs are live.
    pub fn next_usable(&mut self, in_use: impl Fn(ChannelId) -> bool) -> Option<ChannelId> {
        while let Some(id) = self.released.pop_front() {
            if !in_use(id) {
                return Some(id);
            }
        }

        while self.next <= u32::from(ChannelId::MAX) {
            let id = self.next as ChannelId;
            self.next += 1;
            if !in_use(id) {
                return Some(id);
            }
        }

        None
    }

    /// Return an ID to the reuse queue.
    pub fn release(&mut self, id: ChannelId) {
        if id != 0 && u32::from(id) < self.next && !self.released.contains(&id) {
            self.released.push_back(id);
        }
    }

    /// Mark an ID taken outside `next_usable` (a channel restored from the
    /// store). IDs skipped over by the counter become reusable.
    pub fn reserve(&mut self, id: ChannelId) {
        if id == 0 {
            return;
        }
        let id32 = u32::from(id);
        if id32 >= self.next {
            for gap in self.next..id32 {
                self.released.push_back(gap as ChannelId);
            }
            self.next = id32 + 1;
        } else {
            self.released.retain(|&r| r != id);
        }
    }

    /// IDs currently waiting for reuse, oldest first.
    pub fn released(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.released.iter().copied()
    }
}
