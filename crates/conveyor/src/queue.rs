use crate::Error;

/// Role of a slot queue within a scheduler shard.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum QueueKind {
    ActivationOfSlot,
    Unused,
    Working,
    Active,
    Polling,
}

/// Handle of a slot inside its pool.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct SlotId(u32);

/// Handle of a queue inside its pool.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct QueueId(u32);

struct SlotNode {
    next: u32,
    prev: u32,
    owner: Option<QueueId>,
    // Sentinel nodes head their queue's ring and are not user slots.
    sentinel_of: Option<QueueId>,
}

struct QueueState {
    kind: QueueKind,
    sentinel: u32,
    count: usize,
}

/// Arena of slots and the circular doubly-linked queues threading them.
///
/// Links are arena indices rather than pointers: a slot embeds its
/// `next`/`prev` links and owning queue, which keeps queue membership
/// intrusive (a slot is in at most one queue, O(1) removal) in safe code.
/// Every queue rings through its own sentinel node.
#[derive(Default)]
pub struct SlotPool {
    slots: Vec<SlotNode>,
    queues: Vec<QueueState>,
}

impl SlotPool {
    pub fn new() -> SlotPool {
        SlotPool::default()
    }

    /// Create a detached slot.
    pub fn insert_slot(&mut self) -> SlotId {
        let ix = self.slots.len() as u32;
        self.slots.push(SlotNode {
            next: ix,
            prev: ix,
            owner: None,
            sentinel_of: None,
        });
        SlotId(ix)
    }

    pub fn new_queue(&mut self, kind: QueueKind) -> QueueId {
        let queue = QueueId(self.queues.len() as u32);
        let sentinel = self.slots.len() as u32;
        self.slots.push(SlotNode {
            next: sentinel,
            prev: sentinel,
            owner: Some(queue),
            sentinel_of: Some(queue),
        });
        self.queues.push(QueueState {
            kind,
            sentinel,
            count: 0,
        });
        queue
    }

    pub fn kind(&self, queue: QueueId) -> QueueKind {
        self.queues[queue.0 as usize].kind
    }

    pub fn len(&self, queue: QueueId) -> usize {
        self.queues[queue.0 as usize].count
    }

    pub fn is_empty(&self, queue: QueueId) -> bool {
        self.len(queue) == 0
    }

    /// The queue a slot currently belongs to.
    pub fn queue_of(&self, slot: SlotId) -> Option<QueueId> {
        self.slots[slot.0 as usize].owner
    }

    pub fn first(&self, queue: QueueId) -> Option<SlotId> {
        let sentinel = self.queues[queue.0 as usize].sentinel;
        let next = self.slots[sentinel as usize].next;
        (next != sentinel).then(|| SlotId(next))
    }

    pub fn last(&self, queue: QueueId) -> Option<SlotId> {
        let sentinel = self.queues[queue.0 as usize].sentinel;
        let prev = self.slots[sentinel as usize].prev;
        (prev != sentinel).then(|| SlotId(prev))
    }

    pub fn add_first(&mut self, queue: QueueId, slot: SlotId) -> Result<(), Error> {
        self.ensure_detached(slot)?;
        let after = self.queues[queue.0 as usize].sentinel;
        self.link_after(after, slot.0, queue);
        Ok(())
    }

    pub fn add_last(&mut self, queue: QueueId, slot: SlotId) -> Result<(), Error> {
        self.ensure_detached(slot)?;
        let before = self.queues[queue.0 as usize].sentinel;
        let after = self.slots[before as usize].prev;
        self.link_after(after, slot.0, queue);
        Ok(())
    }

    /// Detach the first slot of `queue`, validating the queue's kind tag.
    pub fn pop_first(&mut self, queue: QueueId, expected: QueueKind) -> Result<Option<SlotId>, Error> {
        let actual = self.kind(queue);
        if actual != expected {
            return Err(Error::WrongQueueKind { expected, actual });
        }
        let first = self.first(queue);
        if let Some(slot) = first {
            self.remove(slot);
        }
        Ok(first)
    }

    /// Detach a slot from its queue. Detaching an unqueued slot is a no-op.
    pub fn remove(&mut self, slot: SlotId) {
        let node = &self.slots[slot.0 as usize];
        assert!(node.sentinel_of.is_none(), "cannot remove a queue sentinel");

        let Some(owner) = node.owner else { return };
        let (next, prev) = (node.next, node.prev);

        self.slots[prev as usize].next = next;
        self.slots[next as usize].prev = prev;

        let node = &mut self.slots[slot.0 as usize];
        node.next = slot.0;
        node.prev = slot.0;
        node.owner = None;

        self.queues[owner.0 as usize].count -= 1;
    }

    /// Splice every slot of `src` onto the tail of `dst`, leaving `src`
    /// empty. The ring splice is O(1); each moved slot is then re-tagged
    /// with its new owner.
    pub fn append_all(&mut self, dst: QueueId, src: QueueId) {
        if dst == src || self.is_empty(src) {
            return;
        }
        let src_sentinel = self.queues[src.0 as usize].sentinel;
        let dst_sentinel = self.queues[dst.0 as usize].sentinel;

        let head = self.slots[src_sentinel as usize].next;
        let tail = self.slots[src_sentinel as usize].prev;
        let moved = self.queues[src.0 as usize].count;

        // Empty the source ring.
        let src_node = &mut self.slots[src_sentinel as usize];
        src_node.next = src_sentinel;
        src_node.prev = src_sentinel;
        self.queues[src.0 as usize].count = 0;

        // Re-tag the moved chain.
        let mut cursor = head;
        loop {
            self.slots[cursor as usize].owner = Some(dst);
            if cursor == tail {
                break;
            }
            cursor = self.slots[cursor as usize].next;
        }

        // Splice the chain before the destination sentinel.
        let dst_tail = self.slots[dst_sentinel as usize].prev;
        self.slots[dst_tail as usize].next = head;
        self.slots[head as usize].prev = dst_tail;
        self.slots[tail as usize].next = dst_sentinel;
        self.slots[dst_sentinel as usize].prev = tail;

        self.queues[dst.0 as usize].count += moved;
    }

    /// Detach every slot of `queue`.
    pub fn remove_all(&mut self, queue: QueueId) {
        while let Some(slot) = self.first(queue) {
            self.remove(slot);
        }
    }

    fn ensure_detached(&self, slot: SlotId) -> Result<(), Error> {
        let node = &self.slots[slot.0 as usize];
        assert!(node.sentinel_of.is_none(), "cannot enqueue a queue sentinel");
        if node.owner.is_some() {
            return Err(Error::AlreadyQueued);
        }
        Ok(())
    }

    fn link_after(&mut self, after: u32, slot: u32, owner: QueueId) {
        let next = self.slots[after as usize].next;
        self.slots[after as usize].next = slot;
        self.slots[next as usize].prev = slot;

        let node = &mut self.slots[slot as usize];
        node.next = next;
        node.prev = after;
        node.owner = Some(owner);

        self.queues[owner.0 as usize].count += 1;
    }
}
