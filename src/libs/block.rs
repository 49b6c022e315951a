//! Block provenance of a sequence.
//!
//! Every site ever created during a simulation owns a unique column id:
//! ids `0..root_len` belong to the root sequence, and each insertion takes
//! the next contiguous run of fresh ids. A node's sequence is an ordered
//! list of blocks, each block a run of consecutive ids from one origin.

/// Global id of a site, unique across the whole simulation.
pub type ColumnId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Root,
    Insertion(usize),
}

/// A run of `len` consecutive columns starting at `column`.
///
/// A block with `len == 0` is a tombstone: everything it held has been
/// deleted, but its place in the order is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub origin: Origin,
    pub column: ColumnId,
    pub len: usize,
}

impl Block {
    pub fn is_tombstone(&self) -> bool {
        self.len == 0
    }

    pub fn columns(&self) -> std::ops::Range<ColumnId> {
        self.column..self.column + self.len
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Insertion,
    Deletion,
}

/// One indel on a branch. `position` counts live sites of the sequence the
/// event is applied to; an insertion goes before site `position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub position: usize,
    pub length: usize,
}

impl Event {
    pub fn insertion(position: usize, length: usize) -> Self {
        Self {
            kind: EventKind::Insertion,
            position,
            length,
        }
    }

    pub fn deletion(position: usize, length: usize) -> Self {
        Self {
            kind: EventKind::Deletion,
            position,
            length,
        }
    }
}

/// Where an insertion landed: its columns follow `anchor`, the live column
/// just left of the insertion point (`None` at the sequence start).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertionRecord {
    pub id: usize,
    pub anchor: Option<ColumnId>,
    pub first_column: ColumnId,
    pub len: usize,
}

/// What happened when an event was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted(usize),
    /// Number of sites removed after clamping to the sequence end
    Deleted(usize),
    /// Refused because the result would be shorter than the floor
    Rejected,
    /// Zero-length event, or a deletion on an empty sequence
    Skipped,
}

/// Ordered blocks of one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSequence {
    blocks: Vec<Block>,
    live: usize,
}

impl BlockSequence {
    pub fn root(len: usize) -> Self {
        Self {
            blocks: vec![Block {
                origin: Origin::Root,
                column: 0,
                len,
            }],
            live: len,
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Number of live sites.
    pub fn live_len(&self) -> usize {
        self.live
    }

    /// Live column ids, in sequence order.
    pub fn columns(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.blocks.iter().flat_map(|b| b.columns())
    }

    fn insert(&mut self, position: usize, block: Block) -> Option<ColumnId> {
        if position == 0 {
            self.blocks.insert(0, block);
            self.live += block.len;
            return None;
        }

        // The block holding site `position - 1`
        let mut acc = 0;
        let mut found = None;
        for (idx, b) in self.blocks.iter().enumerate() {
            if b.len > 0 && acc + b.len >= position {
                found = Some((idx, position - acc));
                break;
            }
            acc += b.len;
        }
        let (idx, offset) = found.unwrap_or_else(|| {
            let last = self.blocks.len().saturating_sub(1);
            (last, self.blocks.get(last).map(|b| b.len).unwrap_or(0))
        });

        let host = self.blocks[idx];
        let anchor = if host.len > 0 {
            Some(host.column + offset - 1)
        } else {
            None
        };

        if offset >= host.len {
            self.blocks.insert(idx + 1, block);
        } else {
            let left = Block {
                len: offset,
                ..host
            };
            let right = Block {
                column: host.column + offset,
                len: host.len - offset,
                ..host
            };
            self.blocks
                .splice(idx..=idx, [left, block, right].into_iter());
        }
        self.live += block.len;
        anchor
    }

    // Removes live sites [start, start + len); the range must be in bounds.
    fn delete(&mut self, start: usize, len: usize) {
        let end = start + len;
        let mut out: Vec<Block> = Vec::with_capacity(self.blocks.len() + 1);
        let mut acc = 0;

        for b in self.blocks.drain(..) {
            let (lo, hi) = (acc, acc + b.len);
            acc = hi;

            let cut_lo = lo.max(start);
            let cut_hi = hi.min(end);
            if b.len == 0 || cut_lo >= cut_hi {
                push_block(&mut out, b);
                continue;
            }

            let keep_left = cut_lo - lo;
            let keep_right = hi - cut_hi;
            if keep_left > 0 {
                push_block(
                    &mut out,
                    Block {
                        len: keep_left,
                        ..b
                    },
                );
            }
            if keep_right > 0 {
                push_block(
                    &mut out,
                    Block {
                        column: b.column + (cut_hi - lo),
                        len: keep_right,
                        ..b
                    },
                );
            }
            if keep_left == 0 && keep_right == 0 {
                push_block(&mut out, Block { len: 0, ..b });
            }
        }

        self.blocks = out;
        self.live -= len;
    }
}

// Consecutive tombstones carry no extra information; keep only the first.
fn push_block(out: &mut Vec<Block>, b: Block) {
    if b.len == 0 && out.last().is_some_and(|last| last.len == 0) {
        return;
    }
    out.push(b);
}

/// Applies events to block sequences, handing out fresh insertion ids and
/// column ids and logging every insertion in creation order.
#[derive(Debug, Clone)]
pub struct BlockEngine {
    root_len: usize,
    min_len: usize,
    next_column: ColumnId,
    insertions: Vec<InsertionRecord>,
}

impl BlockEngine {
    pub fn new(root_len: usize, min_len: usize) -> Self {
        Self {
            root_len,
            min_len,
            next_column: root_len,
            insertions: Vec::new(),
        }
    }

    pub fn root_sequence(&self) -> BlockSequence {
        BlockSequence::root(self.root_len)
    }

    /// Every column id handed out so far is below this.
    pub fn num_columns(&self) -> usize {
        self.next_column
    }

    pub fn insertions(&self) -> &[InsertionRecord] {
        &self.insertions
    }

    pub fn into_insertions(self) -> Vec<InsertionRecord> {
        self.insertions
    }

    /// Applies one event in place.
    ///
    /// Insertion positions past the end append. Deletions running past the
    /// end are truncated first; the truncated deletion is then refused whole
    /// if it would leave fewer than `min_len` sites.
    pub fn apply(&mut self, seq: &mut BlockSequence, event: &Event) -> Applied {
        if event.length == 0 {
            return Applied::Skipped;
        }

        match event.kind {
            EventKind::Insertion => {
                let id = self.insertions.len();
                let block = Block {
                    origin: Origin::Insertion(id),
                    column: self.next_column,
                    len: event.length,
                };
                let position = event.position.min(seq.live_len());
                let anchor = seq.insert(position, block);
                self.insertions.push(InsertionRecord {
                    id,
                    anchor,
                    first_column: self.next_column,
                    len: event.length,
                });
                self.next_column += event.length;
                Applied::Inserted(id)
            }
            EventKind::Deletion => {
                let live = seq.live_len();
                if event.position >= live {
                    return Applied::Skipped;
                }
                let len = event.length.min(live - event.position);
                if live - len < self.min_len {
                    return Applied::Rejected;
                }
                seq.delete(event.position, len);
                Applied::Deleted(len)
            }
        }
    }

    /// A child's blocks: the parent's, with `events` replayed in order.
    pub fn derive(&mut self, parent: &BlockSequence, events: &[Event]) -> BlockSequence {
        let mut child = parent.clone();
        for event in events {
            self.apply(&mut child, event);
        }
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(seq: &BlockSequence) -> Vec<ColumnId> {
        seq.columns().collect()
    }

    #[test]
    fn insertion_splits_block() {
        let mut engine = BlockEngine::new(5, 0);
        let mut seq = engine.root_sequence();

        let applied = engine.apply(&mut seq, &Event::insertion(2, 3));
        assert_eq!(applied, Applied::Inserted(0));
        assert_eq!(seq.live_len(), 8);
        assert_eq!(cols(&seq), vec![0, 1, 5, 6, 7, 2, 3, 4]);
        assert_eq!(seq.blocks().len(), 3);
        assert_eq!(
            engine.insertions()[0],
            InsertionRecord {
                id: 0,
                anchor: Some(1),
                first_column: 5,
                len: 3
            }
        );
    }

    #[test]
    fn insertion_at_ends() {
        let mut engine = BlockEngine::new(3, 0);
        let mut seq = engine.root_sequence();

        engine.apply(&mut seq, &Event::insertion(0, 1));
        engine.apply(&mut seq, &Event::insertion(4, 2));
        assert_eq!(cols(&seq), vec![3, 0, 1, 2, 4, 5]);
        assert_eq!(engine.insertions()[0].anchor, None);
        assert_eq!(engine.insertions()[1].anchor, Some(2));
        assert_eq!(engine.num_columns(), 6);
    }

    #[test]
    fn deletion_shrinks_and_tombstones() {
        let mut engine = BlockEngine::new(6, 0);
        let mut seq = engine.root_sequence();
        engine.apply(&mut seq, &Event::insertion(3, 2)); // 0 1 2 6 7 3 4 5

        // remove 2 6 7 3
        let applied = engine.apply(&mut seq, &Event::deletion(2, 4));
        assert_eq!(applied, Applied::Deleted(4));
        assert_eq!(cols(&seq), vec![0, 1, 4, 5]);
        assert!(seq.blocks().iter().any(|b| b.is_tombstone()
            && b.origin == Origin::Insertion(0)));

        // middle of a block keeps both flanks with the same origin
        let mut seq = engine.root_sequence();
        engine.apply(&mut seq, &Event::deletion(2, 2));
        assert_eq!(cols(&seq), vec![0, 1, 4, 5]);
        assert!(seq.blocks().iter().all(|b| b.origin == Origin::Root));
    }

    #[test]
    fn deletion_truncated_at_end() {
        let mut engine = BlockEngine::new(10, 0);
        let mut seq = engine.root_sequence();

        let applied = engine.apply(&mut seq, &Event::deletion(7, 50));
        assert_eq!(applied, Applied::Deleted(3));
        assert_eq!(seq.live_len(), 7);

        let applied = engine.apply(&mut seq, &Event::deletion(7, 1));
        assert_eq!(applied, Applied::Skipped);
    }

    #[test]
    fn deletion_respects_floor() {
        let mut engine = BlockEngine::new(10, 8);
        let mut seq = engine.root_sequence();

        assert_eq!(
            engine.apply(&mut seq, &Event::deletion(0, 3)),
            Applied::Rejected
        );
        assert_eq!(seq.live_len(), 10);
        assert_eq!(
            engine.apply(&mut seq, &Event::deletion(8, 5)),
            Applied::Deleted(2)
        );
        assert_eq!(seq.live_len(), 8);
        assert_eq!(
            engine.apply(&mut seq, &Event::deletion(0, 1)),
            Applied::Rejected
        );
    }

    #[test]
    fn live_length_bookkeeping() {
        let mut engine = BlockEngine::new(20, 0);
        let mut seq = engine.root_sequence();
        let events = [
            Event::insertion(5, 4),
            Event::deletion(3, 6),
            Event::insertion(0, 2),
            Event::deletion(10, 1),
            Event::insertion(17, 5),
            Event::deletion(0, 100),
        ];

        for e in &events {
            let before = seq.live_len();
            let applied = engine.apply(&mut seq, e);
            let after = seq.live_len();
            match applied {
                Applied::Inserted(_) => assert_eq!(after, before + e.length),
                Applied::Deleted(n) => {
                    assert!(after <= before);
                    assert_eq!(after, before - n);
                }
                _ => assert_eq!(after, before),
            }
            assert_eq!(seq.columns().count(), after);
            let block_total: usize = seq.blocks().iter().map(|b| b.len).sum();
            assert_eq!(block_total, after);
        }
        assert_eq!(seq.live_len(), 0);
    }

    #[test]
    fn derive_keeps_parent_untouched() {
        let mut engine = BlockEngine::new(4, 0);
        let parent = engine.root_sequence();
        let child = engine.derive(&parent, &[Event::deletion(1, 2), Event::insertion(1, 1)]);
        assert_eq!(cols(&parent), vec![0, 1, 2, 3]);
        assert_eq!(cols(&child), vec![0, 4, 3]);
        assert_eq!(engine.insertions()[0].anchor, Some(0));
    }
}
