//! Word-addressed linear memory shared between native worker threads.

use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::Fault;

/// Shared linear memory.
///
/// The lower `data_words` are free for the program to use. The rest is carved
/// into per-thread blocks (stack and thread-local storage) that a worker
/// allocates during bindings init and must give back before it exits.
#[derive(Clone)]
pub struct SharedMemory {
    inner: Arc<Inner>,
}

struct Inner {
    words: Box<[AtomicU32]>,
    data_words: usize,
    blocks: Mutex<BlockAllocator>,
}

#[derive(Debug, Eq, PartialEq)]
pub struct ThreadBlock {
    id: u32,
    range: Range<usize>,
}

impl ThreadBlock {
    pub fn start(&self) -> usize {
        self.range.start
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

struct BlockAllocator {
    next_id: u32,
    bump: usize,
    free: Vec<Range<usize>>,
    live: Vec<(u32, Range<usize>)>,
}

impl BlockAllocator {
    /// First fit from the free list.
    fn take_free(&mut self, words: usize) -> Option<Range<usize>> {
        let index = self.free.iter().position(|it| it.len() >= words)?;
        let free = &mut self.free[index];
        let range = free.start..free.start + words;
        free.start += words;
        if free.is_empty() {
            self.free.remove(index);
        }
        Some(range)
    }

    /// Keeps the free list sorted and coalesced. A range that ends at the
    /// bump pointer goes back to the untouched tail instead.
    fn give_back(&mut self, range: Range<usize>) {
        let mut index = self.free.partition_point(|it| it.start < range.start);
        self.free.insert(index, range);
        if index + 1 < self.free.len() && self.free[index].end == self.free[index + 1].start {
            let next = self.free.remove(index + 1);
            self.free[index].end = next.end;
        }
        if index > 0 && self.free[index - 1].end == self.free[index].start {
            let merged = self.free.remove(index);
            index -= 1;
            self.free[index].end = merged.end;
        }
        if self.free[index].end == self.bump && index + 1 == self.free.len() {
            self.bump = self.free.remove(index).start;
        }
    }
}

impl SharedMemory {
    pub fn new(data_words: usize, thread_words: usize) -> Self {
        let words = (0..data_words + thread_words)
            .map(|_| AtomicU32::new(0))
            .collect();
        Self {
            inner: Arc::new(Inner {
                words,
                data_words,
                blocks: Mutex::new(BlockAllocator {
                    next_id: 0,
                    bump: data_words,
                    free: vec![],
                    live: vec![],
                }),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.words.is_empty()
    }

    pub fn data_words(&self) -> usize {
        self.inner.data_words
    }

    /// Panics if `addr` is out of bounds.
    pub fn load(&self, addr: usize) -> u32 {
        self.inner.words[addr].load(Ordering::SeqCst)
    }

    /// Panics if `addr` is out of bounds.
    pub fn store(&self, addr: usize, value: u32) {
        self.inner.words[addr].store(value, Ordering::SeqCst);
    }

    /// Panics if `addr` is out of bounds.
    pub fn fetch_add(&self, addr: usize, value: u32) -> u32 {
        self.inner.words[addr].fetch_add(value, Ordering::SeqCst)
    }

    pub fn ptr_eq(&self, other: &SharedMemory) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn alloc_thread_block(&self, words: usize) -> Result<ThreadBlock, Fault> {
        let len = self.len();
        let mut blocks = self.blocks();
        let range = match blocks.take_free(words) {
            Some(range) => range,
            None => {
                let start = blocks.bump;
                let Some(end) = start.checked_add(words).filter(|end| *end <= len) else {
                    return Err(Fault(format!(
                        "no room for a {words} word thread block ({} words in use)",
                        start - self.data_words()
                    )));
                };
                blocks.bump = end;
                start..end
            }
        };
        let id = blocks.next_id;
        blocks.next_id += 1;
        blocks.live.push((id, range.clone()));
        Ok(ThreadBlock { id, range })
    }

    /// Returns false if the block was already freed.
    pub fn free_thread_block(&self, block: &ThreadBlock) -> bool {
        let mut blocks = self.blocks();
        let Some(index) = blocks.live.iter().position(|(id, _)| *id == block.id) else {
            log::warn!("thread block {} freed twice", block.id);
            return false;
        };
        let (_, range) = blocks.live.swap_remove(index);
        for word in &self.inner.words[range.clone()] {
            word.store(0, Ordering::Relaxed);
        }
        blocks.give_back(range);
        true
    }

    pub fn live_thread_blocks(&self) -> usize {
        self.blocks().live.len()
    }

    fn blocks(&self) -> MutexGuard<'_, BlockAllocator> {
        self.inner
            .blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
