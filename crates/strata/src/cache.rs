//! An intrusive least-recently-used list over arena tiles.
//!
//! The links live inside each [`Tile`](crate::tile::Tile), so membership
//! costs no allocation and removal is O(1). Order runs head (least recently
//! visited) to tail (most recently visited); the traversal touches every
//! tile it visits and cache eviction walks from the head.

use crate::tile::TileArena;

/// One tile's position in the list. Every tile carries these whether or not
/// it is currently linked in.
#[derive(Debug, Default)]
pub(crate) struct LruLinks {
    prev: Option<u32>,
    next: Option<u32>,
    in_list: bool,
}

/// The list head/tail and length; the rest of the structure is threaded
/// through the tiles themselves.
#[derive(Debug, Default)]
pub(crate) struct LruList {
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl LruList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The number of tiles currently linked in.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// The least recently visited tile.
    pub(crate) fn head(&self) -> Option<u32> {
        self.head
    }

    /// The tile after `index`, toward the most recently visited end.
    pub(crate) fn next_of(&self, arena: &TileArena, index: u32) -> Option<u32> {
        arena.by_index(index).lru.next
    }

    /// Unlinks a tile. No-op when the tile is not in the list.
    pub(crate) fn remove(&mut self, arena: &mut TileArena, index: u32) {
        let links = &mut arena.by_index_mut(index).lru;
        if !links.in_list {
            return;
        }
        let prev = links.prev.take();
        let next = links.next.take();
        links.in_list = false;

        match prev {
            Some(prev) => arena.by_index_mut(prev).lru.next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => arena.by_index_mut(next).lru.prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
    }

    /// Appends a tile at the most recently visited end, unlinking it first
    /// if it is already somewhere in the list.
    pub(crate) fn push_tail(&mut self, arena: &mut TileArena, index: u32) {
        self.remove(arena, index);
        {
            let links = &mut arena.by_index_mut(index).lru;
            links.prev = self.tail;
            links.next = None;
            links.in_list = true;
        }
        match self.tail {
            Some(tail) => arena.by_index_mut(tail).lru.next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
    }

    /// Marks a tile as just visited, moving it to the tail.
    pub(crate) fn touch(&mut self, arena: &mut TileArena, index: u32) {
        self.push_tail(arena, index);
    }
}
