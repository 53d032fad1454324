//! Arena storage for parsed programs.
//!
//! Two kinds of arena live here:
//!
//! - [`MemoryPool`]: a trunk-based bump allocator handing out aligned byte
//!   ranges.  String literals, block bodies and compact scope names are
//!   carved from it.
//! - [`Arena<T>`]: a typed vector arena.  Nodes are referenced by [`Idx<T>`]
//!   and contiguous runs by [`Span<T>`], so the AST is plain data with no
//!   pointers.
//!
//! Neither arena frees anything individually; everything goes away when the
//! owner is dropped.

use std::fmt;
use std::marker::PhantomData;

/// Default capacity of one [`MemoryPool`] trunk.
pub const DEFAULT_TRUNK_SIZE: usize = 4096;

// ── Byte pool ─────────────────────────────────────────────────────────────────

/// A byte range inside a [`MemoryPool`].
///
/// `offset` is relative to the start of the owning trunk and is always a
/// multiple of the alignment requested when the range was allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteSpan {
    pub trunk: u32,
    pub offset: u32,
    pub len: u32,
}

/// A UTF-8 string stored in a [`MemoryPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrSpan(ByteSpan);

impl StrSpan {
    pub fn len(&self) -> usize {
        self.0.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0.len == 0
    }
}

struct Trunk {
    data: Vec<u8>,
    capacity: usize,
}

impl Trunk {
    fn new(capacity: usize) -> Self {
        Trunk { data: Vec::with_capacity(capacity), capacity }
    }

    fn available(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Try to bump-allocate `size` bytes aligned to `align` inside this trunk.
    fn try_alloc(&mut self, size: usize, align: usize) -> Option<usize> {
        let used = self.data.len();
        let start = used.div_ceil(align) * align;
        if start + size > self.capacity {
            return None;
        }
        self.data.resize(start + size, 0);
        Some(start)
    }
}

/// Trunk-based bump allocator.
pub struct MemoryPool {
    trunks: Vec<Trunk>,
    trunk_size: usize,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new(DEFAULT_TRUNK_SIZE)
    }
}

impl fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (used, total) = self.usage();
        f.debug_struct("MemoryPool")
            .field("trunks", &self.trunks.len())
            .field("used", &used)
            .field("total", &total)
            .finish()
    }
}

impl MemoryPool {
    pub fn new(trunk_size: usize) -> Self {
        MemoryPool { trunks: Vec::new(), trunk_size: trunk_size.max(16) }
    }

    /// Allocate `size` zeroed bytes whose trunk offset is a multiple of `align`.
    ///
    /// Existing trunks are tried newest first.  When none fits, a new trunk
    /// is added: a whole number of regular trunks, or a dedicated one sized
    /// exactly for requests beyond sixteen trunks.
    pub fn alloc(&mut self, size: usize, align: usize) -> ByteSpan {
        let align = align.max(1);
        for (i, trunk) in self.trunks.iter_mut().enumerate().rev() {
            if trunk.available() < size {
                continue;
            }
            if let Some(offset) = trunk.try_alloc(size, align) {
                return make_span(i, offset, size);
            }
        }
        let capacity = if size > 16 * self.trunk_size {
            size
        } else {
            size.max(1).div_ceil(self.trunk_size) * self.trunk_size
        };
        let mut trunk = Trunk::new(capacity);
        // Offset zero satisfies every alignment.
        trunk.data.resize(size, 0);
        self.trunks.push(trunk);
        make_span(self.trunks.len() - 1, 0, size)
    }

    /// Copy `s` into the pool.
    pub fn alloc_str(&mut self, s: &str) -> StrSpan {
        let span = self.alloc(s.len(), 1);
        self.bytes_mut(span).copy_from_slice(s.as_bytes());
        StrSpan(span)
    }

    pub fn bytes(&self, span: ByteSpan) -> &[u8] {
        let start = span.offset as usize;
        &self.trunks[span.trunk as usize].data[start..start + span.len as usize]
    }

    pub fn bytes_mut(&mut self, span: ByteSpan) -> &mut [u8] {
        let start = span.offset as usize;
        &mut self.trunks[span.trunk as usize].data[start..start + span.len as usize]
    }

    pub fn get_str(&self, span: StrSpan) -> &str {
        // A StrSpan is only produced by alloc_str, so the bytes are UTF-8.
        std::str::from_utf8(self.bytes(span.0)).unwrap_or_default()
    }

    /// `(used, total)` bytes across all trunks.
    pub fn usage(&self) -> (usize, usize) {
        self.trunks
            .iter()
            .fold((0, 0), |(used, total), t| (used + t.data.len(), total + t.capacity))
    }

    pub fn trunk_count(&self) -> usize {
        self.trunks.len()
    }
}

fn make_span(trunk: usize, offset: usize, size: usize) -> ByteSpan {
    ByteSpan { trunk: trunk as u32, offset: offset as u32, len: size as u32 }
}

// ── Typed arena ───────────────────────────────────────────────────────────────

/// Index of a `T` inside an [`Arena<T>`].
pub struct Idx<T> {
    raw: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Idx<T> {
    pub fn index(self) -> usize {
        self.raw as usize
    }
}

impl<T> Clone for Idx<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Idx<T> {}
impl<T> PartialEq for Idx<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}
impl<T> Eq for Idx<T> {}
impl<T> std::hash::Hash for Idx<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}
impl<T> fmt::Debug for Idx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.raw)
    }
}

/// A contiguous run of `T`s inside an [`Arena<T>`].
pub struct Span<T> {
    start: u32,
    len: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Span<T> {
    pub const EMPTY: Span<T> = Span { start: 0, len: 0, _marker: PhantomData };

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sub-range `[from, from + count)` relative to this span.
    pub fn sub(self, from: usize, count: usize) -> Span<T> {
        let from = from.min(self.len());
        let count = count.min(self.len() - from);
        Span { start: self.start + from as u32, len: count as u32, _marker: PhantomData }
    }
}

impl<T> Clone for Span<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Span<T> {}
impl<T> PartialEq for Span<T> {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.len == other.len
    }
}
impl<T> Eq for Span<T> {}
impl<T> fmt::Debug for Span<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}..{}", self.start, self.start + self.len)
    }
}

/// Append-only typed storage.
pub struct Arena<T> {
    items: Vec<T>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Arena { items: Vec::new() }
    }
}

impl<T: fmt::Debug> fmt::Debug for Arena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, item: T) -> Idx<T> {
        let raw = self.items.len() as u32;
        self.items.push(item);
        Idx { raw, _marker: PhantomData }
    }

    /// Copy a sequence into a contiguous run.
    pub fn alloc_slice(&mut self, items: impl IntoIterator<Item = T>) -> Span<T> {
        let start = self.items.len() as u32;
        self.items.extend(items);
        let len = self.items.len() as u32 - start;
        Span { start, len, _marker: PhantomData }
    }

    pub fn get(&self, idx: Idx<T>) -> &T {
        &self.items[idx.raw as usize]
    }

    pub fn slice(&self, span: Span<T>) -> &[T] {
        &self.items[span.start as usize..(span.start + span.len) as usize]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_respects_alignment() {
        let mut pool = MemoryPool::new(256);
        pool.alloc(3, 1);
        for align in [1usize, 2, 4, 8, 16, 64, 128] {
            let span = pool.alloc(5, align);
            assert_eq!(span.offset as usize % align, 0, "align {align}");
        }
    }

    #[test]
    fn new_trunk_when_full() {
        let mut pool = MemoryPool::new(64);
        let a = pool.alloc(40, 8);
        let b = pool.alloc(40, 8);
        assert_ne!(a.trunk, b.trunk);
        assert_eq!(pool.trunk_count(), 2);
    }

    #[test]
    fn older_trunk_is_reused() {
        let mut pool = MemoryPool::new(64);
        pool.alloc(40, 1);
        pool.alloc(60, 1);
        // 24 bytes remain in the first trunk
        let c = pool.alloc(16, 1);
        assert_eq!(c.trunk, 0);
        assert_eq!(c.offset, 40);
    }

    #[test]
    fn huge_alloc_gets_dedicated_trunk() {
        let mut pool = MemoryPool::new(16);
        let span = pool.alloc(1000, 4);
        assert_eq!(span.offset, 0);
        let (used, total) = pool.usage();
        assert_eq!((used, total), (1000, 1000));
    }

    #[test]
    fn usage_counts_padding() {
        let mut pool = MemoryPool::new(64);
        pool.alloc(1, 1);
        pool.alloc(1, 8);
        assert_eq!(pool.usage(), (9, 64));
    }

    #[test]
    fn strings_round_trip() {
        let mut pool = MemoryPool::new(16);
        let a = pool.alloc_str("hello");
        let b = pool.alloc_str("a longer string than one trunk");
        let c = pool.alloc_str("");
        assert_eq!(pool.get_str(a), "hello");
        assert_eq!(pool.get_str(b), "a longer string than one trunk");
        assert_eq!(pool.get_str(c), "");
        assert!(c.is_empty());
    }

    #[test]
    fn typed_arena_slices_are_contiguous() {
        let mut arena = Arena::new();
        let first = arena.alloc(1);
        let span = arena.alloc_slice(vec![2, 3, 4]);
        assert_eq!(*arena.get(first), 1);
        assert_eq!(arena.slice(span), &[2, 3, 4]);
        assert_eq!(arena.slice(span.sub(1, 5)), &[3, 4]);
        assert_eq!(arena.slice(Span::EMPTY), &[] as &[i32]);
    }
}
