//! # byterope
//!
//! An immutable, persistent byte rope.
//!
//! A [`Rope`] is a binary tree of byte runs. Concatenation, slicing and
//! splicing build new trees that share every untouched subtree with their
//! inputs, so deriving a value from a multi-megabyte rope costs time
//! proportional to the tree depth rather than the byte length.
//!
//! All positions are raw byte offsets.
//!
//! ## Example
//!
//! ```rust
//! use byterope::Rope;
//!
//! let r = Rope::from("hello world");
//! let r = r.replace(0, 5, &Rope::from("goodbye"));
//!
//! assert_eq!(r.to_vec(), b"goodbye world");
//! assert_eq!(r.index(0), b'g');
//! assert_eq!(r.slice(8, 13), "world");
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::mem;
use std::sync::{Arc, OnceLock};

use log::{debug, trace};
use thiserror::Error;

// =============================================================================
// Configuration
// =============================================================================

/// Two adjacent leaves whose combined length is at most this many bytes are
/// merged into one leaf on concatenation.
pub const MERGE_THRESHOLD: usize = 128;

// =============================================================================
// Errors
// =============================================================================

/// A position or range that violates a rope's bounds.
///
/// These are caller bugs. The panicking methods ([`Rope::slice`],
/// [`Rope::index`], ...) panic with this error's message; the `try_*` methods
/// return it instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("slice start {start} is greater than slice end {end}")]
    Inverted { start: usize, end: usize },
    #[error("range end {end} out of bounds for length-{len} rope")]
    OutOfBounds { end: usize, len: usize },
    #[error("index {index} out of bounds for length-{len} rope")]
    IndexOutOfBounds { index: usize, len: usize },
}

/// A sink failure during [`Rope::write_to`].
///
/// `written` counts the bytes the sink accepted before it failed.
#[derive(Debug, Error)]
#[error("write failed after {written} bytes")]
pub struct WriteError {
    pub written: u64,
    #[source]
    pub source: io::Error,
}

impl From<WriteError> for io::Error {
    fn from(err: WriteError) -> Self {
        io::Error::new(err.source.kind(), err)
    }
}

#[inline]
fn check_range(start: usize, end: usize, len: usize) -> Result<(), RangeError> {
    if start > end {
        return Err(RangeError::Inverted { start, end });
    }
    if end > len {
        return Err(RangeError::OutOfBounds { end, len });
    }
    Ok(())
}

#[inline]
fn check_index(index: usize, len: usize) -> Result<(), RangeError> {
    if index >= len {
        return Err(RangeError::IndexOutOfBounds { index, len });
    }
    Ok(())
}

#[track_caller]
fn precondition<T>(res: Result<T, RangeError>) -> T {
    match res {
        Ok(v) => v,
        Err(err) => panic!("{err}"),
    }
}

// =============================================================================
// Tree nodes
// =============================================================================

enum Node {
    Leaf(Box<[u8]>),
    /// `len` is always `left.len() + right.len()`.
    Internal {
        left: Arc<Node>,
        right: Arc<Node>,
        len: usize,
    },
}

impl Node {
    #[inline]
    fn leaf(bytes: Box<[u8]>) -> Arc<Node> {
        Arc::new(Node::Leaf(bytes))
    }

    #[inline]
    fn internal(left: Arc<Node>, right: Arc<Node>) -> Arc<Node> {
        let len = left.len() + right.len();
        Arc::new(Node::Internal { left, right, len })
    }

    #[inline]
    fn len(&self) -> usize {
        match self {
            Node::Leaf(bytes) => bytes.len(),
            Node::Internal { len, .. } => *len,
        }
    }

    fn merged_leaf(a: &[u8], b: &[u8]) -> Arc<Node> {
        let mut bytes = Vec::with_capacity(a.len() + b.len());
        bytes.extend_from_slice(a);
        bytes.extend_from_slice(b);
        Node::leaf(bytes.into_boxed_slice())
    }

    /// Joins two trees, absorbing a small trailing leaf into its neighbour
    /// where that keeps the merged leaf within [`MERGE_THRESHOLD`].
    fn concat(t1: &Arc<Node>, t2: &Arc<Node>) -> Arc<Node> {
        match (&**t1, &**t2) {
            (Node::Leaf(a), Node::Leaf(b)) if a.len() + b.len() <= MERGE_THRESHOLD => {
                Node::merged_leaf(a, b)
            }
            (Node::Internal { left, right, .. }, Node::Leaf(b)) => match &**right {
                Node::Leaf(a) if a.len() + b.len() <= MERGE_THRESHOLD => {
                    Node::internal(Arc::clone(left), Node::merged_leaf(a, b))
                }
                _ => Node::internal(Arc::clone(t1), Arc::clone(t2)),
            },
            _ => Node::internal(Arc::clone(t1), Arc::clone(t2)),
        }
    }

    /// The shared empty leaf.
    fn empty() -> Arc<Node> {
        static EMPTY: OnceLock<Arc<Node>> = OnceLock::new();
        Arc::clone(EMPTY.get_or_init(|| Node::leaf(Box::default())))
    }

    /// Requires `i < j <= node.len()`.
    fn slice(mut node: &Arc<Node>, mut i: usize, mut j: usize) -> Arc<Node> {
        debug_assert!(i < j && j <= node.len());
        loop {
            match &**node {
                Node::Leaf(bytes) => return Node::leaf(Box::from(&bytes[i..j])),
                Node::Internal { left, right, len } => {
                    let left_len = left.len();
                    if j <= left_len {
                        node = left;
                        continue;
                    }
                    if i >= left_len {
                        i -= left_len;
                        j -= left_len;
                        node = right;
                        continue;
                    }

                    // Straddles the seam: whole children are shared, not copied.
                    let left_part = if i == 0 {
                        Arc::clone(left)
                    } else {
                        Node::slice_suffix(left, i)
                    };
                    let right_part = if j == *len {
                        Arc::clone(right)
                    } else {
                        Node::slice_prefix(right, j - left_len)
                    };
                    return Node::concat(&left_part, &right_part);
                }
            }
        }
    }

    /// `slice(node, i, node.len())` without recursion. Right siblings passed
    /// on the way down are shared and joined back on in bottom-up order.
    fn slice_suffix(mut node: &Arc<Node>, mut i: usize) -> Arc<Node> {
        debug_assert!(i < node.len());
        let mut rights: Vec<&Arc<Node>> = Vec::new();
        let bottom = loop {
            match &**node {
                Node::Leaf(bytes) => break Node::leaf(Box::from(&bytes[i..])),
                Node::Internal { left, right, .. } => {
                    let left_len = left.len();
                    if i >= left_len {
                        i -= left_len;
                        node = right;
                        continue;
                    }
                    if right.len() == 0 {
                        node = left;
                        continue;
                    }
                    rights.push(right);
                    if i == 0 {
                        break Arc::clone(left);
                    }
                    node = left;
                }
            }
        };
        rights
            .into_iter()
            .rev()
            .fold(bottom, |acc, right| Node::concat(&acc, right))
    }

    /// `slice(node, 0, j)` without recursion; the mirror of `slice_suffix`.
    fn slice_prefix(mut node: &Arc<Node>, mut j: usize) -> Arc<Node> {
        debug_assert!(0 < j && j <= node.len());
        let mut lefts: Vec<&Arc<Node>> = Vec::new();
        let bottom = loop {
            match &**node {
                Node::Leaf(bytes) => break Node::leaf(Box::from(&bytes[..j])),
                Node::Internal { left, right, len } => {
                    let left_len = left.len();
                    if j <= left_len {
                        node = left;
                        continue;
                    }
                    if left_len == 0 {
                        node = right;
                        continue;
                    }
                    lefts.push(left);
                    if j == *len {
                        break Arc::clone(right);
                    }
                    j -= left_len;
                    node = right;
                }
            }
        };
        lefts
            .into_iter()
            .rev()
            .fold(bottom, |acc, left| Node::concat(left, &acc))
    }

    /// Requires `i < self.len()`.
    fn index(&self, mut i: usize) -> u8 {
        let mut node = self;
        loop {
            match node {
                Node::Leaf(bytes) => return bytes[i],
                Node::Internal { left, right, .. } => {
                    let left_len = left.len();
                    if i < left_len {
                        node = &**left;
                    } else {
                        i -= left_len;
                        node = &**right;
                    }
                }
            }
        }
    }

    fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self, 0usize)];
        while let Some((node, d)) = stack.pop() {
            match node {
                Node::Leaf(_) => max = max.max(d),
                Node::Internal { left, right, .. } => {
                    stack.push((&**left, d + 1));
                    stack.push((&**right, d + 1));
                }
            }
        }
        max
    }

    /// Moves uniquely owned internal children onto `stack`, leaving the shared
    /// empty leaf in their place.
    fn detach_children(&mut self, stack: &mut Vec<Arc<Node>>) {
        if let Node::Internal { left, right, .. } = self {
            for child in [left, right] {
                if matches!(**child, Node::Internal { .. }) {
                    stack.push(mem::replace(child, Node::empty()));
                }
            }
        }
    }
}

impl Drop for Node {
    // Frees deep trees without recursing once per level.
    fn drop(&mut self) {
        let mut stack = Vec::new();
        self.detach_children(&mut stack);
        while let Some(child) = stack.pop() {
            if let Some(mut node) = Arc::into_inner(child) {
                node.detach_children(&mut stack);
            }
        }
    }
}

// =============================================================================
// Rope
// =============================================================================

/// An immutable byte sequence backed by a shared binary tree.
///
/// Cloning a rope is O(1). Every operation returns a new rope and leaves its
/// inputs untouched, so ropes can be read from many threads at once.
#[derive(Clone)]
pub struct Rope {
    root: Arc<Node>,
}

impl Rope {
    /// Makes a rope holding `bytes` as a single leaf.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            root: Node::leaf(bytes.into().into_boxed_slice()),
        }
    }

    /// The zero-length rope.
    pub fn empty() -> Self {
        Self { root: Node::empty() }
    }

    /// Length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.root.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of internal nodes on the longest root-to-leaf path. A rope made
    /// by [`Rope::new`] has depth 0.
    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    /// Concatenates any number of ropes.
    ///
    /// The list is joined pairwise by halves, so the resulting depth grows
    /// with the logarithm of `ropes.len()` rather than linearly.
    pub fn concat(ropes: &[Rope]) -> Rope {
        match ropes {
            [] => Rope::empty(),
            [only] => only.clone(),
            _ => {
                let root = Self::concat_tree(ropes);
                trace!("concat: {} ropes into {} bytes", ropes.len(), root.len());
                Rope { root }
            }
        }
    }

    fn concat_tree(ropes: &[Rope]) -> Arc<Node> {
        match ropes {
            [only] => Arc::clone(&only.root),
            [a, b] => Node::concat(&a.root, &b.root),
            _ => {
                let (lo, hi) = ropes.split_at(ropes.len() / 2);
                Node::concat(&Self::concat_tree(lo), &Self::concat_tree(hi))
            }
        }
    }

    /// `self` followed by `other`.
    pub fn append(&self, other: &Rope) -> Rope {
        Rope {
            root: Node::concat(&self.root, &other.root),
        }
    }

    /// Returns the byte at `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.len()`.
    #[track_caller]
    pub fn index(&self, i: usize) -> u8 {
        precondition(check_index(i, self.len()));
        self.root.index(i)
    }

    /// Returns the byte at `i`, or `None` if `i` is out of bounds.
    pub fn get(&self, i: usize) -> Option<u8> {
        check_index(i, self.len()).ok()?;
        Some(self.root.index(i))
    }

    /// Bytes `i..j` as a new rope.
    ///
    /// # Panics
    ///
    /// Panics if `i > j` or `j > self.len()`.
    #[track_caller]
    pub fn slice(&self, i: usize, j: usize) -> Rope {
        precondition(self.try_slice(i, j))
    }

    /// Bytes `i..j` as a new rope, or the [`RangeError`] `slice` would panic
    /// with.
    pub fn try_slice(&self, i: usize, j: usize) -> Result<Rope, RangeError> {
        check_range(i, j, self.len())?;
        Ok(self.slice_unchecked(i, j))
    }

    fn slice_unchecked(&self, i: usize, j: usize) -> Rope {
        if i == j {
            return Rope::empty();
        }
        Rope {
            root: Node::slice(&self.root, i, j),
        }
    }

    /// Removes bytes `i..j`.
    ///
    /// # Panics
    ///
    /// Panics if `i > j` or `j > self.len()`.
    #[track_caller]
    pub fn delete(&self, i: usize, j: usize) -> Rope {
        precondition(self.try_delete(i, j))
    }

    pub fn try_delete(&self, i: usize, j: usize) -> Result<Rope, RangeError> {
        let len = self.len();
        check_range(i, j, len)?;
        if i == j {
            return Ok(self.clone());
        }
        let left = self.slice_unchecked(0, i);
        let right = self.slice_unchecked(j, len);
        let out = left.append(&right);
        trace!("delete {i}..{j}: {len} -> {} bytes", out.len());
        Ok(out)
    }

    /// Inserts `ins` before byte `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i > self.len()`.
    #[track_caller]
    pub fn insert(&self, i: usize, ins: &Rope) -> Rope {
        precondition(self.try_insert(i, ins))
    }

    pub fn try_insert(&self, i: usize, ins: &Rope) -> Result<Rope, RangeError> {
        self.try_replace(i, i, ins)
    }

    /// Replaces bytes `i..j` with `repl`.
    ///
    /// # Panics
    ///
    /// Panics if `i > j` or `j > self.len()`.
    #[track_caller]
    pub fn replace(&self, i: usize, j: usize, repl: &Rope) -> Rope {
        precondition(self.try_replace(i, j, repl))
    }

    pub fn try_replace(&self, i: usize, j: usize, repl: &Rope) -> Result<Rope, RangeError> {
        if repl.is_empty() {
            return self.try_delete(i, j);
        }
        let len = self.len();
        check_range(i, j, len)?;
        let out = Rope::concat(&[
            self.slice_unchecked(0, i),
            repl.clone(),
            self.slice_unchecked(j, len),
        ]);
        trace!(
            "replace {i}..{j} with {} bytes: {len} -> {} bytes",
            repl.len(),
            out.len()
        );
        Ok(out)
    }

    /// Writes the contents to `w` in order, returning the number of bytes
    /// written.
    ///
    /// Stops at the first error `w` reports other than
    /// [`io::ErrorKind::Interrupted`]; nothing after the failing run is
    /// written.
    pub fn write_to<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<u64, WriteError> {
        let mut written = 0u64;
        for chunk in self.chunks() {
            let mut buf = chunk;
            while !buf.is_empty() {
                match w.write(buf) {
                    Ok(0) => {
                        return Err(Self::write_failed(
                            written,
                            io::ErrorKind::WriteZero.into(),
                        ));
                    }
                    Ok(n) => {
                        written += n as u64;
                        buf = &buf[n..];
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => return Err(Self::write_failed(written, err)),
                }
            }
        }
        Ok(written)
    }

    fn write_failed(written: u64, source: io::Error) -> WriteError {
        debug!("rope write failed after {written} bytes: {source}");
        WriteError { written, source }
    }

    /// Copies the contents into a contiguous buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        match self.write_to(&mut out) {
            Ok(_) => out,
            Err(err) => unreachable!("in-memory write failed: {err}"),
        }
    }

    /// Iterates over the leaf byte runs, left to right. Empty leaves are
    /// skipped.
    pub fn chunks(&self) -> Chunks<'_> {
        Chunks {
            stack: vec![&*self.root],
        }
    }

    /// Iterates over every byte, left to right.
    pub fn bytes(&self) -> Bytes<'_> {
        Bytes {
            chunks: self.chunks(),
            current: <&[u8]>::default().iter(),
            remaining: self.len(),
        }
    }
}

impl Default for Rope {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<u8>> for Rope {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for Rope {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes)
    }
}

impl From<String> for Rope {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Rope {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl FromIterator<Rope> for Rope {
    fn from_iter<I: IntoIterator<Item = Rope>>(iter: I) -> Self {
        let ropes: Vec<Rope> = iter.into_iter().collect();
        Rope::concat(&ropes)
    }
}

impl FromIterator<u8> for Rope {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        Rope::new(iter.into_iter().collect::<Vec<u8>>())
    }
}

impl PartialEq for Rope {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.root, &other.root) {
            return true;
        }
        self.len() == other.len() && self.bytes().eq(other.bytes())
    }
}

impl Eq for Rope {}

impl PartialEq<[u8]> for Rope {
    fn eq(&self, other: &[u8]) -> bool {
        self.len() == other.len() && self.bytes().eq(other.iter().copied())
    }
}

impl PartialEq<&[u8]> for Rope {
    fn eq(&self, other: &&[u8]) -> bool {
        *self == **other
    }
}

impl<const N: usize> PartialEq<&[u8; N]> for Rope {
    fn eq(&self, other: &&[u8; N]) -> bool {
        *self == other[..]
    }
}

impl PartialEq<str> for Rope {
    fn eq(&self, other: &str) -> bool {
        *self == *other.as_bytes()
    }
}

impl PartialEq<&str> for Rope {
    fn eq(&self, other: &&str) -> bool {
        *self == *other.as_bytes()
    }
}

impl Hash for Rope {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Per byte, so the hash does not depend on leaf boundaries.
        state.write_usize(self.len());
        for b in self.bytes() {
            state.write_u8(b);
        }
    }
}

impl fmt::Display for Rope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_vec()))
    }
}

impl fmt::Debug for Rope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Rope")
            .field(&String::from_utf8_lossy(&self.to_vec()))
            .finish()
    }
}

// =============================================================================
// Iterators
// =============================================================================

/// Leaf byte runs of a rope in order. Created by [`Rope::chunks`].
pub struct Chunks<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            match node {
                Node::Leaf(bytes) => {
                    if bytes.is_empty() {
                        continue;
                    }
                    return Some(&bytes[..]);
                }
                Node::Internal { left, right, .. } => {
                    self.stack.push(right);
                    self.stack.push(left);
                }
            }
        }
        None
    }
}

/// Bytes of a rope in order. Created by [`Rope::bytes`].
pub struct Bytes<'a> {
    chunks: Chunks<'a>,
    current: std::slice::Iter<'a, u8>,
    remaining: usize,
}

impl Iterator for Bytes<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        loop {
            if let Some(&b) = self.current.next() {
                self.remaining -= 1;
                return Some(b);
            }
            self.current = self.chunks.next()?.iter();
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Bytes<'_> {}


#[cfg(test)]
mod proptests;
