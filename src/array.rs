//! Reference-counted, fixed-size numeric buffers.
//!
//! [`Write`] is an exclusively owned, mutable buffer; [`Read`] is the
//! immutable, shareable view it freezes into. A `Read` distinguishes three
//! states: *absent* (the array was never created), *present-empty*, and
//! *present-sized*. Cloning a `Read` bumps a reference count and never
//! copies the payload; the buffer lives as long as its longest holder.
//!
//! Index access goes through slice indexing, so it is bounds-checked in
//! debug builds and unchecked-by-contract in release builds.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Local entity index within one rank.
pub type Local = u32;
/// Global entity identifier, unique across all ranks.
pub type Global = u64;
/// Sentinel for "no entry" in index maps.
pub const INVALID_LOCAL: Local = Local::MAX;

/// Exclusively owned, fixed-size mutable buffer.
///
/// Size is fixed at construction. Populate the buffer, then freeze it with
/// [`Write::into_read`] to share it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Write<T> {
    data: Vec<T>,
}

impl<T: Copy + Default> Write<T> {
    /// A buffer of `n` default-valued elements.
    pub fn zeroed(n: usize) -> Self {
        Self {
            data: vec![T::default(); n],
        }
    }

    /// A buffer of `n` copies of `value`.
    pub fn filled(n: usize, value: T) -> Self {
        Self {
            data: vec![value; n],
        }
    }
}

impl<T> Write<T> {
    /// Wrap an existing vector without copying.
    pub fn from_vec(data: Vec<T>) -> Self {
        Self { data }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Freeze into an immutable shared view.
    pub fn into_read(self) -> Read<T> {
        Read(Some(Arc::from(self.data)))
    }
}

impl<T: Copy> Write<T> {
    #[inline]
    pub fn set(&mut self, i: usize, value: T) {
        self.data[i] = value;
    }

    #[inline]
    pub fn get(&self, i: usize) -> T {
        self.data[i]
    }
}

impl Write<Local> {
    /// `[offset, offset+stride, offset+2*stride, ...]` of length `n`.
    pub fn linear(n: usize, offset: Local, stride: Local) -> Self {
        Self {
            data: (0..n as Local).map(|i| offset + i * stride).collect(),
        }
    }
}

impl<T> Deref for Write<T> {
    type Target = [T];
    #[inline]
    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> DerefMut for Write<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> From<Write<T>> for Read<T> {
    fn from(w: Write<T>) -> Self {
        w.into_read()
    }
}

/// Immutable, reference-counted view of a fixed-size buffer.
///
/// The default value is the *absent* state: [`Read::exists`] is false and
/// dereferencing panics. A zero-length array is a distinct, valid state.
#[derive(Clone)]
pub struct Read<T>(Option<Arc<[T]>>);

impl<T> Default for Read<T> {
    fn default() -> Self {
        Read(None)
    }
}

impl<T> Read<T> {
    /// The absent ("does not exist") state.
    pub fn none() -> Self {
        Read(None)
    }

    /// Whether the array exists (possibly with length zero).
    #[inline]
    pub fn exists(&self) -> bool {
        self.0.is_some()
    }

    /// Length; zero for the absent state.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.as_ref().map_or(0, |a| a.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The underlying slice.
    ///
    /// # Panics
    /// Panics if the array is absent; reading a nonexistent array is a
    /// programming error, not a recoverable condition.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        self.0.as_deref().expect("array does not exist")
    }
}

impl<T: Copy> Read<T> {
    #[inline]
    pub fn get(&self, i: usize) -> T {
        self.as_slice()[i]
    }

    /// The last element; panics on empty or absent arrays.
    #[inline]
    pub fn last(&self) -> T {
        *self.as_slice().last().expect("empty array has no last element")
    }

    /// Copy the contents into a fresh vector.
    pub fn to_vec(&self) -> Vec<T> {
        self.as_slice().to_vec()
    }
}

impl<T: Copy + Default> Read<T> {
    /// A present array of `n` copies of `value`.
    pub fn filled(n: usize, value: T) -> Self {
        Write::filled(n, value).into_read()
    }
}

impl<T> From<Vec<T>> for Read<T> {
    fn from(v: Vec<T>) -> Self {
        Read(Some(Arc::from(v)))
    }
}

impl<T> Deref for Read<T> {
    type Target = [T];
    #[inline]
    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T: PartialEq> PartialEq for Read<T> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Read<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => f.write_str("Read(absent)"),
            Some(a) => f.debug_list().entries(a.iter()).finish(),
        }
    }
}
