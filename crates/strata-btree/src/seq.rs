//! Lazy immutable sequence views.
//!
//! A [`Seq`] is a snapshot of a finite ordered sequence. Derivations
//! (slice, concat, overwrite, splice, map) build new views in O(1) without
//! copying the underlying elements; reading an element walks the view
//! structure. Node splits, merges, and rotations in the tree core are
//! expressed as algebraic combinations of these views, which are then
//! materialised once when a node is updated.
//!
//! Views never mutate. Cloning a view is cheap (it clones an `Arc`).

use std::sync::Arc;

enum Repr<T> {
    Wrap(Arc<[T]>),
    Slice { base: Seq<T>, from: usize, to: usize },
    Concat { left: Seq<T>, right: Seq<T>, len: usize },
    With { base: Seq<T>, at: usize, value: T },
    Mapped { len: usize, get: Arc<dyn Fn(usize) -> T> },
}

/// Lazy, immutable, index-addressable view over a sequence of `T`.
pub struct Seq<T>(Arc<Repr<T>>);

impl<T> Clone for Seq<T> {
    fn clone(&self) -> Self {
        Seq(self.0.clone())
    }
}

impl<T> Seq<T> {
    /// Borrows pre-existing storage as a sequence of its length.
    pub fn wrap(xs: impl Into<Arc<[T]>>) -> Self {
        Seq(Arc::new(Repr::Wrap(xs.into())))
    }

    /// The zero-length sequence.
    pub fn empty() -> Self {
        Seq(Arc::new(Repr::Wrap(Arc::from(Vec::new()))))
    }

    /// A one-element sequence.
    pub fn unit(value: T) -> Self {
        Seq(Arc::new(Repr::Wrap(Arc::from(vec![value]))))
    }

    /// A sequence owning the given elements.
    pub fn from_vec(xs: Vec<T>) -> Self {
        Seq(Arc::new(Repr::Wrap(Arc::from(xs))))
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        match &*self.0 {
            Repr::Wrap(xs) => xs.len(),
            Repr::Slice { from, to, .. } => to - from,
            Repr::Concat { len, .. } => *len,
            Repr::With { base, .. } => base.len(),
            Repr::Mapped { len, .. } => *len,
        }
    }

    /// Returns true if the sequence has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// View of `[from, to)`. `to` is clamped to the length, then `from`
    /// is clamped to `to`.
    pub fn slice(&self, from: usize, to: usize) -> Self {
        let to = to.min(self.len());
        let from = from.min(to);
        Seq(Arc::new(Repr::Slice {
            base: self.clone(),
            from,
            to,
        }))
    }

    /// View of everything from `i` onwards.
    pub fn slice_from(&self, i: usize) -> Self {
        self.slice(i, self.len())
    }

    /// View of everything before `i`.
    pub fn slice_to(&self, i: usize) -> Self {
        self.slice(0, i)
    }

    /// View over `self` followed by `other`.
    pub fn concat(&self, other: &Seq<T>) -> Self {
        Seq(Arc::new(Repr::Concat {
            left: self.clone(),
            right: other.clone(),
            len: self.len() + other.len(),
        }))
    }

    /// View equal to `self` except position `i` yields `value`.
    pub fn with(&self, i: usize, value: T) -> Self {
        Seq(Arc::new(Repr::With {
            base: self.clone(),
            at: i,
            value,
        }))
    }

    /// View with everything except the last element.
    pub fn without_last(&self) -> Self {
        self.slice_to(self.len().saturating_sub(1))
    }

    /// View with everything except the first element.
    pub fn without_first(&self) -> Self {
        self.slice_from(1)
    }
}

impl<T: Clone> Seq<T> {
    /// View with `value` inserted before position `i`; one element longer.
    pub fn splice_in(&self, i: usize, value: T) -> Self {
        self.slice_to(i)
            .concat(&Seq::unit(value))
            .concat(&self.slice_from(i))
    }

    /// View with the element at `i` removed; one element shorter.
    pub fn splice_out(&self, i: usize) -> Self {
        self.slice_to(i).concat(&self.slice_from(i + 1))
    }

    /// Returns the element at `i`, or None when out of range.
    pub fn try_get(&self, i: usize) -> Option<T> {
        match &*self.0 {
            Repr::Wrap(xs) => xs.get(i).cloned(),
            Repr::Slice { base, from, to } => {
                if i < to - from {
                    base.try_get(from + i)
                } else {
                    None
                }
            }
            Repr::Concat { left, right, len } => {
                if i >= *len {
                    return None;
                }
                let n = left.len();
                if i < n {
                    left.try_get(i)
                } else {
                    right.try_get(i - n)
                }
            }
            Repr::With { base, at, value } => {
                if i >= base.len() {
                    None
                } else if i == *at {
                    Some(value.clone())
                } else {
                    base.try_get(i)
                }
            }
            Repr::Mapped { len, get } => {
                if i < *len {
                    Some(get(i))
                } else {
                    None
                }
            }
        }
    }

    /// Returns the element at `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of range.
    pub fn get(&self, i: usize) -> T {
        match self.try_get(i) {
            Some(v) => v,
            None => panic!(
                "index {i} out of range for sequence of length {}",
                self.len()
            ),
        }
    }

    /// Returns the first element.
    ///
    /// # Panics
    ///
    /// Panics if the sequence is empty.
    pub fn first(&self) -> T {
        self.get(0)
    }

    /// Returns the last element.
    ///
    /// # Panics
    ///
    /// Panics if the sequence is empty.
    pub fn last(&self) -> T {
        let n = self.len();
        assert!(n > 0, "last() on an empty sequence");
        self.get(n - 1)
    }

    /// Iterates over the elements in order.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// Materialises the view into an owned Vec.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }

    /// Materialises `[src_pos, src_pos + len)` into `dst[dst_pos..]`.
    ///
    /// # Panics
    ///
    /// Panics if either range is out of bounds.
    pub fn copy_to(&self, src_pos: usize, dst: &mut [T], dst_pos: usize, len: usize) {
        assert!(
            src_pos.checked_add(len).is_some_and(|end| end <= self.len()),
            "source range {src_pos}..{src_pos}+{len} out of bounds for sequence of length {}",
            self.len()
        );
        assert!(
            dst_pos.checked_add(len).is_some_and(|end| end <= dst.len()),
            "destination range out of bounds"
        );
        for j in 0..len {
            dst[dst_pos + j] = self.get(src_pos + j);
        }
    }

    /// Left fold over the elements.
    pub fn fold<A>(&self, init: A, mut f: impl FnMut(A, T) -> A) -> A {
        let mut acc = init;
        for i in 0..self.len() {
            acc = f(acc, self.get(i));
        }
        acc
    }
}

impl<T: Clone + 'static> Seq<T> {
    /// Lazy pointwise transform.
    pub fn map<U: Clone>(&self, f: impl Fn(T) -> U + 'static) -> Seq<U> {
        let base = self.clone();
        let len = self.len();
        Seq(Arc::new(Repr::Mapped {
            len,
            get: Arc::new(move |i| f(base.get(i))),
        }))
    }
}

impl<T: Clone> From<Vec<T>> for Seq<T> {
    fn from(xs: Vec<T>) -> Self {
        Seq::from_vec(xs)
    }
}

impl<T: Clone + PartialEq> PartialEq for Seq<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && (0..self.len()).all(|i| self.get(i) == other.get(i))
    }
}

impl<T: Clone + std::fmt::Debug> std::fmt::Debug for Seq<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nums(n: usize) -> Seq<usize> {
        Seq::from_vec((0..n).collect())
    }

    #[test]
    fn test_wrap_and_get() {
        let s = Seq::wrap(vec![10, 20, 30]);
        assert_eq!(s.len(), 3);
        assert_eq!(s.get(0), 10);
        assert_eq!(s.get(2), 30);
        assert_eq!(s.try_get(3), None);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_get_out_of_range_panics() {
        nums(2).get(2);
    }

    #[test]
    fn test_empty_and_unit() {
        assert!(Seq::<u8>::empty().is_empty());
        let s = Seq::unit(7);
        assert_eq!(s.len(), 1);
        assert_eq!(s.first(), 7);
        assert_eq!(s.last(), 7);
    }

    #[test]
    fn test_slice_clamping() {
        let s = nums(5);
        assert_eq!(s.slice(1, 3).to_vec(), vec![1, 2]);
        // `to` past the end clamps to the length
        assert_eq!(s.slice(3, 99).to_vec(), vec![3, 4]);
        // `from` past `to` clamps to an empty view
        assert_eq!(s.slice(4, 2).len(), 0);
        assert_eq!(s.slice_from(2).to_vec(), vec![2, 3, 4]);
        assert_eq!(s.slice_to(2).to_vec(), vec![0, 1]);
    }

    #[test]
    fn test_slice_get_is_relative() {
        let s = nums(6).slice(2, 5);
        assert_eq!(s.get(0), 2);
        assert_eq!(s.get(2), 4);
        assert_eq!(s.try_get(3), None);
    }

    #[test]
    fn test_concat() {
        let s = nums(2).concat(&Seq::from_vec(vec![7, 8]));
        assert_eq!(s.len(), 4);
        assert_eq!(s.to_vec(), vec![0, 1, 7, 8]);
    }

    #[test]
    fn test_with_overwrites_one_slot() {
        let s = nums(3).with(1, 99);
        assert_eq!(s.to_vec(), vec![0, 99, 2]);
        assert_eq!(s.len(), 3);
        // the original is untouched
        assert_eq!(nums(3).get(1), 1);
    }

    #[test]
    fn test_splice_in() {
        let s = nums(3);
        assert_eq!(s.splice_in(0, 9).to_vec(), vec![9, 0, 1, 2]);
        assert_eq!(s.splice_in(1, 9).to_vec(), vec![0, 9, 1, 2]);
        assert_eq!(s.splice_in(3, 9).to_vec(), vec![0, 1, 2, 9]);
    }

    #[test]
    fn test_splice_out() {
        let s = nums(3);
        assert_eq!(s.splice_out(0).to_vec(), vec![1, 2]);
        assert_eq!(s.splice_out(1).to_vec(), vec![0, 2]);
        assert_eq!(s.splice_out(2).to_vec(), vec![0, 1]);
    }

    #[test]
    fn test_without_first_and_last() {
        let s = nums(3);
        assert_eq!(s.without_first().to_vec(), vec![1, 2]);
        assert_eq!(s.without_last().to_vec(), vec![0, 1]);
        assert_eq!(Seq::<usize>::empty().without_last().len(), 0);
    }

    #[test]
    fn test_map_is_lazy_and_correct() {
        let s = nums(4).map(|x| x * 10);
        assert_eq!(s.to_vec(), vec![0, 10, 20, 30]);
        assert_eq!(s.try_get(4), None);
    }

    #[test]
    fn test_copy_to() {
        let s = nums(5);
        let mut dst = [0usize; 4];
        s.copy_to(1, &mut dst, 1, 3);
        assert_eq!(dst, [0, 1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_copy_to_source_range_error() {
        let mut dst = [0usize; 10];
        nums(3).copy_to(1, &mut dst, 0, 3);
    }

    #[test]
    fn test_fold() {
        let sum = nums(5).fold(0, |a, x| a + x);
        assert_eq!(sum, 10);
    }

    #[test]
    fn test_composed_views() {
        // splice/concat/with stacked several deep, as the tree core does
        let s = nums(4)
            .splice_in(2, 99)
            .with(0, 50)
            .splice_out(4)
            .concat(&Seq::unit(7));
        assert_eq!(s.to_vec(), vec![50, 1, 99, 2, 7]);
    }

    #[test]
    fn test_eq_compares_elements() {
        assert_eq!(nums(3), Seq::from_vec(vec![0, 1, 2]));
        assert_ne!(nums(3), nums(4));
        // equality across different view shapes
        assert_eq!(nums(4).slice_from(2), Seq::from_vec(vec![2, 3]));
    }
}
