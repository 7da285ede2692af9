use crate::grammar::TermIdx;

use std::marker::PhantomData;

pub trait ToBitIdx {
    fn to_bit_idx(&self) -> usize;
}

pub trait FromBitIdx {
    fn from_bit_idx(idx: usize) -> Self;
}

impl ToBitIdx for TermIdx {
    fn to_bit_idx(&self) -> usize {
        self.as_usize()
    }
}

impl FromBitIdx for TermIdx {
    fn from_bit_idx(idx: usize) -> Self {
        TermIdx(idx as u32)
    }
}

#[derive(Debug)]
pub struct BitSet<T: ToBitIdx> {
    chunks: Vec<u64>,
    len: usize,
    phantom: PhantomData<T>,
}

impl<T: ToBitIdx> Clone for BitSet<T> {
    fn clone(&self) -> Self {
        BitSet {
            chunks: self.chunks.clone(),
            len: self.len,
            phantom: PhantomData,
        }
    }
}

impl<T: ToBitIdx> PartialEq for BitSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.chunks == other.chunks
    }
}

#[inline(always)]
fn chunk_idx(n: usize) -> usize {
    n / 64
}

#[inline(always)]
fn bit_idx(n: usize) -> usize {
    n % 64
}

impl<T: ToBitIdx> BitSet<T> {
    pub fn new(n_elems: usize) -> BitSet<T> {
        let words = (n_elems + 63) / 64;
        BitSet {
            chunks: vec![0; words],
            len: n_elems,
            phantom: PhantomData,
        }
    }

    /// Returns whether the bit was updated
    #[inline]
    pub fn set(&mut self, elem: &T) -> bool {
        let elem_idx = elem.to_bit_idx();
        let chunk = &mut self.chunks[chunk_idx(elem_idx)];
        let mask = 1u64 << bit_idx(elem_idx);
        let updated = *chunk & mask == 0;
        *chunk |= mask;
        updated
    }

    #[inline]
    pub fn get(&self, elem: &T) -> bool {
        self.get_bit(elem.to_bit_idx())
    }

    /// Adds all elements of `other`. Returns whether anything was added.
    pub fn union_with(&mut self, other: &BitSet<T>) -> bool {
        let mut updated = false;
        for (chunk, other_chunk) in self.chunks.iter_mut().zip(&other.chunks) {
            let new = *chunk | *other_chunk;
            updated |= new != *chunk;
            *chunk = new;
        }
        updated
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(|c| *c == 0)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    fn get_bit(&self, bit: usize) -> bool {
        let chunk = self.chunks[chunk_idx(bit)];
        (chunk >> bit_idx(bit)) & 0b1 == 0b1
    }
}

struct BitIter<'a, T: ToBitIdx> {
    set: &'a BitSet<T>,
    idx: usize,
}

impl<'a, T: ToBitIdx + FromBitIdx> Iterator for BitIter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        while self.idx < self.set.len() {
            let chunk = self.set.chunks[chunk_idx(self.idx)] >> bit_idx(self.idx);
            if chunk == 0 {
                // Skip to the next chunk
                self.idx = (chunk_idx(self.idx) + 1) * 64;
                continue;
            }
            let i = self.idx + chunk.trailing_zeros() as usize;
            self.idx = i + 1;
            return Some(T::from_bit_idx(i));
        }
        None
    }
}

impl<T: ToBitIdx + FromBitIdx> BitSet<T> {
    /// Elements in ascending index order
    pub fn elems(&self) -> impl Iterator<Item = T> + '_ {
        BitIter { set: self, idx: 0 }
    }
}

#[test]
fn bit_set_1() {
    const N_ELEMS: u32 = 100;

    let mut bitset: BitSet<TermIdx> = BitSet::new(N_ELEMS as usize);
    for i in 0..N_ELEMS {
        assert!(!bitset.get(&TermIdx(i)));
    }
    for i in 0..N_ELEMS {
        assert!(bitset.set(&TermIdx(i)));
        assert!(!bitset.set(&TermIdx(i)));
        for j in 0..=i {
            assert!(bitset.get(&TermIdx(j)));
        }
        for j in i + 1..N_ELEMS {
            assert!(!bitset.get(&TermIdx(j)));
        }
    }
}

#[test]
fn bit_set_iter_and_union() {
    let mut a: BitSet<TermIdx> = BitSet::new(130);
    let mut b: BitSet<TermIdx> = BitSet::new(130);
    a.set(&TermIdx(3));
    a.set(&TermIdx(64));
    b.set(&TermIdx(129));
    b.set(&TermIdx(3));
    assert!(a.union_with(&b));
    assert!(!a.union_with(&b));
    assert_eq!(
        a.elems().collect::<Vec<_>>(),
        vec![TermIdx(3), TermIdx(64), TermIdx(129)]
    );
    assert!(BitSet::<TermIdx>::new(10).is_empty());
}
