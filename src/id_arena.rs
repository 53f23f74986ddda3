use std::num::NonZeroU32;
use std::marker::PhantomData;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::ops::{Index, IndexMut};
use std::fmt::{Debug, Formatter};

/// Typed handle into an [`IdArena`]. Handles are never reused, so a handle to a
/// removed item stays invalid forever.
pub struct Id<T> {
    idx: NonZeroU32,
    _ty: PhantomData<T>
}

// #[derive] bug means we have to impl these manually because of PhantomData
impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.idx == other.idx
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.idx.cmp(&other.idx)
    }
}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.idx.hash(state)
    }
}

impl<T> Debug for Id<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Id({})", self.idx)
    }
}

impl<T> Id<T> {
    fn idx(&self) -> usize {
        self.idx.get() as usize - 1
    }
}

pub struct IdArena<T> {
    items: Vec<Option<T>>,
    live: usize,
}

impl<T> Default for IdArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IdArena<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            live: 0,
        }
    }

    pub fn insert(&mut self, item: T) -> Id<T> {
        self.items.push(Some(item));
        self.live += 1;
        let idx = NonZeroU32::new(self.items.len() as u32)
            .expect("arena length is at least one after a push");
        Id {
            idx,
            _ty: PhantomData
        }
    }

    pub fn get(&self, id: Id<T>) -> Option<&T> {
        self.items.get(id.idx()).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, id: Id<T>) -> Option<&mut T> {
        self.items.get_mut(id.idx()).and_then(|slot| slot.as_mut())
    }

    /// Mutable access to two distinct items at once.
    pub fn get2_mut(&mut self, a: Id<T>, b: Id<T>) -> Option<(&mut T, &mut T)> {
        let (ia, ib) = (a.idx(), b.idx());
        if ia == ib || ia.max(ib) >= self.items.len() {
            return None;
        }
        let (lo, hi) = self.items.split_at_mut(ia.max(ib));
        let (first, second) = (&mut lo[ia.min(ib)], &mut hi[0]);
        match (first.as_mut(), second.as_mut()) {
            (Some(x), Some(y)) if ia < ib => Some((x, y)),
            (Some(x), Some(y)) => Some((y, x)),
            _ => None,
        }
    }

    pub fn remove(&mut self, id: Id<T>) -> Option<T> {
        let item = self.items.get_mut(id.idx())?.take();
        if item.is_some() {
            self.live -= 1;
        }
        item
    }

    pub fn contains(&self, id: Id<T>) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        self.items.iter().enumerate().filter_map(|(i, slot)| {
            let idx = NonZeroU32::new(i as u32 + 1)?;
            slot.as_ref().map(|item| (Id { idx, _ty: PhantomData }, item))
        })
    }
}

impl<T> Index<Id<T>> for IdArena<T> {
    type Output = T;

    fn index(&self, index: Id<T>) -> &Self::Output {
        match self.get(index) {
            Some(item) => item,
            None => panic!("stale arena handle {:?}", index),
        }
    }
}

impl<T> IndexMut<Id<T>> for IdArena<T> {
    fn index_mut(&mut self, index: Id<T>) -> &mut Self::Output {
        match self.get_mut(index) {
            Some(item) => item,
            None => panic!("stale arena handle {:?}", index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove() {
        let mut arena = IdArena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena[b], "b");

        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.remove(a), None);
        assert!(!arena.contains(a));
        assert_eq!(arena.len(), 1);

        // handles are never recycled
        let c = arena.insert("c");
        assert_ne!(a, c);
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.iter().map(|(_, s)| *s).collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn test_get2_mut() {
        let mut arena = IdArena::new();
        let a = arena.insert(1);
        let b = arena.insert(2);
        {
            let (x, y) = arena.get2_mut(b, a).unwrap();
            assert_eq!((*x, *y), (2, 1));
            *x += 10;
            *y += 20;
        }
        assert_eq!(arena[a], 21);
        assert_eq!(arena[b], 12);
        assert!(arena.get2_mut(a, a).is_none());
    }
}
