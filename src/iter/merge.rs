use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::{assert_ascending, assert_seekable, BoxSorted, Forwardable};

/// N-way ordered union: a min-heap over the head element of each active
/// source. Ties are broken by source index so merging is stable.
pub struct Merge<T: Ord + Clone> {
    sources: Vec<BoxSorted<T>>,
    heap: BinaryHeap<Reverse<(T, usize)>>,
    primed: bool,
    last: Option<T>,
}

impl<T: Ord + Clone> Merge<T> {
    pub fn new(sources: Vec<BoxSorted<T>>) -> Self {
        Self {
            sources,
            heap: BinaryHeap::new(),
            primed: false,
            last: None,
        }
    }

    fn prime(&mut self) {
        if self.primed {
            return;
        }
        self.primed = true;
        for index in 0..self.sources.len() {
            if let Some(item) = self.sources[index].next() {
                self.heap.push(Reverse((item, index)));
            }
        }
    }
}

impl<T: Ord + Clone> Iterator for Merge<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.prime();
        let Reverse((item, index)) = self.heap.pop()?;
        if let Some(successor) = self.sources[index].next() {
            self.heap.push(Reverse((successor, index)));
        }
        assert_ascending(self.last.as_ref(), &item);
        self.last = Some(item.clone());
        Some(item)
    }
}

impl<T: Ord + Clone> Forwardable for Merge<T> {
    fn peek(&mut self) -> Option<&T> {
        self.prime();
        self.heap.peek().map(|Reverse((item, _))| item)
    }

    fn seek(&mut self, target: &T) {
        assert_seekable(self.last.as_ref(), target);
        self.prime();
        // drain heads below the target back into their sources' seeks, then
        // refill from the forwarded sources
        let mut stale: Vec<usize> = Vec::new();
        while let Some(Reverse((item, _))) = self.heap.peek() {
            if item >= target {
                break;
            }
            let Reverse((_, index)) = self.heap.pop().expect("peeked");
            stale.push(index);
        }
        for index in stale {
            self.sources[index].seek(target);
            if let Some(item) = self.sources[index].next() {
                self.heap.push(Reverse((item, index)));
            }
        }
    }

    fn recycle(&mut self) {
        for source in &mut self.sources {
            source.recycle();
        }
        self.heap.clear();
        self.primed = true;
    }
}
