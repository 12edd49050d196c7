use super::{assert_seekable, Forwardable};

/// Collapses runs of equal successive elements, making a non-decreasing
/// stream strictly increasing.
pub struct Distinct<I: Forwardable>
where
    I::Item: Ord + Clone,
{
    source: I,
    last: Option<I::Item>,
}

impl<I: Forwardable> Distinct<I>
where
    I::Item: Ord + Clone,
{
    pub fn new(source: I) -> Self {
        Self { source, last: None }
    }
}

impl<I: Forwardable> Iterator for Distinct<I>
where
    I::Item: Ord + Clone,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        loop {
            let item = self.source.next()?;
            if self.last.as_ref() != Some(&item) {
                self.last = Some(item.clone());
                return Some(item);
            }
        }
    }
}

impl<I: Forwardable> Forwardable for Distinct<I>
where
    I::Item: Ord + Clone,
{
    fn peek(&mut self) -> Option<&I::Item> {
        while self.source.peek().is_some() && self.source.peek() == self.last.as_ref() {
            self.source.next();
        }
        self.source.peek()
    }

    fn seek(&mut self, target: &I::Item) {
        self.source.seek(target);
    }

    fn recycle(&mut self) {
        self.source.recycle();
    }
}

pub struct FilterSorted<I: Forwardable, P>
where
    I::Item: Ord + Clone,
    P: FnMut(&I::Item) -> bool,
{
    source: I,
    predicate: P,
}

impl<I: Forwardable, P> FilterSorted<I, P>
where
    I::Item: Ord + Clone,
    P: FnMut(&I::Item) -> bool,
{
    pub fn new(source: I, predicate: P) -> Self {
        Self { source, predicate }
    }
}

impl<I: Forwardable, P> Iterator for FilterSorted<I, P>
where
    I::Item: Ord + Clone,
    P: FnMut(&I::Item) -> bool,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        loop {
            let item = self.source.next()?;
            if (self.predicate)(&item) {
                return Some(item);
            }
        }
    }
}

impl<I: Forwardable, P> Forwardable for FilterSorted<I, P>
where
    I::Item: Ord + Clone,
    P: FnMut(&I::Item) -> bool,
{
    fn peek(&mut self) -> Option<&I::Item> {
        loop {
            match self.source.peek() {
                None => return None,
                Some(item) => {
                    if (self.predicate)(item) {
                        break;
                    }
                }
            }
            self.source.next();
        }
        self.source.peek()
    }

    fn seek(&mut self, target: &I::Item) {
        self.source.seek(target);
    }

    fn recycle(&mut self) {
        self.source.recycle();
    }
}

pub struct Limit<I: Forwardable>
where
    I::Item: Ord + Clone,
{
    source: I,
    remaining: usize,
}

impl<I: Forwardable> Limit<I>
where
    I::Item: Ord + Clone,
{
    pub fn new(source: I, limit: usize) -> Self {
        Self { source, remaining: limit }
    }
}

impl<I: Forwardable> Iterator for Limit<I>
where
    I::Item: Ord + Clone,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.source.next()?;
        self.remaining -= 1;
        Some(item)
    }
}

impl<I: Forwardable> Forwardable for Limit<I>
where
    I::Item: Ord + Clone,
{
    fn peek(&mut self) -> Option<&I::Item> {
        if self.remaining == 0 {
            None
        } else {
            self.source.peek()
        }
    }

    fn seek(&mut self, target: &I::Item) {
        self.source.seek(target);
    }

    fn recycle(&mut self) {
        self.source.recycle();
    }
}

/// Fires its hook once, when the source completes through natural iteration.
pub struct OnConsumed<I: Forwardable, F: FnMut()>
where
    I::Item: Ord + Clone,
{
    source: I,
    hook: Option<F>,
}

impl<I: Forwardable, F: FnMut()> OnConsumed<I, F>
where
    I::Item: Ord + Clone,
{
    pub fn new(source: I, hook: F) -> Self {
        Self { source, hook: Some(hook) }
    }
}

impl<I: Forwardable, F: FnMut()> Iterator for OnConsumed<I, F>
where
    I::Item: Ord + Clone,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        match self.source.next() {
            Some(item) => Some(item),
            None => {
                if let Some(mut hook) = self.hook.take() {
                    hook();
                }
                None
            }
        }
    }
}

impl<I: Forwardable, F: FnMut()> Forwardable for OnConsumed<I, F>
where
    I::Item: Ord + Clone,
{
    fn peek(&mut self) -> Option<&I::Item> {
        self.source.peek()
    }

    fn seek(&mut self, target: &I::Item) {
        self.source.seek(target);
    }

    fn recycle(&mut self) {
        self.source.recycle();
    }
}

/// Fires its hook once, on explicit `recycle`.
pub struct OnFinalise<I: Forwardable, F: FnMut()>
where
    I::Item: Ord + Clone,
{
    source: I,
    hook: Option<F>,
}

impl<I: Forwardable, F: FnMut()> OnFinalise<I, F>
where
    I::Item: Ord + Clone,
{
    pub fn new(source: I, hook: F) -> Self {
        Self { source, hook: Some(hook) }
    }
}

impl<I: Forwardable, F: FnMut()> Iterator for OnFinalise<I, F>
where
    I::Item: Ord + Clone,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        self.source.next()
    }
}

impl<I: Forwardable, F: FnMut()> Forwardable for OnFinalise<I, F>
where
    I::Item: Ord + Clone,
{
    fn peek(&mut self) -> Option<&I::Item> {
        self.source.peek()
    }

    fn seek(&mut self, target: &I::Item) {
        self.source.seek(target);
    }

    fn recycle(&mut self) {
        self.source.recycle();
        if let Some(mut hook) = self.hook.take() {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{ForwardableExt, VecSorted};
    use super::*;

    #[test]
    fn distinct_peek_skips_duplicates() {
        let mut iter = Distinct::new(VecSorted::new(vec![1, 1, 2, 2, 2, 3]));
        assert_eq!(iter.next(), Some(1));
        assert_eq!(iter.peek(), Some(&2));
        assert_eq!(iter.next(), Some(2));
        assert_eq!(iter.next(), Some(3));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn filter_peek_agrees_with_next() {
        let mut evens = VecSorted::new(vec![1, 2, 3, 4]).filter_sorted(|v| v % 2 == 0);
        assert_eq!(evens.peek(), Some(&2));
        assert_eq!(evens.next(), Some(2));
        assert_eq!(evens.next(), Some(4));
        assert_eq!(evens.next(), None);
    }
}
