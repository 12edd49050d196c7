use super::{assert_ascending, assert_seekable, BoxSorted, Forwardable};

/// Lockstep intersection: repeatedly seek every source to the maximum of the
/// current heads until all N agree or one is exhausted.
pub struct Intersect<T: Ord + Clone> {
    sources: Vec<BoxSorted<T>>,
    fetched: Option<T>,
    done: bool,
    last: Option<T>,
}

impl<T: Ord + Clone> Intersect<T> {
    pub fn new(sources: Vec<BoxSorted<T>>) -> Self {
        debug_assert!(!sources.is_empty());
        Self {
            sources,
            fetched: None,
            done: false,
            last: None,
        }
    }

    fn fetch(&mut self) -> Option<&T> {
        if self.done {
            return None;
        }
        if self.fetched.is_some() {
            return self.fetched.as_ref();
        }
        loop {
            let mut target: Option<T> = None;
            for source in &mut self.sources {
                match source.peek() {
                    None => {
                        self.done = true;
                        return None;
                    }
                    Some(item) => {
                        if target.as_ref().map_or(true, |t| item > t) {
                            target = Some(item.clone());
                        }
                    }
                }
            }
            let target = target.expect("at least one source");
            let mut agreed = true;
            for source in &mut self.sources {
                source.seek(&target);
                match source.peek() {
                    None => {
                        self.done = true;
                        return None;
                    }
                    Some(item) => agreed &= *item == target,
                }
            }
            if agreed {
                for source in &mut self.sources {
                    source.next();
                }
                self.fetched = Some(target);
                return self.fetched.as_ref();
            }
        }
    }
}

impl<T: Ord + Clone> Iterator for Intersect<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.fetch()?;
        let item = self.fetched.take().expect("fetched");
        assert_ascending(self.last.as_ref(), &item);
        self.last = Some(item.clone());
        Some(item)
    }
}

impl<T: Ord + Clone> Forwardable for Intersect<T> {
    fn peek(&mut self) -> Option<&T> {
        self.fetch()
    }

    fn seek(&mut self, target: &T) {
        assert_seekable(self.last.as_ref(), target);
        if let Some(fetched) = &self.fetched {
            if fetched >= target {
                return;
            }
            self.fetched = None;
        }
        for source in &mut self.sources {
            source.seek(target);
        }
    }

    fn recycle(&mut self) {
        for source in &mut self.sources {
            source.recycle();
        }
        self.done = true;
    }
}
