use crate::error::BatchError;

/// An item excluded from a chunk, with the error that caused it.
///
/// Read failures have no item to carry.
#[derive(Debug)]
pub struct SkipWrapper<T> {
    pub item: Option<T>,
    pub error: BatchError,
}

/// Items handled together in one transaction.
///
/// Besides the items, a chunk keeps the items skipped so far, whether the
/// input ended while it was filled, and whether it is still busy: a busy
/// chunk needs further transactions before it is complete.
#[derive(Debug)]
pub struct Chunk<T> {
    items: Vec<T>,
    skips: Vec<SkipWrapper<T>>,
    end: bool,
    busy: bool,
}

impl<T> Chunk<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            skips: Vec::new(),
            end: false,
            busy: false,
        }
    }

    pub fn from_items(items: Vec<T>) -> Self {
        Self {
            items,
            skips: Vec::new(),
            end: false,
            busy: false,
        }
    }

    pub fn add(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.skips.clear();
    }

    /// Removes the items and keeps the skips.
    pub fn take_items(&mut self) -> Vec<T> {
        std::mem::take(&mut self.items)
    }

    /// Records a failure that has no item attached.
    pub fn skip(&mut self, error: BatchError) {
        self.skips.push(SkipWrapper { item: None, error });
    }

    /// Moves the item at `index` to the skipped items.
    pub fn skip_at(&mut self, index: usize, error: BatchError) {
        let item = self.items.remove(index);
        self.skips.push(SkipWrapper {
            item: Some(item),
            error,
        });
    }

    /// Drops the item at `index` without recording a skip.
    pub fn remove(&mut self, index: usize) -> T {
        self.items.remove(index)
    }

    pub fn skips(&self) -> &[SkipWrapper<T>] {
        &self.skips
    }

    pub fn take_skips(&mut self) -> Vec<SkipWrapper<T>> {
        std::mem::take(&mut self.skips)
    }

    pub fn set_end(&mut self) {
        self.end = true;
    }

    pub fn is_end(&self) -> bool {
        self.end
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }
}

impl<T> Default for Chunk<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipped_items_leave_the_chunk() {
        let mut chunk = Chunk::from_items(vec![1, 2, 3]);
        chunk.skip_at(1, BatchError::ItemWriter("2".to_string()));
        chunk.skip(BatchError::ItemReader("bad line".to_string()));

        assert_eq!(chunk.items(), &[1, 3]);
        assert_eq!(chunk.skips().len(), 2);
        assert_eq!(chunk.skips()[0].item, Some(2));
        assert!(chunk.skips()[1].item.is_none());

        let skips = chunk.take_skips();
        assert_eq!(skips.len(), 2);
        assert!(chunk.skips().is_empty());
    }
}
