/// Fixed-capacity FIFO ring that evicts its oldest element on overflow.
///
/// Backed by an arena of slots plus a head index and length, so `push` never
/// reallocates. Not synchronized; wrap in `Arc<parking_lot::Mutex<_>>` to
/// share between the capture thread and readers.
///
/// Capacity changes go through [`RollingBuffer::resize`], which discards the
/// current contents: a new capacity means a different retention window.
#[derive(Debug)]
pub struct RollingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> RollingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    /// Append `item`, evicting and returning the oldest element if full.
    ///
    /// With capacity 0 the item itself is handed straight back.
    pub fn push(&mut self, item: T) -> Option<T> {
        let capacity = self.capacity();
        if capacity == 0 {
            return Some(item);
        }

        if self.len < capacity {
            let index = (self.head + self.len) % capacity;
            self.slots[index] = Some(item);
            self.len += 1;
            None
        } else {
            let evicted = self.slots[self.head].replace(item);
            self.head = (self.head + 1) % capacity;
            evicted
        }
    }

    /// Remove and return up to `count` of the oldest elements.
    pub fn drain_oldest(&mut self, count: usize) -> Vec<T> {
        let to_take = count.min(self.len);
        let capacity = self.capacity();
        let mut drained = Vec::with_capacity(to_take);
        for _ in 0..to_take {
            if let Some(item) = self.slots[self.head].take() {
                drained.push(item);
            }
            self.head = (self.head + 1) % capacity;
            self.len -= 1;
        }
        if self.len == 0 {
            self.head = 0;
        }
        drained
    }

    /// Replace the buffer with an empty one of `new_capacity`.
    pub fn resize(&mut self, new_capacity: usize) {
        *self = Self::new(new_capacity);
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }

    /// Elements oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let capacity = self.capacity();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % capacity].as_ref())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl<T: Clone> RollingBuffer<T> {
    /// Append every element of `items`; only the last `capacity` survive.
    pub fn extend_from_slice(&mut self, items: &[T]) {
        let capacity = self.capacity();
        let tail = if items.len() > capacity {
            &items[items.len() - capacity..]
        } else {
            items
        };
        for item in tail {
            self.push(item.clone());
        }
    }

    /// Point-in-time copy of the contents, oldest-first.
    pub fn snapshot(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_within_capacity_keeps_order() {
        let mut buf = RollingBuffer::new(4);
        assert!(buf.push(1).is_none());
        assert!(buf.push(2).is_none());
        assert!(buf.push(3).is_none());

        assert_eq!(buf.len(), 3);
        assert!(!buf.is_full());
        assert_eq!(buf.snapshot(), vec![1, 2, 3]);
    }

    #[test]
    fn overflow_evicts_oldest_first() {
        let mut buf = RollingBuffer::new(3);
        for i in 1..=3 {
            buf.push(i);
        }
        assert_eq!(buf.push(4), Some(1));
        assert_eq!(buf.push(5), Some(2));

        assert_eq!(buf.len(), 3);
        assert_eq!(buf.snapshot(), vec![3, 4, 5]);
    }

    #[test]
    fn keeps_last_capacity_items_for_any_overflow() {
        for capacity in 1..12usize {
            for pushes in capacity + 1..3 * capacity + 2 {
                let mut buf = RollingBuffer::new(capacity);
                for i in 0..pushes {
                    buf.push(i);
                }
                let expected: Vec<usize> = (pushes - capacity..pushes).collect();
                assert_eq!(buf.len(), capacity);
                assert_eq!(buf.snapshot(), expected, "capacity {capacity}, pushes {pushes}");
            }
        }
    }

    #[test]
    fn ten_seconds_at_fifteen_fps_keeps_frames_51_to_200() {
        let mut buf = RollingBuffer::new(150);
        for label in 1..=200u32 {
            buf.push(label);
        }
        let expected: Vec<u32> = (51..=200).collect();
        assert_eq!(buf.snapshot(), expected);
    }

    #[test]
    fn resize_discards_contents() {
        let mut buf = RollingBuffer::new(450);
        for i in 0..500 {
            buf.push(i);
        }
        buf.resize(150);

        assert_eq!(buf.capacity(), 150);
        assert!(buf.is_empty());
        assert!(buf.snapshot().is_empty());

        buf.push(7);
        assert_eq!(buf.snapshot(), vec![7]);
    }

    #[test]
    fn zero_capacity_hands_items_back() {
        let mut buf = RollingBuffer::new(0);
        assert_eq!(buf.push("a"), Some("a"));
        assert!(buf.is_empty());
        assert!(buf.is_full());
        assert!(buf.drain_oldest(3).is_empty());
    }

    #[test]
    fn drain_oldest_partial_and_wraparound() {
        let mut buf = RollingBuffer::new(4);
        buf.extend_from_slice(&[1, 2, 3]);
        assert_eq!(buf.drain_oldest(2), vec![1, 2]);

        buf.extend_from_slice(&[4, 5, 6]); // wraps
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.drain_oldest(10), vec![3, 4, 5, 6]);
        assert!(buf.is_empty());
    }

    #[test]
    fn extend_larger_than_capacity_keeps_tail() {
        let mut buf = RollingBuffer::new(3);
        buf.extend_from_slice(&[1, 2, 3, 4, 5]);
        assert_eq!(buf.snapshot(), vec![3, 4, 5]);
    }

    #[test]
    fn clear_resets() {
        let mut buf = RollingBuffer::new(3);
        buf.extend_from_slice(&[1, 2, 3, 4]);
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 3);
        buf.push(9);
        assert_eq!(buf.snapshot(), vec![9]);
    }

    #[test]
    fn snapshots_during_concurrent_pushes_are_whole() {
        use std::sync::Arc;
        use std::thread;

        use parking_lot::Mutex;

        let buf = Arc::new(Mutex::new(RollingBuffer::new(150)));
        let writer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                for i in 0..20_000u32 {
                    buf.lock().push(i);
                }
            })
        };

        let mut observed = 0;
        while !writer.is_finished() || observed == 0 {
            let snapshot = buf.lock().snapshot();
            assert!(snapshot.len() <= 150);
            // contiguous, oldest first
            assert!(snapshot.windows(2).all(|w| w[1] == w[0] + 1));
            observed += 1;
        }
        writer.join().unwrap();

        let last = buf.lock().snapshot();
        assert_eq!(last.len(), 150);
        assert_eq!(last.first(), Some(&19_850));
        assert_eq!(last.last(), Some(&19_999));
    }
}
