//! Fixed-capacity time series that overwrites its oldest entry.
//!
//! Unlike a queue nothing is ever consumed: the ring holds the newest
//! `capacity` values and addresses them either chronologically (`at`) or
//! backwards from the newest (`from_newest`). Empty slots hold the fill value
//! the ring was created with (NaN for the pitch timeline).

#[derive(Debug, Clone)]
pub struct HistoryRing<T>
where
    T: Copy,
{
    values: Vec<T>,
    fill: T,
    write_index: usize,
    count: usize,
}

impl<T> HistoryRing<T>
where
    T: Copy,
{
    /// Creates a ring of `capacity` slots (at least one) set to `fill`.
    pub fn new(capacity: usize, fill: T) -> Self {
        Self {
            values: vec![fill; capacity.max(1)],
            fill,
            write_index: 0,
            count: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Physical index the next push will write to.
    #[inline]
    pub fn write_index(&self) -> usize {
        self.write_index
    }

    /// Backing storage in physical order.
    pub fn raw(&self) -> &[T] {
        &self.values
    }

    /// Appends `value`, overwriting the oldest entry once full. Returns the
    /// physical index written.
    #[inline]
    pub fn push(&mut self, value: T) -> usize {
        let index = self.write_index;
        self.values[index] = value;
        self.write_index = (index + 1) % self.values.len();
        if self.count < self.values.len() {
            self.count += 1;
        }
        index
    }

    #[inline]
    fn first_index(&self) -> usize {
        if self.count == self.values.len() {
            self.write_index
        } else {
            0
        }
    }

    /// Chronological access; `0` is the oldest stored value.
    #[inline]
    pub fn at(&self, index: usize) -> Option<T> {
        if index >= self.count {
            return None;
        }
        Some(self.values[(self.first_index() + index) % self.values.len()])
    }

    #[inline]
    fn newest_slot(&self, offset: usize) -> Option<usize> {
        if offset >= self.count {
            return None;
        }
        let len = self.values.len();
        Some((self.write_index + len - 1 - offset) % len)
    }

    /// Access counting back from the newest value; `0` is the newest.
    #[inline]
    pub fn from_newest(&self, offset: usize) -> Option<T> {
        self.newest_slot(offset).map(|slot| self.values[slot])
    }

    /// Overwrites the value `offset` steps back from the newest. Out of range
    /// offsets are ignored.
    #[inline]
    pub fn set_from_newest(&mut self, offset: usize, value: T) {
        if let Some(slot) = self.newest_slot(offset) {
            self.values[slot] = value;
        }
    }

    pub fn newest(&self) -> Option<T> {
        self.from_newest(0)
    }

    /// Iterates stored values from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = T> + ExactSizeIterator + '_ {
        let first = self.first_index();
        let len = self.values.len();
        (0..self.count).map(move |i| self.values[(first + i) % len])
    }

    pub fn clear(&mut self) {
        let fill = self.fill;
        self.values.iter_mut().for_each(|v| *v = fill);
        self.write_index = 0;
        self.count = 0;
    }

    /// Reallocates to `capacity` slots, keeping the newest values in order.
    pub fn resize(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        if capacity == self.values.len() {
            return;
        }
        let keep = self.count.min(capacity);
        let mut next = vec![self.fill; capacity];
        for (slot, value) in next.iter_mut().zip(self.iter().skip(self.count - keep)) {
            *slot = value;
        }
        self.values = next;
        self.count = keep;
        self.write_index = if keep == capacity { 0 } else { keep };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_and_keeps_newest() {
        let mut ring = HistoryRing::new(3, f64::NAN);
        for v in 1..=5 {
            ring.push(v as f64);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.iter().collect::<Vec<_>>(), vec![3.0, 4.0, 5.0]);
        assert_eq!(ring.at(0), Some(3.0));
        assert_eq!(ring.from_newest(0), Some(5.0));
        assert_eq!(ring.from_newest(2), Some(3.0));
        assert_eq!(ring.from_newest(3), None);
    }

    #[test]
    fn set_from_newest_rewrites_in_place() {
        let mut ring = HistoryRing::new(4, f64::NAN);
        for v in [1.0, 2.0, 3.0] {
            ring.push(v);
        }
        ring.set_from_newest(1, 20.0);
        ring.set_from_newest(7, 99.0);
        assert_eq!(ring.iter().collect::<Vec<_>>(), vec![1.0, 20.0, 3.0]);
    }

    #[test]
    fn resize_keeps_newest_in_order() {
        let mut ring = HistoryRing::new(4, f64::NAN);
        for v in 0..6 {
            ring.push(v as f64);
        }
        ring.resize(3);
        assert_eq!(ring.iter().collect::<Vec<_>>(), vec![3.0, 4.0, 5.0]);
        ring.push(6.0);
        assert_eq!(ring.iter().collect::<Vec<_>>(), vec![4.0, 5.0, 6.0]);

        ring.resize(5);
        assert_eq!(ring.len(), 3);
        ring.push(7.0);
        assert_eq!(ring.iter().collect::<Vec<_>>(), vec![4.0, 5.0, 6.0, 7.0]);
    }
}
