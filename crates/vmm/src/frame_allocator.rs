//! Process-wide physical frame allocator.
//!
//! One bitmap covers every physical frame in the machine. Every address
//! space allocates from it at construction, the fault handler consults it
//! on every page-in, and teardown returns frames to it, so the allocator
//! is handed around as an explicit shared handle rather than living in a
//! global.

use std::sync::Arc;

use log::trace;
use machine::FrameNumber;
use spin::Mutex;

/// The bitmap itself, always accessed under the handle's lock.
struct FrameBitmap {
    bits: Vec<u8>,
    total: usize,
    free: usize,
}

impl FrameBitmap {
    fn new(total: usize) -> Self {
        Self {
            bits: vec![0; total.div_ceil(8)],
            total,
            free: total,
        }
    }

    fn test(&self, frame: usize) -> bool {
        self.bits[frame / 8] & (1 << (frame % 8)) != 0
    }

    fn set(&mut self, frame: usize) {
        self.bits[frame / 8] |= 1 << (frame % 8);
    }

    fn find(&mut self) -> Option<FrameNumber> {
        for frame in 0..self.total {
            if !self.test(frame) {
                self.set(frame);
                self.free -= 1;
                return Some(FrameNumber::new(frame));
            }
        }
        None
    }

    fn clear(&mut self, frame: FrameNumber) {
        let frame = frame.as_usize();
        debug_assert!(frame < self.total, "frame beyond physical memory");
        debug_assert!(self.test(frame), "clearing a frame that is not in use");
        self.bits[frame / 8] &= !(1 << (frame % 8));
        self.free += 1;
    }
}

/// Shared handle to the physical frame bitmap.
///
/// Cloning is cheap; all clones refer to the same bitmap, and every
/// operation takes the internal lock for its duration.
#[derive(Clone)]
pub struct FrameAllocator {
    inner: Arc<Mutex<FrameBitmap>>,
}

impl FrameAllocator {
    /// Creates an allocator covering `total_frames` frames, all free.
    pub fn new(total_frames: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FrameBitmap::new(total_frames))),
        }
    }

    /// Finds the lowest free frame, marks it used, and returns it.
    ///
    /// Returns None when physical memory is exhausted.
    pub fn find(&self) -> Option<FrameNumber> {
        let frame = self.inner.lock().find();
        if let Some(frame) = frame {
            trace!("frame {frame} allocated");
        }
        frame
    }

    /// Acquires `count` frames in one step, or none at all.
    ///
    /// Holding the lock across the whole acquisition means a caller that
    /// cannot be fully satisfied leaves the free count untouched.
    pub fn find_many(&self, count: usize) -> Option<Vec<FrameNumber>> {
        let mut bitmap = self.inner.lock();
        if bitmap.free < count {
            return None;
        }

        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            match bitmap.find() {
                Some(frame) => frames.push(frame),
                None => {
                    for frame in frames {
                        bitmap.clear(frame);
                    }
                    return None;
                }
            }
        }
        trace!("frames {:?} allocated", frames);
        Some(frames)
    }

    /// Marks a frame free again.
    ///
    /// The caller must guarantee no live translation entry still
    /// references the frame; the allocator does not check.
    pub fn clear(&self, frame: FrameNumber) {
        self.inner.lock().clear(frame);
        trace!("frame {frame} freed");
    }

    /// Returns the number of free frames.
    pub fn count_free(&self) -> usize {
        self.inner.lock().free
    }

    /// Returns the total number of frames covered by the allocator.
    pub fn total_frames(&self) -> usize {
        self.inner.lock().total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_returns_lowest_free() {
        let frames = FrameAllocator::new(4);
        assert_eq!(frames.find(), Some(FrameNumber::new(0)));
        assert_eq!(frames.find(), Some(FrameNumber::new(1)));

        frames.clear(FrameNumber::new(0));
        // The hole is reused before higher frames.
        assert_eq!(frames.find(), Some(FrameNumber::new(0)));
    }

    #[test]
    fn exhaustion_returns_none() {
        let frames = FrameAllocator::new(2);
        assert!(frames.find().is_some());
        assert!(frames.find().is_some());
        assert_eq!(frames.find(), None);
        assert_eq!(frames.count_free(), 0);
    }

    #[test]
    fn clear_updates_free_count() {
        let frames = FrameAllocator::new(3);
        let frame = frames.find().unwrap();
        assert_eq!(frames.count_free(), 2);
        frames.clear(frame);
        assert_eq!(frames.count_free(), 3);
    }

    #[test]
    fn find_many_is_all_or_nothing() {
        let frames = FrameAllocator::new(3);
        frames.find().unwrap();

        assert!(frames.find_many(3).is_none());
        assert_eq!(frames.count_free(), 2);

        let acquired = frames.find_many(2).unwrap();
        assert_eq!(acquired, vec![FrameNumber::new(1), FrameNumber::new(2)]);
        assert_eq!(frames.count_free(), 0);
    }

    #[test]
    fn clones_share_the_bitmap() {
        let frames = FrameAllocator::new(2);
        let other = frames.clone();
        frames.find().unwrap();
        assert_eq!(other.count_free(), 1);
    }
}
