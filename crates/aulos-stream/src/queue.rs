//! Lock-free shared circular queue.
//!
//! Wire layout at region offset 0, little-endian:
//! `{ u64 tail; u64 head; u64 head_protector; T data[SIZE] }` with `SIZE` a
//! compile-time power of two. Counters are full monotonically increasing
//! values — only indexing applies the modulus, which keeps the full/empty
//! distinction unambiguous without a separate flag. Usable slots are
//! `SIZE - 1`.
//!
//! Discipline is single-producer / multi-consumer: exactly one producer at a
//! time (enforced by the non-cloneable [`Producer`] handle), any number of
//! concurrent consumers racing through the `head_protector` claim. All
//! counter accesses are `SeqCst`; that is the cross-process correctness
//! argument, so no weaker ordering is used anywhere here.

use crate::error::{Result, StreamError};
use crate::shared_memory::{RegionHandle, SharedRegion};
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Sentinel stored in `head_protector` when no consumer holds the claim.
const UNCLAIMED: u64 = u64::MAX;

#[repr(C)]
struct QueueHeader {
    tail: AtomicU64,
    head: AtomicU64,
    head_protector: AtomicU64,
}

const HEADER_BYTES: usize = size_of::<QueueHeader>();

/// A shared circular queue mapped over a [`SharedRegion`].
///
/// `SharedQueue` itself only creates, attaches, and splits; the operations
/// live on [`Producer`] and [`Consumer`] so that holding the capability to
/// enqueue is a type-level fact, not a convention.
pub struct SharedQueue<T: Copy, const SIZE: usize> {
    region: Arc<SharedRegion>,
    _marker: PhantomData<T>,
}

impl<T: Copy, const SIZE: usize> SharedQueue<T, SIZE> {
    fn validate_shape() -> Result<()> {
        if SIZE < 2 || !SIZE.is_power_of_two() {
            return Err(StreamError::InvalidCapacity(SIZE));
        }
        if align_of::<T>() > align_of::<QueueHeader>() {
            return Err(StreamError::UnsupportedAlignment(align_of::<T>()));
        }
        Ok(())
    }

    fn region_len() -> usize {
        HEADER_BYTES + SIZE * size_of::<T>()
    }

    /// Allocate backing storage and return a fresh, empty queue.
    pub fn create(name: &str) -> Result<Self> {
        Self::validate_shape()?;
        let region = SharedRegion::create(name, Self::region_len())?;
        let queue = Self {
            region: Arc::new(region),
            _marker: PhantomData,
        };
        let header = queue.header();
        header.tail.store(0, Ordering::SeqCst);
        header.head.store(0, Ordering::SeqCst);
        header.head_protector.store(UNCLAIMED, Ordering::SeqCst);
        Ok(queue)
    }

    /// Attach to an existing queue by handle.
    pub fn attach(handle: &RegionHandle) -> Result<Self> {
        Self::validate_shape()?;
        if handle.len != Self::region_len() {
            return Err(StreamError::RegionSizeMismatch {
                expected: Self::region_len(),
                actual: handle.len,
            });
        }
        Ok(Self {
            region: Arc::new(SharedRegion::attach(handle)?),
            _marker: PhantomData,
        })
    }

    pub fn handle(&self) -> RegionHandle {
        self.region.handle()
    }

    pub fn split(self) -> (Producer<T, SIZE>, Consumer<T, SIZE>) {
        let consumer = Consumer(Self {
            region: Arc::clone(&self.region),
            _marker: PhantomData,
        });
        (Producer(self), consumer)
    }

    pub fn into_producer(self) -> Producer<T, SIZE> {
        Producer(self)
    }

    pub fn into_consumer(self) -> Consumer<T, SIZE> {
        Consumer(self)
    }

    fn header(&self) -> &QueueHeader {
        // SAFETY: the region is at least `region_len` bytes and offset 0 is
        // 8-aligned (mappings are page-aligned); the header is three
        // AtomicU64s shared across processes by design.
        unsafe { &*(self.region.as_ptr() as *const QueueHeader) }
    }

    fn slot_ptr(&self, counter: u64) -> *mut T {
        let index = (counter % SIZE as u64) as usize;
        // SAFETY: index < SIZE and the data array starts right after the
        // header; `validate_shape` guarantees T's alignment fits.
        unsafe { self.region.as_ptr().add(HEADER_BYTES).cast::<T>().add(index) }
    }

    pub(crate) fn used(&self) -> u64 {
        let header = self.header();
        let tail = header.tail.load(Ordering::SeqCst);
        let head = header.head.load(Ordering::SeqCst);
        tail.saturating_sub(head)
    }

    /// Non-blocking enqueue; the single legal producer at a time.
    ///
    /// Fails, handing the value back, iff the slot at `tail % SIZE` is the
    /// one currently occupied by `head - 1`.
    pub(crate) fn enqueue(&self, value: T) -> std::result::Result<(), T> {
        let header = self.header();
        let tail = header.tail.load(Ordering::SeqCst);
        let head = header.head.load(Ordering::SeqCst);
        if head.wrapping_sub(1) % SIZE as u64 == tail % SIZE as u64 {
            return Err(value);
        }
        // SAFETY: the slot at `tail` is outside [head, tail), so no consumer
        // reads it until the tail store below publishes it.
        unsafe { self.slot_ptr(tail).write(value) };
        header.tail.store(tail + 1, Ordering::SeqCst);
        Ok(())
    }

    /// Non-blocking dequeue, safe for concurrent consumers.
    ///
    /// A consumer must first win the compare-and-swap that claims `head` into
    /// `head_protector`; a loser observes an emptied-looking queue and simply
    /// reports empty — the caller may retry.
    pub(crate) fn dequeue(&self) -> Option<T> {
        let header = self.header();
        let head = header.head.load(Ordering::SeqCst);
        if head >= header.tail.load(Ordering::SeqCst) {
            return None;
        }
        if header
            .head_protector
            .compare_exchange(UNCLAIMED, head, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }

        // Re-read under the claim: the previous holder may have advanced head
        // past the tail we saw.
        let head = header.head.load(Ordering::SeqCst);
        if head >= header.tail.load(Ordering::SeqCst) {
            header.head_protector.store(UNCLAIMED, Ordering::SeqCst);
            return None;
        }

        // SAFETY: only the protector holder reads this slot, and the producer
        // will not reuse it until head advances past it.
        let value = unsafe { self.slot_ptr(head).read() };
        header.head.store(head + 1, Ordering::SeqCst);
        header.head_protector.store(UNCLAIMED, Ordering::SeqCst);
        Some(value)
    }
}

/// The enqueue capability. Deliberately not `Clone`: two producers require
/// bypassing the type, not merely forgetting a rule.
pub struct Producer<T: Copy, const SIZE: usize>(SharedQueue<T, SIZE>);

impl<T: Copy, const SIZE: usize> Producer<T, SIZE> {
    pub fn create(name: &str) -> Result<Self> {
        Ok(SharedQueue::create(name)?.into_producer())
    }

    pub fn attach(handle: &RegionHandle) -> Result<Self> {
        Ok(SharedQueue::attach(handle)?.into_producer())
    }

    /// See [`SharedQueue`] docs: fails with the value when full.
    pub fn enqueue(&self, value: T) -> std::result::Result<(), T> {
        self.0.enqueue(value)
    }

    /// Spin through a caller-supplied wait primitive until there is room.
    /// There is no internal condition variable: the caller decides whether to
    /// spin, sleep, or signal.
    pub fn blocking_enqueue(&self, value: T, mut wait: impl FnMut()) {
        let mut value = value;
        loop {
            match self.enqueue(value) {
                Ok(()) => return,
                Err(rejected) => {
                    value = rejected;
                    wait();
                }
            }
        }
    }

    pub fn handle(&self) -> RegionHandle {
        self.0.handle()
    }

    pub fn capacity(&self) -> usize {
        SIZE - 1
    }

    pub fn len(&self) -> usize {
        self.0.used() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The dequeue capability; cloneable, and reentrant-safe across threads and
/// processes.
pub struct Consumer<T: Copy, const SIZE: usize>(SharedQueue<T, SIZE>);

impl<T: Copy, const SIZE: usize> Consumer<T, SIZE> {
    pub fn attach(handle: &RegionHandle) -> Result<Self> {
        Ok(SharedQueue::attach(handle)?.into_consumer())
    }

    /// `None` means empty *or* another consumer currently holds the claim.
    pub fn dequeue(&self) -> Option<T> {
        self.0.dequeue()
    }

    pub fn handle(&self) -> RegionHandle {
        self.0.handle()
    }

    pub fn len(&self) -> usize {
        self.0.used() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Copy, const SIZE: usize> Clone for Consumer<T, SIZE> {
    fn clone(&self) -> Self {
        Consumer(SharedQueue {
            region: Arc::clone(&self.0.region),
            _marker: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn unique_name(tag: &str) -> String {
        format!("aulos_test_queue_{tag}_{}", std::process::id())
    }

    #[test]
    fn test_fifo_order() {
        let (producer, consumer) = SharedQueue::<u64, 8>::create(&unique_name("fifo"))
            .unwrap()
            .split();
        for value in 0..5u64 {
            producer.enqueue(value).unwrap();
        }
        for expected in 0..5u64 {
            assert_eq!(consumer.dequeue(), Some(expected));
        }
        assert_eq!(consumer.dequeue(), None);
    }

    #[test]
    fn test_capacity_is_size_minus_one() {
        let (producer, consumer) = SharedQueue::<u32, 8>::create(&unique_name("cap"))
            .unwrap()
            .split();
        assert_eq!(producer.capacity(), 7);
        for value in 0..7u32 {
            producer.enqueue(value).unwrap();
        }
        assert_eq!(producer.enqueue(99), Err(99));
        assert_eq!(producer.len(), 7);

        // Draining one slot makes room for exactly one more.
        assert_eq!(consumer.dequeue(), Some(0));
        producer.enqueue(7).unwrap();
        assert_eq!(producer.enqueue(8), Err(8));
    }

    #[test]
    fn test_used_count_never_exceeds_capacity() {
        let (producer, consumer) = SharedQueue::<u32, 4>::create(&unique_name("bound"))
            .unwrap()
            .split();
        for round in 0..50u32 {
            let _ = producer.enqueue(round);
            assert!(producer.len() <= producer.capacity());
            if round % 3 == 0 {
                let _ = consumer.dequeue();
            }
        }
    }

    #[test]
    fn test_attach_sees_enqueued_values() {
        let queue = SharedQueue::<u64, 16>::create(&unique_name("attach")).unwrap();
        let handle = queue.handle();
        let producer = queue.into_producer();
        producer.enqueue(41).unwrap();
        producer.enqueue(42).unwrap();

        let consumer = Consumer::<u64, 16>::attach(&handle).unwrap();
        assert_eq!(consumer.dequeue(), Some(41));
        assert_eq!(consumer.dequeue(), Some(42));
    }

    #[test]
    fn test_attach_rejects_wrong_size() {
        let queue = SharedQueue::<u64, 16>::create(&unique_name("size")).unwrap();
        let handle = queue.handle();
        assert!(matches!(
            SharedQueue::<u64, 32>::attach(&handle),
            Err(StreamError::RegionSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_non_power_of_two_rejected() {
        assert!(matches!(
            SharedQueue::<u64, 6>::create(&unique_name("npot")),
            Err(StreamError::InvalidCapacity(6))
        ));
    }

    #[test]
    fn test_blocking_enqueue_waits_for_room() {
        let (producer, consumer) = SharedQueue::<u32, 4>::create(&unique_name("blocking"))
            .unwrap()
            .split();
        for value in 0..3u32 {
            producer.enqueue(value).unwrap();
        }

        let drainer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            consumer.dequeue()
        });

        producer.blocking_enqueue(3, std::thread::yield_now);
        assert_eq!(drainer.join().unwrap(), Some(0));
        assert_eq!(producer.len(), 3);
    }

    #[test]
    fn test_concurrent_consumers_each_value_exactly_once() {
        const ITEMS: usize = 200;
        let (producer, consumer) = SharedQueue::<u64, 256>::create(&unique_name("mc"))
            .unwrap()
            .split();
        for value in 0..ITEMS as u64 {
            producer.enqueue(value).unwrap();
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let taken = Arc::new(AtomicUsize::new(0));
        let mut workers = Vec::new();
        for _ in 0..4 {
            let consumer = consumer.clone();
            let seen = Arc::clone(&seen);
            let taken = Arc::clone(&taken);
            workers.push(std::thread::spawn(move || {
                while taken.load(Ordering::SeqCst) < ITEMS {
                    if let Some(value) = consumer.dequeue() {
                        seen.lock().unwrap().push(value);
                        taken.fetch_add(1, Ordering::SeqCst);
                    } else {
                        std::thread::yield_now();
                    }
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        let mut seen = Arc::try_unwrap(seen).unwrap().into_inner().unwrap();
        seen.sort_unstable();
        let expected: Vec<u64> = (0..ITEMS as u64).collect();
        assert_eq!(seen, expected);
    }
}
