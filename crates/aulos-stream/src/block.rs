//! Block streaming transport: pool + free ring + ready ring.
//!
//! Whole sample blocks move between processes through a fixed pool of
//! shared-memory blocks. Block indices circulate through two shared circular
//! queues: a "free" ring seeded with every index at creation, and a "ready"
//! ring carrying `(index, used byte length)` descriptors. The producer
//! acquires a free block, writes a versioned header plus payload, submits it
//! to the ready ring, and fires the wake signal; the consumer drains *all*
//! ready blocks per poll and recycles every one of them, valid or not.
//! Neither side ever blocks — producers treat an empty free ring as
//! backpressure and degrade to silence.

use crate::error::{Result, StreamError};
use crate::protocol::{
    BlockHeader, StreamDescriptor, BLOCK_HEADER_BYTES, BLOCK_PROTOCOL_VERSION,
};
use crate::queue::{Consumer, Producer, SharedQueue};
use crate::shared_memory::{RegionHandle, SharedRegion};
use std::sync::Arc;

/// Descriptor ring capacity. Power of two, and one more slot than the largest
/// supported pool so a full pool's descriptors always fit.
pub const STREAM_RING_SLOTS: usize = 64;

const POOL_MAGIC: u32 = 0x4155_4250; // "AUBP"
const POOL_VERSION: u32 = 1;
const POOL_HEADER_BYTES: usize = 16;

/// A block reference circulating through the rings. `len` is meaningful only
/// on the ready ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct BlockDescriptor {
    pub index: u32,
    pub len: u32,
}

type DescriptorRing = SharedQueue<BlockDescriptor, STREAM_RING_SLOTS>;
type RingProducer = Producer<BlockDescriptor, STREAM_RING_SLOTS>;
type RingConsumer = Consumer<BlockDescriptor, STREAM_RING_SLOTS>;

/// The backing pool: `{ u32 magic; u32 version; u32 block_size;
/// u32 block_count }` followed by `block_count` blocks of `block_size` bytes.
pub struct BlockPool {
    region: Arc<SharedRegion>,
    block_size: u32,
    block_count: u32,
}

impl BlockPool {
    pub fn create(name: &str, block_size: u32, block_count: u32) -> Result<Self> {
        // Keep every block 8-aligned so payloads stay f32-aligned.
        let block_size = block_size
            .max(BLOCK_HEADER_BYTES as u32)
            .next_multiple_of(8);
        if block_count == 0 || block_count as usize > STREAM_RING_SLOTS - 1 {
            return Err(StreamError::PoolTooLarge {
                count: block_count,
                slots: STREAM_RING_SLOTS,
            });
        }

        let len = POOL_HEADER_BYTES + block_size as usize * block_count as usize;
        let region = SharedRegion::create(name, len)?;

        // Written once before the region is shared; no synchronization needed.
        let header = [POOL_MAGIC, POOL_VERSION, block_size, block_count];
        for (i, field) in header.iter().enumerate() {
            // SAFETY: in bounds; the region is at least POOL_HEADER_BYTES.
            unsafe {
                region
                    .as_ptr()
                    .add(i * 4)
                    .cast::<u8>()
                    .copy_from_nonoverlapping(field.to_le_bytes().as_ptr(), 4);
            }
        }

        Ok(Self {
            region: Arc::new(region),
            block_size,
            block_count,
        })
    }

    pub fn attach(handle: &RegionHandle) -> Result<Self> {
        let region = SharedRegion::attach(handle)?;
        if region.len() < POOL_HEADER_BYTES {
            return Err(StreamError::BadPoolHeader);
        }
        let field = |i: usize| {
            let mut bytes = [0u8; 4];
            // SAFETY: in bounds, checked above.
            unsafe {
                region
                    .as_ptr()
                    .add(i * 4)
                    .copy_to_nonoverlapping(bytes.as_mut_ptr(), 4);
            }
            u32::from_le_bytes(bytes)
        };
        let (magic, version, block_size, block_count) = (field(0), field(1), field(2), field(3));
        if magic != POOL_MAGIC || version != POOL_VERSION {
            return Err(StreamError::BadPoolHeader);
        }
        let expected = POOL_HEADER_BYTES + block_size as usize * block_count as usize;
        if region.len() < expected {
            return Err(StreamError::RegionSizeMismatch {
                expected,
                actual: region.len(),
            });
        }
        Ok(Self {
            region: Arc::new(region),
            block_size,
            block_count,
        })
    }

    pub fn handle(&self) -> RegionHandle {
        self.region.handle()
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    fn block_ptr(&self, index: u32) -> *mut u8 {
        // SAFETY: callers check `index < block_count`; the region covers
        // every block.
        unsafe {
            self.region
                .as_ptr()
                .add(POOL_HEADER_BYTES + index as usize * self.block_size as usize)
        }
    }

    fn write_block(&self, index: u32, header: &BlockHeader, payload: &[f32]) -> u32 {
        let used = BLOCK_HEADER_BYTES + std::mem::size_of_val(payload);
        debug_assert!(index < self.block_count);
        debug_assert!(used <= self.block_size as usize);

        let base = self.block_ptr(index);
        // SAFETY: `used <= block_size`, checked by the producer before
        // acquiring the block; the consumer only reads this block after the
        // ready-ring enqueue publishes it.
        unsafe {
            let block = std::slice::from_raw_parts_mut(base, BLOCK_HEADER_BYTES);
            header.write_to(block);
            base.add(BLOCK_HEADER_BYTES).copy_from_nonoverlapping(
                payload.as_ptr().cast::<u8>(),
                std::mem::size_of_val(payload),
            );
        }
        used as u32
    }

    /// Decode a ready descriptor into its header and payload view. `None`
    /// for any structurally invalid block.
    fn read_block(&self, descriptor: BlockDescriptor) -> Option<(BlockHeader, &[f32])> {
        if descriptor.index >= self.block_count
            || descriptor.len as usize > self.block_size as usize
            || (descriptor.len as usize) < BLOCK_HEADER_BYTES
        {
            return None;
        }
        let base = self.block_ptr(descriptor.index);
        // SAFETY: bounds checked above; the producer published this block
        // through the ready ring before we dequeued its descriptor.
        let bytes =
            unsafe { std::slice::from_raw_parts(base, BLOCK_HEADER_BYTES) };
        let header = BlockHeader::read_from(bytes)?;

        let samples = header.payload_samples();
        if descriptor.len as usize != BLOCK_HEADER_BYTES + samples * 4 {
            return None;
        }
        // SAFETY: payload is in bounds per the descriptor length check, and
        // 4-aligned: blocks are 8-aligned and the header is 40 bytes.
        let payload = unsafe {
            std::slice::from_raw_parts(base.add(BLOCK_HEADER_BYTES).cast::<f32>(), samples)
        };
        Some((header, payload))
    }
}

/// A freshly created stream: pool plus both rings, free ring pre-seeded.
/// Split into the producer or consumer half, and hand the descriptor to the
/// peer process for the other half.
pub struct BlockStream {
    pool: BlockPool,
    ready: DescriptorRing,
    free: DescriptorRing,
}

impl BlockStream {
    pub fn create(name_prefix: &str, block_size: u32, block_count: u32) -> Result<Self> {
        let pool = BlockPool::create(&format!("{name_prefix}_pool"), block_size, block_count)?;
        let ready = DescriptorRing::create(&format!("{name_prefix}_ready"))?;
        let free = DescriptorRing::create(&format!("{name_prefix}_free"))?;

        for index in 0..block_count {
            free.enqueue(BlockDescriptor { index, len: 0 })
                .map_err(|_| StreamError::PoolTooLarge {
                    count: block_count,
                    slots: STREAM_RING_SLOTS,
                })?;
        }

        Ok(Self { pool, ready, free })
    }

    pub fn descriptor(&self) -> StreamDescriptor {
        StreamDescriptor {
            pool: self.pool.handle(),
            ready_ring: self.ready.handle(),
            free_ring: self.free.handle(),
        }
    }

    pub fn into_producer(self) -> BlockStreamProducer {
        BlockStreamProducer {
            pool: self.pool,
            ready: self.ready.into_producer(),
            free: self.free.into_consumer(),
        }
    }

    pub fn into_consumer(self) -> BlockStreamConsumer {
        BlockStreamConsumer {
            pool: self.pool,
            ready: self.ready.into_consumer(),
            free: self.free.into_producer(),
        }
    }
}

/// The submitting side: acquires free blocks, writes, publishes.
pub struct BlockStreamProducer {
    pool: BlockPool,
    ready: RingProducer,
    free: RingConsumer,
}

impl BlockStreamProducer {
    pub fn attach(descriptor: &StreamDescriptor) -> Result<Self> {
        Ok(Self {
            pool: BlockPool::attach(&descriptor.pool)?,
            ready: RingProducer::attach(&descriptor.ready_ring)?,
            free: RingConsumer::attach(&descriptor.free_ring)?,
        })
    }

    /// Submit one block. Fails fast — `false` — when no free block is
    /// available or the block does not fit; the caller must treat that as
    /// backpressure and degrade gracefully (emit silence), never wait.
    pub fn try_submit(&self, header: &BlockHeader, payload: &[f32]) -> bool {
        if payload.len() != header.payload_samples() {
            tracing::warn!(
                node_id = header.node_id,
                expected = header.payload_samples(),
                actual = payload.len(),
                "dropping block with mismatched payload length"
            );
            return false;
        }
        let needed = BLOCK_HEADER_BYTES + std::mem::size_of_val(payload);
        if needed > self.pool.block_size() as usize {
            tracing::warn!(
                node_id = header.node_id,
                needed,
                block_size = self.pool.block_size(),
                "dropping block larger than the pool block size"
            );
            return false;
        }

        let Some(descriptor) = self.free.dequeue() else {
            tracing::trace!(node_id = header.node_id, "no free block, backpressure");
            return false;
        };
        if descriptor.index >= self.pool.block_count() {
            tracing::warn!(index = descriptor.index, "discarding corrupt free descriptor");
            return false;
        }

        let used = self.pool.write_block(descriptor.index, header, payload);
        let ready = BlockDescriptor {
            index: descriptor.index,
            len: used,
        };
        if self.ready.enqueue(ready).is_err() {
            // Sized so this cannot happen while the peer recycles; the block
            // stays out of circulation until the stream is rebuilt.
            tracing::warn!(index = ready.index, "ready ring full, block leaked");
            return false;
        }
        true
    }

    /// Free blocks currently available to acquire.
    pub fn free_blocks(&self) -> usize {
        self.free.len()
    }
}

/// The draining side: consumes every ready block per poll, recycles all of
/// them, and hands structurally valid ones to the caller.
pub struct BlockStreamConsumer {
    pool: BlockPool,
    ready: RingConsumer,
    free: RingProducer,
}

impl BlockStreamConsumer {
    pub fn attach(descriptor: &StreamDescriptor) -> Result<Self> {
        Ok(Self {
            pool: BlockPool::attach(&descriptor.pool)?,
            ready: RingConsumer::attach(&descriptor.ready_ring)?,
            free: RingProducer::attach(&descriptor.free_ring)?,
        })
    }

    /// Drain all currently-ready blocks — never waits for more. Every drained
    /// block goes back to the free ring regardless of validity. Returns how
    /// many blocks passed structural validation and reached `visit`.
    pub fn drain(&self, mut visit: impl FnMut(&BlockHeader, &[f32])) -> usize {
        let mut valid = 0;
        while let Some(descriptor) = self.ready.dequeue() {
            match self.pool.read_block(descriptor) {
                Some((header, payload)) if header.version == BLOCK_PROTOCOL_VERSION => {
                    visit(&header, payload);
                    valid += 1;
                }
                Some((header, _)) => {
                    tracing::warn!(
                        node_id = header.node_id,
                        version = header.version,
                        "discarding block with unsupported protocol version"
                    );
                }
                None => {
                    tracing::warn!(
                        index = descriptor.index,
                        len = descriptor.len,
                        "discarding malformed block"
                    );
                }
            }
            if descriptor.index < self.pool.block_count() {
                let _ = self.free.enqueue(BlockDescriptor {
                    index: descriptor.index,
                    len: 0,
                });
            }
        }
        valid
    }

    pub fn pending_blocks(&self) -> usize {
        self.ready.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_prefix(tag: &str) -> String {
        format!("aulos_test_block_{tag}_{}", std::process::id())
    }

    fn stream_pair(tag: &str, block_count: u32) -> (BlockStreamProducer, BlockStreamConsumer) {
        let block_size = BLOCK_HEADER_BYTES as u32 + 8 * 2 * 4;
        let stream = BlockStream::create(&unique_prefix(tag), block_size, block_count).unwrap();
        let descriptor = stream.descriptor();
        let producer = stream.into_producer();
        let consumer = BlockStreamConsumer::attach(&descriptor).unwrap();
        (producer, consumer)
    }

    #[test]
    fn test_submit_then_drain_round_trip() {
        let (producer, consumer) = stream_pair("rt", 4);
        let payload: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let header = BlockHeader::request(5, 0.5, 8, 2, 2);
        assert!(producer.try_submit(&header, &payload));

        let mut seen = Vec::new();
        let valid = consumer.drain(|header, payload| {
            seen.push((header.node_id, payload.to_vec()));
        });
        assert_eq!(valid, 1);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, 5);
        assert_eq!(seen[0].1, payload);
    }

    #[test]
    fn test_backpressure_when_free_ring_is_empty() {
        let (producer, consumer) = stream_pair("bp", 2);
        let payload = vec![0.0f32; 16];
        let header = BlockHeader::request(1, 0.0, 8, 2, 2);

        assert!(producer.try_submit(&header, &payload));
        assert!(producer.try_submit(&header, &payload));
        // Pool exhausted: fail fast, no blocking.
        assert!(!producer.try_submit(&header, &payload));

        // Draining recycles the blocks and the producer recovers.
        assert_eq!(consumer.drain(|_, _| {}), 2);
        assert_eq!(producer.free_blocks(), 2);
        assert!(producer.try_submit(&header, &payload));
    }

    #[test]
    fn test_oversized_payload_is_rejected_without_consuming_a_block() {
        let (producer, _consumer) = stream_pair("big", 2);
        let header = BlockHeader::request(1, 0.0, 64, 2, 2);
        let payload = vec![0.0f32; 64 * 2];
        assert!(!producer.try_submit(&header, &payload));
        assert_eq!(producer.free_blocks(), 2);
    }

    #[test]
    fn test_unsupported_version_is_recycled_but_not_visited() {
        let (producer, consumer) = stream_pair("ver", 2);
        let payload = vec![0.0f32; 16];
        let mut header = BlockHeader::request(1, 0.0, 8, 2, 2);
        header.version = 99;
        assert!(producer.try_submit(&header, &payload));

        let mut visited = 0;
        assert_eq!(
            consumer.drain(|_, _| {
                visited += 1;
            }),
            0
        );
        assert_eq!(visited, 0);
        // The block still went back to the free ring.
        assert_eq!(producer.free_blocks(), 2);
    }

    #[test]
    fn test_mismatched_payload_length_is_rejected() {
        let (producer, _consumer) = stream_pair("len", 2);
        let header = BlockHeader::request(1, 0.0, 8, 2, 2);
        assert!(!producer.try_submit(&header, &vec![0.0f32; 3]));
    }

    #[test]
    fn test_pool_attach_validates_magic() {
        let prefix = unique_prefix("magic");
        let pool = BlockPool::create(&format!("{prefix}_pool"), 128, 2).unwrap();
        let mut handle = pool.handle();
        // Attaching a ring region as a pool must fail on the magic check.
        let ring = DescriptorRing::create(&format!("{prefix}_ring")).unwrap();
        handle.name = ring.handle().name;
        handle.len = ring.handle().len;
        assert!(matches!(
            BlockPool::attach(&handle),
            Err(StreamError::BadPoolHeader)
        ));
    }
}
