// BufferPool - lock-free capture block pool with dual SPSC queues
//
// Carries recorded input from the device callback to the recorder's writer
// thread without allocating on the audio thread.
//
// Block flow:
// 1. Input callback pops an empty block from the pool queue
// 2. Input callback fills it with mono samples and pushes it to the data queue
// 3. Writer thread pops the block, encodes it, and returns it to the pool queue

use rtrb::{Consumer, Producer};

/// Pre-allocated capture block; only `samples[..len]` is meaningful.
#[derive(Debug)]
pub struct CaptureBlock {
    pub samples: Vec<f32>,
    pub len: usize,
}

impl CaptureBlock {
    pub fn filled(&self) -> &[f32] {
        &self.samples[..self.len]
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }
}

/// Both ends of the two queues. Split between the callback (`pool_consumer`,
/// `data_producer`) and the writer (`data_consumer`, `pool_producer`).
pub struct BufferPoolChannels {
    pub data_producer: Producer<CaptureBlock>,
    pub data_consumer: Consumer<CaptureBlock>,
    pub pool_producer: Producer<CaptureBlock>,
    pub pool_consumer: Consumer<CaptureBlock>,
}

pub struct BufferPool;

impl BufferPool {
    /// Allocate `block_count` blocks of `block_size` samples, all initially
    /// in the pool queue. Zero sizes are raised to 1.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(block_count: usize, block_size: usize) -> BufferPoolChannels {
        let block_count = block_count.max(1);
        let block_size = block_size.max(1);

        let (mut pool_producer, pool_consumer) = rtrb::RingBuffer::new(block_count);
        let (data_producer, data_consumer) = rtrb::RingBuffer::new(block_count);

        for _ in 0..block_count {
            let block = CaptureBlock {
                samples: vec![0.0_f32; block_size],
                len: 0,
            };
            if pool_producer.push(block).is_err() {
                break;
            }
        }

        BufferPoolChannels {
            data_producer,
            data_consumer,
            pool_producer,
            pool_consumer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_starts_full() {
        let mut channels = BufferPool::new(8, 256);
        let mut available = 0;
        while let Ok(block) = channels.pool_consumer.pop() {
            assert_eq!(block.capacity(), 256);
            assert_eq!(block.len, 0);
            available += 1;
        }
        assert_eq!(available, 8);
        assert!(channels.data_consumer.pop().is_err());
    }

    #[test]
    fn test_block_circulation() {
        let mut channels = BufferPool::new(2, 16);

        let mut block = channels.pool_consumer.pop().unwrap();
        block.samples[0] = 0.5;
        block.len = 1;
        channels.data_producer.push(block).unwrap();

        let block = channels.data_consumer.pop().unwrap();
        assert_eq!(block.filled(), &[0.5]);
        channels.pool_producer.push(block).unwrap();

        assert!(channels.pool_consumer.pop().is_ok());
        assert!(channels.pool_consumer.pop().is_ok());
        assert!(channels.pool_consumer.pop().is_err());
    }

    #[test]
    fn test_zero_sizes_are_raised() {
        let mut channels = BufferPool::new(0, 0);
        let block = channels.pool_consumer.pop().unwrap();
        assert_eq!(block.capacity(), 1);
    }

    #[test]
    fn test_send() {
        fn assert_send<T: Send>() {}
        assert_send::<BufferPoolChannels>();
    }
}
