//! Input callback state.
//!
//! Downmixes device input to mono, tracks the peak level of each callback and,
//! while recording, hands filled blocks to the writer thread.

use std::sync::Arc;

use rtrb::{Consumer, Producer};

use super::buffer_pool::CaptureBlock;
use crate::recorder::RecorderShared;

pub struct InputCapture {
    shared: Arc<RecorderShared>,
    pool_consumer: Consumer<CaptureBlock>,
    data_producer: Producer<CaptureBlock>,
    current: Option<CaptureBlock>,
}

impl InputCapture {
    pub fn new(
        shared: Arc<RecorderShared>,
        pool_consumer: Consumer<CaptureBlock>,
        data_producer: Producer<CaptureBlock>,
    ) -> Self {
        Self {
            shared,
            pool_consumer,
            data_producer,
            current: None,
        }
    }

    /// Consume one interleaved device buffer.
    pub fn process<T>(&mut self, data: &[T], channels: usize)
    where
        T: cpal::Sample,
        f32: cpal::FromSample<T>,
    {
        let channels = channels.max(1);
        let recording = self.shared.is_recording();
        let scale = 1.0 / channels as f32;
        let mut peak = 0.0f32;
        let mut dropped = 0u64;
        let mut written = 0u64;

        for frame in data.chunks_exact(channels) {
            let mono = frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>() * scale;
            peak = peak.max(mono.abs());
            if !recording {
                continue;
            }
            if self.current.is_none() {
                self.current = self.pool_consumer.pop().ok().map(|mut block| {
                    block.len = 0;
                    block
                });
            }
            match self.current.as_mut() {
                Some(block) => {
                    block.samples[block.len] = mono;
                    block.len += 1;
                    written += 1;
                    if block.len == block.capacity() {
                        self.flush();
                    }
                }
                None => dropped += 1,
            }
        }

        if recording {
            // Keep latency bounded to one callback
            self.flush();
        }
        self.shared.set_level(peak.min(1.0));
        self.shared.add_frames(written);
        self.shared.add_dropped(dropped);
    }

    fn flush(&mut self) {
        if let Some(block) = self.current.take() {
            if block.len == 0 {
                self.current = Some(block);
                return;
            }
            if let Err(rtrb::PushError::Full(block)) = self.data_producer.push(block) {
                // Writer is behind; the block is lost and reused
                self.shared.add_dropped(block.len as u64);
                let mut block = block;
                block.len = 0;
                self.current = Some(block);
            }
        }
    }
}
