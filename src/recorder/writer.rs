//! Recorder writer thread.
//!
//! Drains capture blocks from the data queue into a 16-bit WAV file and
//! returns them to the pool. Finalizing happens on [`WriterHandle::finish`].

use std::fs::File;
use std::io::BufWriter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use hound::WavWriter;
use rtrb::{Consumer, Producer};

use crate::audio::CaptureBlock;
use crate::error::RecorderError;

pub type WavFileWriter = WavWriter<BufWriter<File>>;

pub struct WriterHandle {
    stop: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<RecorderError>>>,
    join: Option<JoinHandle<Result<u64, RecorderError>>>,
}

impl WriterHandle {
    pub fn spawn(
        mut writer: WavFileWriter,
        mut data_consumer: Consumer<CaptureBlock>,
        mut pool_producer: Producer<CaptureBlock>,
        idle: Duration,
    ) -> Result<Self, RecorderError> {
        let stop = Arc::new(AtomicBool::new(false));
        let failure = Arc::new(Mutex::new(None));
        let stop_flag = Arc::clone(&stop);
        let failure_slot = Arc::clone(&failure);

        let join = std::thread::Builder::new()
            .name("mixplayer-recorder".to_string())
            .spawn(move || {
                let mut written = 0u64;
                loop {
                    let stopping = stop_flag.load(Ordering::Acquire);
                    let mut drained = false;
                    while let Ok(mut block) = data_consumer.pop() {
                        drained = true;
                        for &sample in block.filled() {
                            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
                            if let Err(err) = writer.write_sample(value) {
                                let err = RecorderError::from(err);
                                if let Ok(mut slot) = failure_slot.lock() {
                                    *slot = Some(err.clone());
                                }
                                return Err(err);
                            }
                        }
                        written += block.len as u64;
                        block.len = 0;
                        let _ = pool_producer.push(block);
                    }
                    if stopping {
                        break;
                    }
                    if !drained {
                        std::thread::sleep(idle);
                    }
                }
                writer.finalize()?;
                Ok(written)
            })
            .map_err(|e| RecorderError::WriteFailed {
                details: format!("failed to spawn writer thread: {}", e),
            })?;

        Ok(Self {
            stop,
            failure,
            join: Some(join),
        })
    }

    /// Writer hit an error and stopped on its own.
    pub fn failed(&self) -> Option<RecorderError> {
        self.failure.lock().ok().and_then(|slot| slot.clone())
    }

    /// Drain what is queued, finalize the header and join.
    ///
    /// The capture stream must already be closed.
    pub fn finish(mut self) -> Result<u64, RecorderError> {
        self.stop.store(true, Ordering::Release);
        match self.join.take() {
            Some(join) => join.join().unwrap_or_else(|_| {
                Err(RecorderError::WriteFailed {
                    details: "writer thread panicked".to_string(),
                })
            }),
            None => Ok(0),
        }
    }
}

impl Drop for WriterHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BufferPool;

    #[test]
    fn test_writes_and_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = WavWriter::create(&path, spec).unwrap();
        let mut pool = BufferPool::new(4, 4);

        let handle = WriterHandle::spawn(
            writer,
            pool.data_consumer,
            pool.pool_producer,
            Duration::from_millis(1),
        )
        .unwrap();

        for value in [0.5f32, -0.5] {
            let mut block = pool.pool_consumer.pop().unwrap();
            block.samples[..2].fill(value);
            block.len = 2;
            pool.data_producer.push(block).unwrap();
        }

        assert_eq!(handle.finish().unwrap(), 4);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![16384, 16384, -16384, -16384]);
    }
}
