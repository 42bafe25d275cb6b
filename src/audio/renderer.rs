//! Output callback state.
//!
//! One `OutputRenderer` is moved into each output stream. It reads the
//! current snapshot, mixes the next block, advances the shared position and
//! reports completion back to the control worker through an SPSC queue.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use rtrb::Producer;

use crate::engine::transport::TransportShared;
use crate::mixer::{mix_block, HoldMode};

/// Notifications from the audio thread to the control worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtEvent {
    /// Position reached the end of the session loaded as `session`
    Completed { session: u64 },
    /// A callback panicked and was replaced by silence
    RenderFault,
}

pub struct OutputRenderer {
    transport: Arc<TransportShared>,
    events: Producer<RtEvent>,
    scratch: Vec<f32>,
}

impl OutputRenderer {
    pub fn new(
        transport: Arc<TransportShared>,
        events: Producer<RtEvent>,
        scratch_samples: usize,
    ) -> Self {
        Self {
            transport,
            events,
            scratch: vec![0.0; scratch_samples.max(256)],
        }
    }

    pub fn transport(&self) -> &Arc<TransportShared> {
        &self.transport
    }

    /// Fill an interleaved f32 device buffer.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let transport = &self.transport;
        let events = &mut self.events;
        let result = catch_unwind(AssertUnwindSafe(|| {
            render_block(transport, events, out, channels)
        }));
        if result.is_err() {
            out.fill(0.0);
            let _ = self.events.push(RtEvent::RenderFault);
        }
    }

    /// Fill a device buffer of any sample format through the f32 scratch.
    pub fn render_converted<T>(&mut self, out: &mut [T], channels: usize)
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let channels = channels.max(1);
        let mut scratch = std::mem::take(&mut self.scratch);
        let step = (scratch.len() / channels).max(1) * channels;
        for chunk in out.chunks_mut(step) {
            let tmp = &mut scratch[..chunk.len()];
            self.render(tmp, channels);
            for (dst, src) in chunk.iter_mut().zip(tmp.iter()) {
                *dst = T::from_sample(*src);
            }
        }
        self.scratch = scratch;
    }
}

fn render_block(
    transport: &TransportShared,
    events: &mut Producer<RtEvent>,
    out: &mut [f32],
    channels: usize,
) {
    let channels = channels.max(1);
    let frames = out.len() / channels;
    transport.note_callback(frames);

    if !transport.is_playing() {
        out.fill(0.0);
        transport.snapshot.mark_observed();
        return;
    }

    let snapshot = transport.snapshot.load_for_render();
    let total = snapshot.total_frames;
    let position = transport.position();

    if position >= total {
        out.fill(0.0);
        transport.set_playing(false);
        let _ = events.push(RtEvent::Completed {
            session: snapshot.session,
        });
        return;
    }

    let count = frames.min((total - position) as usize);
    let (head, tail) = out.split_at_mut(count * channels);
    let clipped = mix_block(&snapshot, position, head, channels, HoldMode::Live);
    tail.fill(0.0);
    transport.add_clipped(clipped);

    let end = position + count as u64;
    if transport.advance_position(position, end) && end >= total {
        transport.set_playing(false);
        let _ = events.push(RtEvent::Completed {
            session: snapshot.session,
        });
    }
}
