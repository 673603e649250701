//! Parse→Decode: decode-window admission, frame dropping and codec input

use super::{Boundary, StageCore, StageInput};
use crate::buffer::{Buffer, OwnerTag};
use crate::components::{DecodeWindow, FrameDrop, FrameDropPoint};
use crate::player::stream::Stream;
use crate::ring::RingItem;
use std::sync::Arc;
use tracing::{debug, trace, warn};

struct ParseToDecode {
    core: StageCore,
    /// A dropped frame announced new stream parameters; the next decoded
    /// frame must carry the flag instead
    pending_new_stream_parameters: bool,
}

pub(crate) async fn run(stream: Arc<Stream>) {
    let input = Arc::clone(&stream.parsed_ring);
    let mut stage = ParseToDecode {
        core: StageCore::new(stream, Boundary::ParseToDecode, input),
        pending_new_stream_parameters: false,
    };

    loop {
        match stage.core.next_item().await {
            StageInput::Terminate => break,
            StageInput::Idle | StageInput::Item(RingItem::Poke) => continue,
            StageInput::Item(RingItem::Control(control)) => stage.core.handle_control(control).await,
            StageInput::Item(RingItem::Buffer(buffer)) => stage.handle_buffer(buffer).await,
        }
    }
    stage.core.shutdown();
}

/// Why a wait ended without the frame going to the codec
enum Abandon {
    Dropped,
    Terminating,
}

impl ParseToDecode {
    async fn handle_buffer(&mut self, buffer: Buffer) {
        let stream = Arc::clone(&self.core.stream);
        let sequence = buffer.sequence_number().map(|s| s.value);
        let parsed = buffer.parsed_frame_parameters();
        let time = parsed
            .and_then(|p| p.native_playback_time)
            .or_else(|| buffer.coded_frame_parameters().and_then(|p| p.playback_time));

        self.core.stamp_entry(&buffer);
        stream.with_statistics(|s| s.entered(Boundary::ParseToDecode));
        if let Some(sequence) = sequence {
            self.core.observe(sequence);
        }
        self.core.observe_time(time);

        self.core.process_before(sequence, time).await;

        let codec = stream.components().codec;
        if buffer.is_marker() {
            debug!("{}: marker passed Parse->Decode", stream.id);
            stream.set_discard(Boundary::ParseToDecode, false);
            if let Err(e) = codec.output_partial_decode_buffers() {
                warn!("{}: codec flush at marker failed: {}", stream.id, e);
            }
            match &stream.decoded_ring {
                Some(ring) => self.core.forward(ring, buffer).await,
                None => stream.marker_completed(&buffer),
            }
        } else if buffer.payload_len() == 0 {
            // Jump signal: push out whatever the codec holds
            if let Err(e) = codec.output_partial_decode_buffers() {
                warn!("{}: codec flush at jump failed: {}", stream.id, e);
            }
        } else {
            self.decode(&stream, buffer).await;
        }

        self.core.process_after(sequence, time).await;
    }

    async fn decode(&mut self, stream: &Arc<Stream>, buffer: Buffer) {
        if stream.discard(Boundary::ParseToDecode) || stream.is_unplayable() {
            self.drop_before_decode(stream, buffer);
            return;
        }

        let timer = stream.components().output_timer;
        if timer.test_for_frame_drop(&buffer, FrameDropPoint::BeforeDecodeWindow) == FrameDrop::Drop {
            self.drop_before_decode(stream, buffer);
            return;
        }

        match self.await_decode_window(stream, &buffer).await {
            Ok(()) => {}
            Err(Abandon::Terminating) => return,
            Err(Abandon::Dropped) => {
                self.drop_before_decode(stream, buffer);
                return;
            }
        }

        if timer.test_for_frame_drop(&buffer, FrameDropPoint::BeforeDecode) == FrameDrop::Drop {
            self.drop_before_decode(stream, buffer);
            return;
        }

        match self.await_decode_buffer(stream).await {
            Ok(()) => {}
            Err(Abandon::Terminating) => return,
            Err(Abandon::Dropped) => {
                self.drop_before_decode(stream, buffer);
                return;
            }
        }

        if std::mem::take(&mut self.pending_new_stream_parameters) {
            buffer.update_parsed_frame_parameters(|p| p.new_stream_parameters = true);
        }

        let mut buffer = buffer;
        buffer.transfer_ownership(OwnerTag::Codec);
        if let Err(e) = stream.components().codec.input(buffer) {
            warn!("{}: codec rejected frame: {}", stream.id, e);
        }
    }

    /// Hold the frame until the output timer admits it
    async fn await_decode_window(&self, stream: &Arc<Stream>, buffer: &Buffer) -> Result<(), Abandon> {
        let timer = stream.components().output_timer;
        let poll_limit = stream.ctx.config.timeouts.event_wait();
        loop {
            match timer.await_entry_into_decode_window(buffer) {
                Ok(DecodeWindow::Enter) => return Ok(()),
                Ok(DecodeWindow::Wait(delay)) => {
                    tokio::select! {
                        _ = stream.terminating.cancelled() => return Err(Abandon::Terminating),
                        _ = tokio::time::sleep(delay.min(poll_limit)) => {}
                    }
                    if stream.discard(Boundary::ParseToDecode) || stream.is_unplayable() {
                        return Err(Abandon::Dropped);
                    }
                }
                Err(e) => {
                    warn!("{}: decode window check failed: {}", stream.id, e);
                    return Ok(());
                }
            }
        }
    }

    /// Wait until the codec has a decode buffer to decode into
    async fn await_decode_buffer(&self, stream: &Arc<Stream>) -> Result<(), Abandon> {
        let Some(pool) = &stream.decode_buffer_pool else {
            return Ok(());
        };
        let wait = stream.ctx.config.timeouts.next_frame_event_wait();
        while !pool.wait_for_free(wait).await {
            if self.core.is_terminating() {
                return Err(Abandon::Terminating);
            }
            if stream.discard(Boundary::ParseToDecode) || stream.is_unplayable() {
                return Err(Abandon::Dropped);
            }
            trace!("{}: waiting for a free decode buffer", stream.id);
        }
        Ok(())
    }

    fn drop_before_decode(&mut self, stream: &Arc<Stream>, buffer: Buffer) {
        stream.with_statistics(|s| s.discarded(Boundary::ParseToDecode));
        if buffer
            .parsed_frame_parameters()
            .map_or(false, |p| p.new_stream_parameters)
        {
            self.pending_new_stream_parameters = true;
        }
        // Holes matter only to the reordering stage, and only for frames
        // that would otherwise have been shown
        if !stream.has_manifestor() || stream.discard(Boundary::ParseToDecode) || stream.is_unplayable() {
            return;
        }
        if let Err(e) = stream.record_non_decoded_frame(buffer) {
            warn!("{}: could not record skipped frame: {}", stream.id, e);
        }
    }
}
