//! Stream pipeline
//!
//! Four stages run as independent tasks for the life of a stream:
//!
//! ```text
//! Collator → [collated] → Collate→Parse → FrameParser
//!          → [parsed]   → Parse→Decode  → Codec
//!          → [decoded]  → Decode→Manifest (reorder) → Manifestor
//!          → [manifested] → Post-Manifest → back to the codec's pool
//! ```
//!
//! Streams without a manifestor run only the first two stages.
//!
//! Every stage shares the same skeleton ([`StageCore`]): wait on the input
//! ring with a bounded timeout, classify the item, run accumulated control
//! messages before and after each data buffer, and execute or accumulate
//! control structures as they arrive.

pub mod collate_to_parse;
pub mod control_table;
pub mod decode_to_manifest;
pub mod non_decoded;
pub mod parse_to_decode;
pub mod post_manifest;
pub mod reorder;

use crate::buffer::Buffer;
use crate::control::ControlStructure;
use crate::player::in_sequence::perform;
use crate::player::stream::Stream;
use crate::ring::{BufferRing, RingItem};
use avpipe_common::time::NativeTime;
use control_table::AccumulatedControls;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Stage boundary within a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Boundary {
    CollateToParse,
    ParseToDecode,
    DecodeToManifest,
    PostManifest,
}

impl Boundary {
    pub const COUNT: usize = 4;

    pub const ALL: [Boundary; Boundary::COUNT] = [
        Boundary::CollateToParse,
        Boundary::ParseToDecode,
        Boundary::DecodeToManifest,
        Boundary::PostManifest,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Boundary::CollateToParse => "Collate->Parse",
            Boundary::ParseToDecode => "Parse->Decode",
            Boundary::DecodeToManifest => "Decode->Manifest",
            Boundary::PostManifest => "Post-Manifest",
        }
    }
}

/// Result of waiting on a stage's input ring
pub(crate) enum StageInput {
    Item(RingItem),
    /// The bounded wait expired
    Idle,
    Terminate,
}

/// Bookkeeping common to all stage loops
pub(crate) struct StageCore {
    pub(crate) stream: Arc<Stream>,
    pub(crate) boundary: Boundary,
    input: Arc<BufferRing>,
    controls: AccumulatedControls,
    pub(crate) max_sequence_seen: Option<u64>,
    pub(crate) last_time: Option<NativeTime>,
}

impl StageCore {
    pub(crate) fn new(stream: Arc<Stream>, boundary: Boundary, input: Arc<BufferRing>) -> Self {
        let capacity = stream.ctx.config.limits.accumulated_control_messages;
        Self {
            stream,
            boundary,
            input,
            controls: AccumulatedControls::new(capacity),
            max_sequence_seen: None,
            last_time: None,
        }
    }

    /// Wait for the next ring item or for shutdown
    pub(crate) async fn next_item(&self) -> StageInput {
        let wait = self.stream.ctx.config.timeouts.event_wait();
        tokio::select! {
            biased;
            _ = self.stream.terminating.cancelled() => StageInput::Terminate,
            item = self.input.extract(wait) => match item {
                Some(item) => StageInput::Item(item),
                None => StageInput::Idle,
            },
        }
    }

    pub(crate) fn is_terminating(&self) -> bool {
        self.stream.terminating.is_cancelled()
    }

    pub(crate) fn observe(&mut self, sequence: u64) {
        self.max_sequence_seen = Some(self.max_sequence_seen.map_or(sequence, |max| max.max(sequence)));
    }

    pub(crate) fn observe_time(&mut self, time: Option<NativeTime>) {
        if time.is_some() {
            self.last_time = time;
        }
    }

    pub(crate) fn stamp_entry(&self, buffer: &Buffer) {
        let boundary = self.boundary;
        buffer.update_sequence_number(|seq| seq.stage_entry[boundary.index()] = Some(Instant::now()));
    }

    /// Execute a newly arrived control structure now, or hold it
    pub(crate) async fn handle_control(&mut self, control: ControlStructure) {
        if control.sequence.satisfied_by(self.max_sequence_seen, self.last_time) {
            self.execute(control).await;
            return;
        }

        debug!(
            "{}: holding {} until {:?}",
            self.boundary.name(),
            control.call.name(),
            control.sequence
        );
        match self.controls.accumulate(control) {
            Ok(()) => self.stream.with_statistics(|s| s.controls_accumulated += 1),
            Err(rejected) => {
                error!(
                    "{}: accumulation table full, dropping {}",
                    self.boundary.name(),
                    rejected.call.name()
                );
            }
        }
    }

    /// Run held "before" messages whose threshold this buffer reaches
    pub(crate) async fn process_before(&mut self, sequence: Option<u64>, time: Option<NativeTime>) {
        for control in self.controls.take_ready(true, sequence, time) {
            self.execute(control).await;
        }
    }

    /// Run held "after" messages whose threshold this buffer reaches
    pub(crate) async fn process_after(&mut self, sequence: Option<u64>, time: Option<NativeTime>) {
        for control in self.controls.take_ready(false, sequence, time) {
            self.execute(control).await;
        }
    }

    async fn execute(&self, control: ControlStructure) {
        let name = control.call.name();
        debug!("{}: performing {}", self.boundary.name(), name);
        self.stream.with_statistics(|s| s.controls_executed += 1);
        if let Err(e) = perform(&self.stream, control.call).await {
            warn!("{}: {} failed: {}", self.boundary.name(), name, e);
        }
    }

    /// Forward a marker into a downstream ring, waiting for space for as
    /// long as the stream lives
    pub(crate) async fn forward(&self, ring: &BufferRing, buffer: Buffer) {
        let wait = self.stream.ctx.config.timeouts.event_wait();
        let mut item = RingItem::Buffer(buffer);
        loop {
            let full = tokio::select! {
                biased;
                _ = self.stream.terminating.cancelled() => {
                    debug!("{}: stream terminating, marker not forwarded", self.boundary.name());
                    return;
                }
                result = ring.insert_wait(item, wait) => match result {
                    Ok(()) => return,
                    Err(full) => full,
                },
            };
            warn!(
                "{}: downstream ring full ({} entries), waiting to forward marker",
                self.boundary.name(),
                full.capacity
            );
            item = full.item;
        }
    }

    /// Release everything held by this stage at shutdown
    pub(crate) fn shutdown(&mut self) {
        let held = self.controls.clear();
        if held > 0 {
            debug!(
                "{}: released {} held control messages at shutdown",
                self.boundary.name(),
                held
            );
        }
    }
}

/// Spawn a stage task that reports itself in the stream's running count
pub(crate) fn spawn_stage<F>(stream: &Arc<Stream>, boundary: Boundary, stage: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let stream = Arc::clone(stream);
    tokio::spawn(async move {
        stream.process_started(boundary);
        stage.await;
        stream.process_exited(boundary);
    })
}

/// Spawn every stage a stream needs
pub(crate) fn spawn_stages(stream: &Arc<Stream>) -> Vec<JoinHandle<()>> {
    let mut tasks = vec![
        spawn_stage(
            stream,
            Boundary::CollateToParse,
            collate_to_parse::run(Arc::clone(stream)),
        ),
        spawn_stage(
            stream,
            Boundary::ParseToDecode,
            parse_to_decode::run(Arc::clone(stream)),
        ),
    ];
    if stream.has_manifestor() {
        tasks.push(spawn_stage(
            stream,
            Boundary::DecodeToManifest,
            decode_to_manifest::run(Arc::clone(stream)),
        ));
        tasks.push(spawn_stage(
            stream,
            Boundary::PostManifest,
            post_manifest::run(Arc::clone(stream)),
        ));
    }
    tasks
}
