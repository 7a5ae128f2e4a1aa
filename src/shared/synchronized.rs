// This is free and unencumbered software released into the public domain.

use super::{DepthFrame, MediaTime, SerialQueue, SynchronizedDataDelegate, VideoFrame};
use derive_more::Display;
use std::sync::Arc;

/// Platform-assigned identity of an output within one platform instance.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("#{_0}")]
pub struct OutputId(pub u32);

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum DropReason {
    #[display("late data")]
    LateData,
    #[display("out of buffers")]
    OutOfBuffers,
    #[display("discontinuity")]
    Discontinuity,
}

#[derive(Clone, Debug)]
pub struct SynchronizedSampleBufferData {
    pub timestamp: MediaTime,
    pub sample_buffer: Option<VideoFrame>,
    pub dropped_reason: Option<DropReason>,
}

impl SynchronizedSampleBufferData {
    pub fn delivered(frame: VideoFrame) -> Self {
        Self {
            timestamp: frame.timestamp,
            sample_buffer: Some(frame),
            dropped_reason: None,
        }
    }

    pub fn dropped(timestamp: MediaTime, reason: DropReason) -> Self {
        Self {
            timestamp,
            sample_buffer: None,
            dropped_reason: Some(reason),
        }
    }

    pub fn was_dropped(&self) -> bool {
        self.sample_buffer.is_none()
    }
}

#[derive(Clone, Debug)]
pub struct SynchronizedDepthData {
    pub timestamp: MediaTime,
    pub depth_data: Option<DepthFrame>,
    pub dropped_reason: Option<DropReason>,
}

impl SynchronizedDepthData {
    pub fn delivered(frame: DepthFrame) -> Self {
        Self {
            timestamp: frame.timestamp,
            depth_data: Some(frame),
            dropped_reason: None,
        }
    }

    pub fn dropped(timestamp: MediaTime, reason: DropReason) -> Self {
        Self {
            timestamp,
            depth_data: None,
            dropped_reason: Some(reason),
        }
    }

    pub fn was_dropped(&self) -> bool {
        self.depth_data.is_none()
    }
}

/// One output's slot in a synchronized bundle.
#[derive(Clone, Debug)]
pub enum SynchronizedData {
    SampleBuffer(SynchronizedSampleBufferData),
    Depth(SynchronizedDepthData),
}

impl SynchronizedData {
    pub fn timestamp(&self) -> MediaTime {
        match self {
            Self::SampleBuffer(d) => d.timestamp,
            Self::Depth(d) => d.timestamp,
        }
    }

    pub fn was_dropped(&self) -> bool {
        match self {
            Self::SampleBuffer(d) => d.was_dropped(),
            Self::Depth(d) => d.was_dropped(),
        }
    }

    pub fn dropped_reason(&self) -> Option<DropReason> {
        match self {
            Self::SampleBuffer(d) => d.dropped_reason,
            Self::Depth(d) => d.dropped_reason,
        }
    }
}

/// The per-output results a synchronizer delivers for one time instant.
///
/// Handed to delegates by reference; it lives only for one callback.
#[derive(Clone, Debug, Default)]
pub struct SynchronizedDataCollection {
    entries: Vec<(OutputId, SynchronizedData)>,
}

impl SynchronizedDataCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any earlier entry for the same output.
    pub fn insert(&mut self, output: OutputId, data: SynchronizedData) {
        match self.entries.iter_mut().find(|(id, _)| *id == output) {
            Some(slot) => slot.1 = data,
            None => self.entries.push((output, data)),
        }
    }

    pub fn with(mut self, output: OutputId, data: SynchronizedData) -> Self {
        self.insert(output, data);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, output: OutputId) -> Option<&SynchronizedData> {
        self.entries
            .iter()
            .find(|(id, _)| *id == output)
            .map(|(_, data)| data)
    }

    pub fn outputs(&self) -> impl Iterator<Item = OutputId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (OutputId, &SynchronizedData)> + '_ {
        self.entries.iter().map(|(id, data)| (*id, data))
    }
}

/// The platform component that aligns several outputs and delivers one
/// [`SynchronizedDataCollection`] per aligned instant.
pub trait DataOutputSynchronizer: Send {
    fn data_outputs(&self) -> Vec<OutputId>;

    /// Delegate callbacks run on `queue`.
    fn set_delegate(
        &mut self,
        delegate: Arc<dyn SynchronizedDataDelegate>,
        queue: Arc<SerialQueue>,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth(ts: i64) -> SynchronizedData {
        SynchronizedData::Depth(SynchronizedDepthData::delivered(DepthFrame::from_samples(
            &[1.0],
            1,
            1,
            MediaTime::new(ts, 30),
        )))
    }

    #[test]
    fn insert_replaces_existing_slot() {
        let mut c = SynchronizedDataCollection::new();
        c.insert(OutputId(2), depth(1));
        c.insert(OutputId(2), depth(2));
        assert_eq!(c.len(), 1);
        assert_eq!(
            c.get(OutputId(2)).map(|d| d.timestamp()),
            Some(MediaTime::new(2, 30))
        );
    }

    #[test]
    fn dropped_slots_carry_a_reason() {
        let slot = SynchronizedData::SampleBuffer(SynchronizedSampleBufferData::dropped(
            MediaTime::new(3, 30),
            DropReason::OutOfBuffers,
        ));
        assert!(slot.was_dropped());
        assert_eq!(slot.dropped_reason(), Some(DropReason::OutOfBuffers));
        assert!(!depth(0).was_dropped());
    }
}
