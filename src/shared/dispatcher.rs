// This is free and unencumbered software released into the public domain.

use crate::shared::{
    DropReason, MediaTime, OutputId, SynchronizedData, SynchronizedDataCollection,
    SynchronizedDataDelegate,
};
use derive_more::Display;
use serde_json::{Value, json};
use std::sync::{Arc, RwLock};

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum DataKind {
    #[display("depth")]
    Depth,
    #[display("buffer")]
    Buffer,
}

/// Classification of one output's slot in a bundle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub output: OutputId,
    pub kind: DataKind,
    pub timestamp: MediaTime,
    pub dropped: bool,
    pub dropped_reason: Option<DropReason>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BundleReport {
    pub frames: Vec<FrameReport>,
}

impl BundleReport {
    pub fn count(&self) -> usize {
        self.frames.len()
    }

    pub fn dropped(&self) -> usize {
        self.frames.iter().filter(|f| f.dropped).count()
    }

    pub fn frame(&self, output: OutputId) -> Option<&FrameReport> {
        self.frames.iter().find(|f| f.output == output)
    }

    pub fn to_json(&self) -> Value {
        let frames: Vec<Value> = self
            .frames
            .iter()
            .map(|f| {
                json!({
                    "output": f.output.0,
                    "kind": f.kind.to_string(),
                    "timestamp": f.timestamp.as_secs_f64(),
                    "dropped": f.dropped,
                    "reason": f.dropped_reason.map(|r| r.to_string()),
                })
            })
            .collect();
        json!({ "count": self.count(), "frames": frames })
    }
}

pub type BundleSink = Arc<dyn Fn(&BundleReport) + Send + Sync + 'static>;

/// Classifies every synchronized bundle and hands the result to the
/// registered sinks.
///
/// Keeps no per-bundle state; serial delivery is the platform's job.
#[derive(Default)]
pub struct SynchronizedOutputDispatcher {
    sinks: RwLock<Vec<BundleSink>>,
}

impl SynchronizedOutputDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(self, sink: BundleSink) -> Self {
        self.add_sink(sink);
        self
    }

    pub fn add_sink(&self, sink: BundleSink) {
        if let Ok(mut g) = self.sinks.write() {
            g.push(sink);
        }
    }

    /// One report per output present in `collection`, in collection order.
    pub fn classify(collection: &SynchronizedDataCollection) -> BundleReport {
        let frames = collection
            .iter()
            .map(|(output, data)| {
                let kind = match data {
                    SynchronizedData::Depth(_) => DataKind::Depth,
                    SynchronizedData::SampleBuffer(_) => DataKind::Buffer,
                };
                FrameReport {
                    output,
                    kind,
                    timestamp: data.timestamp(),
                    dropped: data.was_dropped(),
                    dropped_reason: data.dropped_reason(),
                }
            })
            .collect();
        BundleReport { frames }
    }
}

impl SynchronizedDataDelegate for SynchronizedOutputDispatcher {
    fn did_output_synchronized_data(&self, collection: &SynchronizedDataCollection) {
        let report = Self::classify(collection);

        for frame in &report.frames {
            match frame.kind {
                DataKind::Depth => {
                    debug!(output = %frame.output, ts = %frame.timestamp, dropped = frame.dropped, "depth data")
                },
                DataKind::Buffer => {
                    debug!(output = %frame.output, ts = %frame.timestamp, dropped = frame.dropped, "sample buffer")
                },
            }
        }
        debug!(count = report.count(), "synchronized bundle");

        if let Ok(list) = self.sinks.read() {
            for s in list.iter() {
                (s)(&report);
            }
        }
    }
}

impl core::fmt::Debug for SynchronizedOutputDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sinks = self.sinks.read().map(|g| g.len()).unwrap_or(0);
        f.debug_struct("SynchronizedOutputDispatcher")
            .field("sinks", &sinks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{
        DepthFrame, SynchronizedDepthData, SynchronizedSampleBufferData, VideoFrame,
    };
    use std::sync::Mutex;

    const VIDEO: OutputId = OutputId(1);
    const DEPTH: OutputId = OutputId(3);

    fn ts() -> MediaTime {
        MediaTime::new(42, 30)
    }

    fn video_slot() -> SynchronizedData {
        SynchronizedData::SampleBuffer(SynchronizedSampleBufferData::delivered(
            VideoFrame::new_bgra(vec![0u8; 16], 2, 2, 8, ts()),
        ))
    }

    fn dropped_depth_slot() -> SynchronizedData {
        SynchronizedData::Depth(SynchronizedDepthData::dropped(ts(), DropReason::LateData))
    }

    #[test]
    fn one_report_per_present_output() {
        let bundle = SynchronizedDataCollection::new()
            .with(VIDEO, video_slot())
            .with(DEPTH, dropped_depth_slot());

        let report = SynchronizedOutputDispatcher::classify(&bundle);
        assert_eq!(report.count(), 2);
        assert_eq!(report.dropped(), 1);

        let video = report.frame(VIDEO).expect("video report");
        assert_eq!(video.kind, DataKind::Buffer);
        assert!(!video.dropped);

        let depth = report.frame(DEPTH).expect("depth report");
        assert_eq!(depth.kind, DataKind::Depth);
        assert!(depth.dropped);
        assert_eq!(depth.dropped_reason, Some(DropReason::LateData));
    }

    #[test]
    fn absent_output_yields_no_report() {
        let bundle = SynchronizedDataCollection::new().with(VIDEO, video_slot());
        let report = SynchronizedOutputDispatcher::classify(&bundle);
        assert_eq!(report.count(), 1);
        assert!(report.frame(DEPTH).is_none());

        let empty = SynchronizedOutputDispatcher::classify(&SynchronizedDataCollection::new());
        assert_eq!(empty, BundleReport::default());
    }

    #[test]
    fn delegate_forwards_to_every_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let seen3 = Arc::clone(&seen);

        let dispatcher = SynchronizedOutputDispatcher::new()
            .with_sink(Arc::new(move |r: &BundleReport| seen2.lock().unwrap().push(r.count())));
        dispatcher.add_sink(Arc::new(move |r: &BundleReport| {
            seen3.lock().unwrap().push(r.dropped())
        }));

        let depth = DepthFrame::from_samples(&[1.0, 2.0], 2, 1, ts());
        let bundle = SynchronizedDataCollection::new()
            .with(VIDEO, video_slot())
            .with(DEPTH, SynchronizedData::Depth(SynchronizedDepthData::delivered(depth)));
        dispatcher.did_output_synchronized_data(&bundle);

        assert_eq!(*seen.lock().unwrap(), vec![2, 0]);
    }

    #[test]
    fn json_report_shape() {
        let bundle = SynchronizedDataCollection::new().with(DEPTH, dropped_depth_slot());
        let json = SynchronizedOutputDispatcher::classify(&bundle).to_json();
        assert_eq!(json["count"], 1);
        assert_eq!(json["frames"][0]["kind"], "depth");
        assert_eq!(json["frames"][0]["dropped"], true);
        assert_eq!(json["frames"][0]["reason"], "late data");
    }
}
