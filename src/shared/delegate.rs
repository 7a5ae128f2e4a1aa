// This is free and unencumbered software released into the public domain.

//! Handler traits, one entry point per event kind. Platforms invoke them on
//! the queue they were registered with.

use super::{DepthFrame, DropReason, OutputId, SynchronizedDataCollection, VideoFrame};

pub trait VideoDataDelegate: Send + Sync {
    fn did_output_video_frame(&self, output: OutputId, frame: &VideoFrame);

    fn did_drop_video_frame(&self, output: OutputId, reason: DropReason) {
        let _ = (output, reason);
    }
}

pub trait DepthDataDelegate: Send + Sync {
    fn did_output_depth_data(&self, output: OutputId, depth: &DepthFrame);

    fn did_drop_depth_data(&self, output: OutputId, reason: DropReason) {
        let _ = (output, reason);
    }
}

pub trait SynchronizedDataDelegate: Send + Sync {
    fn did_output_synchronized_data(&self, collection: &SynchronizedDataCollection);
}

/// Per-output delegate that only traces what it receives.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingDataDelegate;

impl VideoDataDelegate for TracingDataDelegate {
    fn did_output_video_frame(&self, output: OutputId, frame: &VideoFrame) {
        trace!(%output, width = frame.width, height = frame.height, ts = %frame.timestamp, "video frame");
    }

    fn did_drop_video_frame(&self, output: OutputId, reason: DropReason) {
        trace!(%output, %reason, "video frame dropped");
    }
}

impl DepthDataDelegate for TracingDataDelegate {
    fn did_output_depth_data(&self, output: OutputId, depth: &DepthFrame) {
        trace!(%output, width = depth.width, height = depth.height, ts = %depth.timestamp, "depth data");
    }

    fn did_drop_depth_data(&self, output: OutputId, reason: DropReason) {
        trace!(%output, %reason, "depth data dropped");
    }
}
