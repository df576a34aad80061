//! V4L2 camera platform for local device nodes (e.g. /dev/video0).
//!
//! Frames are captured into memory, normalized to RGB24 and handed to the
//! session output. Nothing is written to disk.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::normalize::{FrameLayout, PixelEncoding};
use super::platform::{
    AuthorizationStatus, CameraDevice, CameraPlatform, CaptureFormat, DeviceInfo,
};
use super::relay::FrameSink;
use crate::frame::Frame;

/// Enumerates and opens V4L2 nodes.
///
/// Linux has no interactive camera prompt: access is governed by device node
/// permissions, which surface as `open` failures.
#[derive(Debug, Default)]
pub struct V4l2Platform;

impl V4l2Platform {
    pub fn new() -> Self {
        Self
    }
}

impl CameraPlatform for V4l2Platform {
    fn authorization_status(&self) -> AuthorizationStatus {
        AuthorizationStatus::Authorized
    }

    fn request_access(&mut self) -> bool {
        true
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        v4l::context::enum_devices()
            .into_iter()
            .map(|node| {
                let id = node.path().display().to_string();
                DeviceInfo {
                    name: node.name().unwrap_or_else(|| id.clone()),
                    id,
                }
            })
            .collect()
    }

    fn open(&mut self, device_id: &str, format: &CaptureFormat) -> Result<Box<dyn CameraDevice>> {
        Ok(Box::new(V4l2Camera::open(device_id, format)?))
    }
}

#[self_referencing]
struct StreamState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct CaptureThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Result<v4l::Device>>,
}

pub struct V4l2Camera {
    info: DeviceInfo,
    device: Option<v4l::Device>,
    layout: FrameLayout,
    sink: Option<FrameSink>,
    capture: Option<CaptureThread>,
}

impl V4l2Camera {
    fn open(device_id: &str, requested: &CaptureFormat) -> Result<Self> {
        use v4l::video::Capture;

        let device = v4l::Device::with_path(Path::new(device_id))
            .with_context(|| format!("open v4l2 device {}", device_id))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = requested.width;
        format.height = requested.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Camera: failed to set format on {}: {}", device_id, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let encoding = PixelEncoding::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!("{} negotiated unsupported pixel format {}", device_id, format.fourcc)
        })?;
        let layout = FrameLayout::new(encoding, format.width, format.height, format.stride)
            .with_context(|| format!("{} negotiated an unusable layout", device_id))?;

        if requested.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(requested.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Camera: failed to set fps on {}: {}", device_id, err);
            }
        }

        log::info!(
            "V4l2Camera: opened {} ({}x{} {:?})",
            device_id,
            layout.width,
            layout.height,
            layout.encoding
        );
        Ok(Self {
            info: DeviceInfo {
                id: device_id.to_string(),
                name: device_id.to_string(),
            },
            device: Some(device),
            layout,
            sink: None,
            capture: None,
        })
    }
}

impl CameraDevice for V4l2Camera {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn bind_output(&mut self, sink: FrameSink) -> Result<()> {
        self.sink = Some(sink);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::io::traits::CaptureStream;

        if self.is_running() {
            return Ok(());
        }
        // Reclaim the device from a capture thread that ended on its own.
        self.stop();
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| anyhow!("{} has no output bound", self.info.id))?;
        let device = self
            .device
            .take()
            .ok_or_else(|| anyhow!("{} was lost by a failed capture thread", self.info.id))?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let layout = self.layout;
        let id = self.info.id.clone();

        let handle = std::thread::Builder::new()
            .name("camera-capture".into())
            .spawn(move || -> Result<v4l::Device> {
                let mut state = StreamStateTryBuilder {
                    device,
                    stream_builder: |device| {
                        v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                            .map_err(|err| {
                                anyhow::Error::new(err).context("create v4l2 buffer stream")
                            })
                    },
                }
                .try_build()?;

                let mut sequence = 0u64;
                while !thread_stop.load(Ordering::Acquire) {
                    let captured = state.with_mut(|fields| {
                        let (buf, _meta) = fields.stream.next().context("capture v4l2 frame")?;
                        layout.decode(buf)
                    });
                    match captured {
                        Ok(image) => {
                            sequence += 1;
                            sink.deliver(Frame::new(image, sequence));
                        }
                        Err(err) => {
                            log::warn!("V4l2Camera: {}: capture ended: {:#}", id, err);
                            break;
                        }
                    }
                }
                Ok(state.into_heads().device)
            })
            .context("spawn camera capture thread")?;

        self.capture = Some(CaptureThread { stop, handle });
        Ok(())
    }

    fn stop(&mut self) {
        let Some(capture) = self.capture.take() else {
            return;
        };
        capture.stop.store(true, Ordering::Release);
        match capture.handle.join() {
            Ok(Ok(device)) => self.device = Some(device),
            Ok(Err(err)) => log::error!("V4l2Camera: {} capture failed: {:#}", self.info.id, err),
            Err(_) => log::error!("V4l2Camera: {} capture thread panicked", self.info.id),
        }
    }

    fn is_running(&self) -> bool {
        self.capture
            .as_ref()
            .is_some_and(|capture| !capture.handle.is_finished())
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        self.stop();
    }
}
