use anyhow::{Result, anyhow};
use image::{DynamicImage, EncodableLayout, RgbImage, RgbaImage, imageops};
use tracing::{debug, error, info, warn};

use std::io::Write;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nokhwa::{
    Camera, nokhwa_initialize,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
        Resolution as CameraResolution,
    },
};

use crate::config::CameraRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// A decoded frame and its presentation time from the start of the stream.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub media_time: Duration,
    pub image: RgbImage,
}

pub trait VideoSource {
    /// Opens the stream, returning its frame size.
    fn start(&mut self, request: &CameraRequest) -> Result<Resolution>;
    /// Pulls newly delivered frames, keeping only the most recent.
    fn poll(&mut self);
    fn latest(&self) -> Option<&VideoFrame>;
    fn stop(&mut self);
}

/// Webcam captured on a dedicated thread. The camera handle never leaves
/// that thread; frames cross over a small bounded channel.
#[derive(Default)]
pub struct Webcam {
    frames: Option<flume::Receiver<VideoFrame>>,
    worker: Option<JoinHandle<()>>,
    latest: Option<VideoFrame>,
}

impl VideoSource for Webcam {
    fn start(&mut self, request: &CameraRequest) -> Result<Resolution> {
        self.stop();

        let (ready_tx, ready_rx) = flume::bounded::<Result<Resolution>>(1);
        let (frame_tx, frame_rx) = flume::bounded::<VideoFrame>(2);
        let request = request.clone();
        let worker = thread::Builder::new()
            .name("webcam".into())
            .spawn(move || capture(request, ready_tx, frame_tx))?;

        let resolution = ready_rx
            .recv()
            .map_err(|_| anyhow!("Camera thread exited before opening the stream"))??;
        info!(
            "Camera streaming at {}x{}",
            resolution.width, resolution.height
        );

        self.frames = Some(frame_rx);
        self.worker = Some(worker);
        Ok(resolution)
    }

    fn poll(&mut self) {
        if let Some(frames) = &self.frames {
            if let Some(frame) = frames.try_iter().last() {
                self.latest = Some(frame);
            }
        }
    }

    fn latest(&self) -> Option<&VideoFrame> {
        self.latest.as_ref()
    }

    fn stop(&mut self) {
        // dropping the receiver ends the capture loop
        self.frames = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Camera thread panicked");
            }
        }
    }
}

impl Drop for Webcam {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_camera(request: &CameraRequest) -> Result<Camera> {
    nokhwa_initialize(|granted| {
        debug!("Camera access granted: {}", granted);
    });

    let cameras = query(ApiBackend::Auto)?;
    cameras
        .iter()
        .for_each(|cam| debug!("Found camera: {:?}", cam));

    let index = match request.index {
        Some(i) => CameraIndex::Index(i),
        None => cameras
            .last()
            .ok_or_else(|| anyhow!("No camera found"))?
            .index()
            .clone(),
    };

    let ideal = CameraFormat::new(
        CameraResolution::new(request.ideal_width, request.ideal_height),
        FrameFormat::MJPEG,
        request.fps,
    );
    let mut camera = Camera::new(
        index,
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(ideal)),
    )?;

    camera.open_stream()?;
    Ok(camera)
}

fn capture(
    request: CameraRequest,
    ready: flume::Sender<Result<Resolution>>,
    frames: flume::Sender<VideoFrame>,
) {
    let mut camera = match open_camera(&request) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let resolution = camera.resolution();
    let _ = ready.send(Ok(Resolution {
        width: resolution.width(),
        height: resolution.height(),
    }));

    let start = Instant::now();
    loop {
        let image = match camera.frame().and_then(|f| f.decode_image::<RgbFormat>()) {
            Ok(image) => image,
            Err(e) => {
                error!("Failed to pull frame from webcam: {e:?}");
                break;
            }
        };

        let frame = VideoFrame {
            media_time: start.elapsed(),
            image,
        };
        if frames.send(frame).is_err() {
            debug!("Frame receiver dropped, stopping capture");
            break;
        }
    }

    if let Err(e) = camera.stop_stream() {
        warn!("Failed to stop camera stream: {e:?}");
    }
}

/// The video frame with the landmark overlay blended on top.
pub fn composite(frame: &RgbImage, overlay: &RgbaImage) -> RgbaImage {
    let mut out = DynamicImage::ImageRgb8(frame.clone()).into_rgba8();
    imageops::overlay(&mut out, overlay, 0, 0);
    out
}

pub struct OutputVideoStream {
    output_proc: std::process::Child,
    resolution: Resolution,
}

impl Drop for OutputVideoStream {
    fn drop(&mut self) {
        match self.output_proc.kill() {
            Err(e) => error!("Failed to stop output process {e:?}"),
            Ok(_) => {
                // reap it, the stream is reopened on every size change
                if let Err(e) = self.output_proc.wait() {
                    error!("Failed to wait on output process {e:?}");
                }
            }
        }
    }
}

impl OutputVideoStream {
    /// Preview window via ffplay, or a v4l2 loopback `device` via ffmpeg.
    pub fn new(resolution: Resolution, device: Option<&str>) -> Result<Self> {
        let size = format!("{}x{}", resolution.width, resolution.height);
        let command = match device {
            Some(d) => {
                let mut command = Command::new("ffmpeg");
                command.args([
                    "-f",
                    "rawvideo",
                    "-pix_fmt",
                    "rgba",
                    "-s",
                    &size,
                    "-i",
                    "-",
                    "-map",
                    "0:v",
                    "-preset",
                    "fast",
                    "-vf",
                    "format=yuv420p",
                    "-f",
                    "v4l2",
                    &format!("/dev/{d}"),
                ]);
                command
            }
            None => {
                let mut command = Command::new("ffplay");
                command.args([
                    "-window_title",
                    "posemo",
                    "-f",
                    "rawvideo",
                    "-pixel_format",
                    "rgba",
                    "-video_size",
                    &size,
                    "-fflags",
                    "nobuffer",
                    "-flags",
                    "low_delay",
                    "-",
                ]);
                command
            }
        };
        Self::spawn(command, resolution)
    }

    fn spawn(mut command: Command, resolution: Resolution) -> Result<Self> {
        let output_proc = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self {
            output_proc,
            resolution,
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn write_frame(&mut self, img: &RgbaImage) -> Result<()> {
        if let Some(stdin) = self.output_proc.stdin.as_mut() {
            stdin.write_all(img.as_bytes())?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba};

    #[test]
    fn test_composite_keeps_video_under_transparent_pixels() {
        let frame = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
        let mut overlay = RgbaImage::new(4, 4);
        overlay.put_pixel(1, 2, Rgba([255, 0, 0, 255]));

        let out = composite(&frame, &overlay);
        assert_eq!(*out.get_pixel(0, 0), Rgba([10, 20, 30, 255]));
        assert_eq!(*out.get_pixel(1, 2), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_webcam_without_stream_has_no_frames() {
        let mut cam = Webcam::default();
        cam.poll();
        assert!(cam.latest().is_none());
        cam.stop();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_dropping_output_reaps_process() {
        let resolution = Resolution {
            width: 2,
            height: 2,
        };
        let mut stream = OutputVideoStream::spawn(Command::new("cat"), resolution).unwrap();
        stream.write_frame(&RgbaImage::new(2, 2)).unwrap();
        let pid = stream.output_proc.id();
        drop(stream);

        // a zombie keeps its /proc entry until reaped
        assert!(!std::path::Path::new(&format!("/proc/{pid}")).exists());
    }
}
