//! Microphone capture through the host audio backend.
//!
//! The device stream is owned by a dedicated thread because `cpal::Stream` is
//! not `Send`. The device callback downmixes into a lock-free ring buffer; the
//! worker loop drains it, resamples to 24kHz and slices fixed-size frames.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SizedSample};
use rtrb::{Consumer, Producer, RingBuffer};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::capture::{AudioCapture, CaptureConfig, CaptureError, CaptureResult, FrameSink};
use super::frame::{AudioFrame, CAPTURE_SAMPLE_RATE};
use super::resampler::{FrameResampler, downmix_to_mono};

/// Samples drained from the ring buffer per resampler call.
const DRAIN_CHUNK_SIZE: usize = 1024;

enum CaptureCmd {
    Stop,
}

struct CaptureWorker {
    cmd_tx: Sender<CaptureCmd>,
    handle: thread::JoinHandle<()>,
}

/// [`AudioCapture`] backed by the system's default (or named) input device.
pub struct CpalCapture {
    config: CaptureConfig,
    worker: Option<CaptureWorker>,
    overrun_count: Arc<AtomicUsize>,
}

impl CpalCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            worker: None,
            overrun_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Samples dropped because the worker fell behind the device callback.
    pub fn overrun_count(&self) -> usize {
        self.overrun_count.load(Ordering::Relaxed)
    }
}

impl Default for CpalCapture {
    fn default() -> Self {
        Self::new(CaptureConfig::default())
    }
}

#[async_trait]
impl AudioCapture for CpalCapture {
    async fn start(&mut self, sink: FrameSink) -> CaptureResult<()> {
        if self.worker.is_some() {
            return Err(CaptureError::Backend("capture already running".into()));
        }
        self.config.validate()?;

        if self.config.echo_cancellation || self.config.noise_suppression {
            warn!(
                "Echo cancellation ({}) / noise suppression ({}) requested; the host backend \
                 delivers the raw device signal",
                self.config.echo_cancellation, self.config.noise_suppression
            );
        }

        let (cmd_tx, cmd_rx) = std::sync::mpsc::channel();
        let (init_tx, init_rx) = oneshot::channel();
        let config = self.config.clone();
        let overrun_count = self.overrun_count.clone();

        let handle = thread::Builder::new()
            .name("waav-audio-capture".to_string())
            .spawn(move || run_capture_thread(config, cmd_rx, init_tx, sink, overrun_count))
            .map_err(|e| CaptureError::Backend(format!("failed to spawn capture thread: {e}")))?;

        // Registered before awaiting so a dropped start future is still torn
        // down by a later stop() or by Drop.
        self.worker = Some(CaptureWorker { cmd_tx, handle });

        match init_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(CaptureError::Backend(
                    "capture thread exited during initialization".into(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = worker.cmd_tx.send(CaptureCmd::Stop);
        if worker.handle.join().is_err() {
            error!("Audio capture thread panicked");
        }
        let overruns = self.overrun_count();
        if overruns > 0 {
            warn!("Audio capture dropped {} samples to ring buffer overruns", overruns);
        }
        debug!("Audio capture stopped");
    }

    fn is_capturing(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_capture_thread(
    config: CaptureConfig,
    cmd_rx: Receiver<CaptureCmd>,
    init_tx: oneshot::Sender<CaptureResult<()>>,
    sink: FrameSink,
    overrun_count: Arc<AtomicUsize>,
) {
    let device_lost = Arc::new(AtomicBool::new(false));
    let opened = open_input_stream(&config, overrun_count, device_lost.clone());
    let (stream, mut consumer, device_rate) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };

    let mut resampler =
        match FrameResampler::new(device_rate, CAPTURE_SAMPLE_RATE, config.frame_size) {
            Ok(r) => r,
            Err(e) => {
                let _ = init_tx.send(Err(e));
                return;
            }
        };

    if let Err(e) = stream.play() {
        let _ = init_tx.send(Err(classify_device_error(e)));
        return;
    }

    if init_tx.send(Ok(())).is_err() {
        // The starter went away before we finished acquiring the device
        return;
    }

    let mut sequence = 0u64;
    let mut emit = |samples: &[f32]| {
        let _ = sink.send(AudioFrame::new(sequence, samples.to_vec()));
        sequence += 1;
    };

    let mut stream = Some(stream);
    let mut stopping = false;

    loop {
        if !stopping {
            match cmd_rx.try_recv() {
                Ok(CaptureCmd::Stop) | Err(std::sync::mpsc::TryRecvError::Disconnected) => {
                    stopping = true;
                    stream.take();
                }
                Err(std::sync::mpsc::TryRecvError::Empty) => {}
            }
            if sink.is_closed() {
                debug!("Frame receiver dropped, stopping capture");
                stopping = true;
                stream.take();
            }
            if device_lost.load(Ordering::Relaxed) {
                // Exiting drops the sink, which ends the frame stream for the session
                warn!("Input device lost, ending capture");
                stopping = true;
                stream.take();
            }
        }

        let available = consumer.slots();
        if available >= DRAIN_CHUNK_SIZE || (stopping && available > 0) {
            drain(&mut consumer, available, &mut resampler, &mut emit);
        } else if stopping {
            break;
        } else {
            thread::sleep(Duration::from_millis(5));
        }
    }

    resampler.finish(&mut emit);
}

fn drain(
    consumer: &mut Consumer<f32>,
    available: usize,
    resampler: &mut FrameResampler,
    emit: &mut impl FnMut(&[f32]),
) {
    let Ok(chunk) = consumer.read_chunk(available.min(DRAIN_CHUNK_SIZE * 8)) else {
        return;
    };
    let (first, second) = chunk.as_slices();
    resampler.push(first, &mut *emit);
    if !second.is_empty() {
        resampler.push(second, &mut *emit);
    }
    chunk.commit_all();
}

fn open_input_stream(
    config: &CaptureConfig,
    overrun_count: Arc<AtomicUsize>,
    device_lost: Arc<AtomicBool>,
) -> CaptureResult<(cpal::Stream, Consumer<f32>, u32)> {
    let host = cpal::default_host();
    let device = select_device(&host, config.device_name.as_deref())?;
    let (stream_config, sample_format) = select_stream_config(&device)?;

    let device_rate = stream_config.sample_rate.0;
    let channels = stream_config.channels as usize;

    info!(
        "Audio capture: device={:?}, {} Hz, {} channel(s), {:?}",
        device.name().unwrap_or_default(),
        device_rate,
        channels,
        sample_format
    );

    let (producer, consumer) = RingBuffer::<f32>::new(device_rate as usize);
    let err_fn = stream_error_handler(device_lost);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(
            &device,
            &stream_config,
            producer,
            channels,
            err_fn,
            overrun_count,
        ),
        cpal::SampleFormat::I16 => build_stream::<i16>(
            &device,
            &stream_config,
            producer,
            channels,
            err_fn,
            overrun_count,
        ),
        cpal::SampleFormat::U16 => build_stream::<u16>(
            &device,
            &stream_config,
            producer,
            channels,
            err_fn,
            overrun_count,
        ),
        other => {
            return Err(CaptureError::DeviceUnavailable(format!(
                "unsupported sample format {other:?}"
            )));
        }
    }
    .map_err(classify_device_error)?;

    Ok((stream, consumer, device_rate))
}

fn select_device(host: &cpal::Host, name: Option<&str>) -> CaptureResult<cpal::Device> {
    match name {
        Some(name) => host
            .input_devices()
            .map_err(classify_device_error)?
            .find(|d| d.name().is_ok_and(|n| n == name))
            .ok_or_else(|| {
                CaptureError::DeviceUnavailable(format!("input device '{name}' not found"))
            }),
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".into())),
    }
}

/// Prefers a native mono 24kHz configuration; otherwise falls back to the
/// device default and relies on downmixing and resampling.
fn select_stream_config(
    device: &cpal::Device,
) -> CaptureResult<(cpal::StreamConfig, cpal::SampleFormat)> {
    let target = cpal::SampleRate(CAPTURE_SAMPLE_RATE);

    if let Ok(ranges) = device.supported_input_configs() {
        for range in ranges {
            if range.channels() == 1
                && range.min_sample_rate() <= target
                && range.max_sample_rate() >= target
            {
                let supported = range.with_sample_rate(target);
                return Ok((supported.config(), supported.sample_format()));
            }
        }
    }

    let default = device
        .default_input_config()
        .map_err(classify_device_error)?;
    Ok((default.config(), default.sample_format()))
}

/// Logs device stream errors and raises `device_lost` once the device is gone.
fn stream_error_handler(
    device_lost: Arc<AtomicBool>,
) -> impl Fn(cpal::StreamError) + Send + 'static {
    move |err| {
        error!("Audio stream error: {}", err);
        if matches!(err, cpal::StreamError::DeviceNotAvailable) {
            device_lost.store(true, Ordering::Relaxed);
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: Producer<f32>,
    channels: usize,
    err_fn: impl Fn(cpal::StreamError) + Send + 'static,
    overrun_count: Arc<AtomicUsize>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: Sample + SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let has_logged = Arc::new(AtomicBool::new(false));

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if !has_logged.swap(true, Ordering::Relaxed) {
                debug!("Audio callback: first chunk of {} samples", data.len());
            }

            let samples = data.iter().map(|s| s.to_sample::<f32>());
            downmix_to_mono(samples, channels, |sample| {
                if producer.push(sample).is_err() {
                    overrun_count.fetch_add(1, Ordering::Relaxed);
                }
            });
        },
        err_fn,
        None,
    )
}

/// Maps backend errors onto capture errors. Backends report permission
/// failures only through their message text.
fn classify_device_error(err: impl std::fmt::Display) -> CaptureError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        CaptureError::PermissionDenied(message)
    } else {
        CaptureError::DeviceUnavailable(message)
    }
}
