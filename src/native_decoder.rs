// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Native side of the boundary.
//!
//! [`NativeDecoder`] owns a worker thread driving a [`DecoderBackend`], and reports every frame
//! the backend completes through its [`CallbackHandle`]. It binds itself to the bridge right after
//! construction and retires its identity only once the worker has been joined, so no completion
//! can race with its destruction.

use nix::errno::Errno;
use nix::sys::eventfd::EfdFlags;
use nix::sys::eventfd::EventFd;

use thiserror::Error;

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use crate::backend::DecodedPicture;
use crate::backend::DecoderBackend;
use crate::backend::EncodedUnit;
use crate::bridge::lock;
use crate::bridge::BridgeError;
use crate::bridge::CallbackHandle;
use crate::bridge::CompletionBridge;
use crate::bridge::DecodeCompletionSink;
use crate::bridge::DecoderId;
use crate::settings::DecoderSettings;
use crate::status::VideoCodecStatus;
use crate::video_frame::VideoFrame;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum NativeDecoderState {
    Running,
    Stopped,
    // stop() must be called before start() can be called again.
    Error,
}

#[derive(Debug, Error)]
pub enum NativeDecoderError {
    #[error("failed to create EventFd for awaiting job event: {0}")]
    AwaitingJobEventFd(Errno),
}

enum Job {
    Decode(EncodedUnit),
    Drain,
}

type ErrorCallback = Arc<Mutex<dyn FnMut(VideoCodecStatus) + Send + 'static>>;

struct DecoderWorker<B: DecoderBackend> {
    backend: B,
    callback: Arc<CallbackHandle<VideoFrame>>,
    awaiting_job_event: Arc<EventFd>,
    error_cb: ErrorCallback,
    work_queue: Arc<Mutex<VecDeque<Job>>>,
    state: Arc<Mutex<NativeDecoderState>>,
}

impl<B: DecoderBackend> DecoderWorker<B> {
    fn is_running(&self) -> bool {
        *lock(&self.state) == NativeDecoderState::Running
    }

    fn fail(&self, status: VideoCodecStatus) {
        *lock(&self.state) = NativeDecoderState::Error;
        (*lock(&self.error_cb))(status);
    }

    // Returns false if the frame could not be handed over, in which case the decoder is now in
    // error state.
    fn deliver(&self, picture: DecodedPicture, decode_time: Option<Duration>) -> bool {
        let decode_time_ms =
            decode_time.map(|t| u32::try_from(t.as_millis()).unwrap_or(u32::MAX));

        match self.callback.on_decoded_frame(picture.frame, decode_time_ms, picture.qp) {
            Ok(()) => true,
            Err(err) => {
                log::error!("decoder {}: {err}", self.callback.id());
                self.fail(VideoCodecStatus::from(&err));
                false
            }
        }
    }

    fn process_job(&mut self, job: Job) -> bool {
        match job {
            Job::Decode(unit) => {
                let start = Instant::now();
                match self.backend.decode(&unit) {
                    Ok(Some(picture)) => self.deliver(picture, Some(start.elapsed())),
                    Ok(None) => true,
                    Err(err) => {
                        // A failed decode produces no frame, only an error report.
                        log::warn!(
                            "decoder {}: failed to decode unit {}: {err:#}",
                            self.callback.id(),
                            unit.timestamp_ns
                        );
                        (*lock(&self.error_cb))(VideoCodecStatus::Error);
                        true
                    }
                }
            }
            Job::Drain => match self.backend.flush() {
                // Frames held by the backend were not timed individually.
                Ok(pictures) => pictures.into_iter().all(|picture| self.deliver(picture, None)),
                Err(err) => {
                    log::error!("decoder {}: failed to drain: {err:#}", self.callback.id());
                    self.fail(VideoCodecStatus::Error);
                    false
                }
            },
        }
    }

    fn process_loop(&mut self) {
        while self.is_running() {
            if let Err(err) = self.awaiting_job_event.read() {
                log::error!("decoder {}: failed to wait for work: {err}", self.callback.id());
                self.fail(VideoCodecStatus::Error);
                break;
            }

            while self.is_running() {
                let job = lock(&self.work_queue).pop_front();
                match job {
                    Some(job) => {
                        if !self.process_job(job) {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
        log::debug!("decoder {} worker exiting", self.callback.id());
    }
}

/// Decoder running `B` on a worker thread and reporting its frames through a bridge.
///
/// Note that we do not guarantee thread safety in NativeDecoder itself; only the completion path
/// runs on the worker.
pub struct NativeDecoder<B: DecoderBackend> {
    settings: DecoderSettings,
    options: B::Options,
    callback: Arc<CallbackHandle<VideoFrame>>,
    awaiting_job_event: Arc<EventFd>,
    error_cb: ErrorCallback,
    work_queue: Arc<Mutex<VecDeque<Job>>>,
    state: Arc<Mutex<NativeDecoderState>>,
    worker_thread: Option<JoinHandle<()>>,
    released: bool,
    _phantom: PhantomData<fn() -> B>,
}

impl<B: DecoderBackend> NativeDecoder<B> {
    /// Creates a decoder and binds it to `sink` through `bridge`.
    ///
    /// `settings` are consumed by the backend when the decoder is started. `error_cb` receives
    /// failures that do not produce a frame, and is called on the worker thread.
    pub fn new(
        bridge: &CompletionBridge<VideoFrame>,
        sink: impl DecodeCompletionSink<VideoFrame> + 'static,
        settings: DecoderSettings,
        options: B::Options,
        error_cb: impl FnMut(VideoCodecStatus) + Send + 'static,
    ) -> Result<Self, NativeDecoderError> {
        let awaiting_job_event = EventFd::from_flags(EfdFlags::EFD_SEMAPHORE)
            .map_err(NativeDecoderError::AwaitingJobEventFd)?;
        let callback = bridge.create_callback(sink);
        log::debug!("created native decoder {} with {:?}", callback.id(), settings);

        Ok(Self {
            settings,
            options,
            callback: Arc::new(callback),
            awaiting_job_event: Arc::new(awaiting_job_event),
            error_cb: Arc::new(Mutex::new(error_cb)),
            work_queue: Arc::new(Mutex::new(VecDeque::new())),
            state: Arc::new(Mutex::new(NativeDecoderState::Stopped)),
            worker_thread: None,
            released: false,
            _phantom: PhantomData,
        })
    }

    pub fn id(&self) -> DecoderId {
        self.callback.id()
    }

    pub fn state(&self) -> NativeDecoderState {
        *lock(&self.state)
    }

    fn wake_worker(&self) -> VideoCodecStatus {
        match self.awaiting_job_event.write(1) {
            Ok(_) => VideoCodecStatus::Ok,
            Err(err) => {
                log::error!("decoder {}: failed to signal worker: {err}", self.id());
                VideoCodecStatus::Error
            }
        }
    }

    /// Starts the worker. The backend is created and initialized on the worker thread; a failure
    /// there is reported through the error callback and leaves the decoder in error state.
    pub fn start(&mut self) -> VideoCodecStatus {
        if self.released {
            return VideoCodecStatus::Uninitialized;
        }
        {
            let mut state = lock(&self.state);
            if *state != NativeDecoderState::Stopped {
                return VideoCodecStatus::Error;
            }
            *state = NativeDecoderState::Running;
        }

        let settings = self.settings;
        let options = self.options.clone();
        let callback = Arc::clone(&self.callback);
        let awaiting_job_event = Arc::clone(&self.awaiting_job_event);
        let error_cb = Arc::clone(&self.error_cb);
        let work_queue = Arc::clone(&self.work_queue);
        let state = Arc::clone(&self.state);

        let spawned = thread::Builder::new()
            .name(format!("decoder-{}", self.id()))
            .spawn(move || {
                let backend = B::new(options).and_then(|mut backend| {
                    backend.initialize(&settings)?;
                    Ok(backend)
                });
                match backend {
                    Ok(backend) => DecoderWorker {
                        backend,
                        callback,
                        awaiting_job_event,
                        error_cb,
                        work_queue,
                        state,
                    }
                    .process_loop(),
                    Err(err) => {
                        log::error!("decoder {}: failed to initialize: {err:#}", callback.id());
                        let status = err
                            .downcast_ref::<BridgeError>()
                            .map(VideoCodecStatus::from)
                            .unwrap_or(VideoCodecStatus::Error);
                        *lock(&state) = NativeDecoderState::Error;
                        (*lock(&error_cb))(status);
                    }
                }
            });

        match spawned {
            Ok(worker_thread) => {
                self.worker_thread = Some(worker_thread);
                VideoCodecStatus::Ok
            }
            Err(err) => {
                log::error!("decoder {}: failed to spawn worker: {err}", self.id());
                *lock(&self.state) = NativeDecoderState::Error;
                VideoCodecStatus::Error
            }
        }
    }

    /// Stops the worker and abandons any work it has not picked up yet.
    pub fn stop(&mut self) -> VideoCodecStatus {
        *lock(&self.state) = NativeDecoderState::Stopped;
        let status = self.wake_worker();

        if let Some(worker_thread) = self.worker_thread.take() {
            if worker_thread.join().is_err() {
                log::error!("decoder {} worker panicked", self.id());
            }
        }

        // A wakeup left over from here only costs the next worker an empty pass over the queue.
        lock(&self.work_queue).clear();

        status
    }

    fn push_jobs(&mut self, jobs: impl IntoIterator<Item = Job>) -> VideoCodecStatus {
        if self.state() != NativeDecoderState::Running {
            return VideoCodecStatus::Uninitialized;
        }

        lock(&self.work_queue).extend(jobs);
        self.wake_worker()
    }

    /// Queues units for decoding. Only valid while running.
    pub fn queue(&mut self, units: impl IntoIterator<Item = EncodedUnit>) -> VideoCodecStatus {
        self.push_jobs(units.into_iter().map(Job::Decode))
    }

    /// Requests the backend to output every frame it is still holding, once the queued units are
    /// processed.
    pub fn drain(&mut self) -> VideoCodecStatus {
        self.push_jobs([Job::Drain])
    }

    /// Stops the decoder and retires its identity. No frame is reported after this returns.
    pub fn release(&mut self) -> VideoCodecStatus {
        if self.released {
            return VideoCodecStatus::Ok;
        }
        self.released = true;

        let status = self.stop();
        match self.callback.retire() {
            Ok(delivered) => {
                log::debug!("released decoder {} after {delivered} frames", self.id());
                status
            }
            Err(err) => VideoCodecStatus::from(&err),
        }
    }
}

// Instead of an explicit release from the owner, dropping the decoder releases it as well.
impl<B: DecoderBackend> Drop for NativeDecoder<B> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::backend::dummy::DummyBackendOptions;
    use crate::backend::dummy::CORRUPT_MARKER;
    use crate::bridge::BindingState;
    use crate::bridge::ChannelSink;
    use crate::bridge::DecodedFrameEvent;
    use crate::settings::create_settings;
    use crate::DecodedFormat;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn options(reorder_depth: usize) -> DummyBackendOptions {
        DummyBackendOptions { format: DecodedFormat::I420, reorder_depth }
    }

    fn unit(first: u8, timestamp_ns: i64) -> EncodedUnit {
        EncodedUnit::new(vec![first, 0x10, 0x20], timestamp_ns)
    }

    #[allow(clippy::type_complexity)]
    fn new_decoder(
        bridge: &CompletionBridge<VideoFrame>,
        reorder_depth: usize,
    ) -> (
        NativeDecoder<DummyBackend>,
        mpsc::Receiver<DecodedFrameEvent<VideoFrame>>,
        mpsc::Receiver<VideoCodecStatus>,
    ) {
        let (event_tx, event_rx) = mpsc::channel();
        let (error_tx, error_rx) = mpsc::channel();
        let decoder = NativeDecoder::<DummyBackend>::new(
            bridge,
            ChannelSink::new(event_tx),
            create_settings(2, 16, 8),
            options(reorder_depth),
            move |status| {
                let _ = error_tx.send(status);
            },
        )
        .unwrap();

        (decoder, event_rx, error_rx)
    }

    #[test]
    fn frames_come_out_in_completion_order() {
        let _ = env_logger::try_init();

        let bridge = CompletionBridge::new();
        let (mut decoder, events, _errors) = new_decoder(&bridge, 0);

        assert_eq!(decoder.start(), VideoCodecStatus::Ok);
        let units = (1..=5).map(|i| unit(i, i as i64 * 1000));
        assert_eq!(decoder.queue(units), VideoCodecStatus::Ok);

        for i in 1..=5 {
            let event = events.recv_timeout(TIMEOUT).unwrap();
            assert_eq!(event.frame.timestamp_ns(), i as i64 * 1000);
            assert_eq!(event.frame.resolution(), crate::Resolution::from((16, 8)));
            assert_eq!(event.qp, Some(i as i32));
            assert!(event.decode_time_ms.is_some());
        }

        assert_eq!(decoder.release(), VideoCodecStatus::Ok);
        assert_eq!(bridge.state(decoder.id()), Some(BindingState::Retired));
        assert!(events.recv_timeout(TIMEOUT).is_err());
    }

    #[test]
    fn drained_frames_have_no_decode_time() {
        let bridge = CompletionBridge::new();
        let (mut decoder, events, _errors) = new_decoder(&bridge, 2);

        decoder.start();
        decoder.queue([unit(1, 0), unit(2, 20), unit(3, 10)]);
        decoder.drain();

        let received = (0..3).map(|_| events.recv_timeout(TIMEOUT).unwrap()).collect::<Vec<_>>();
        let timestamps = received.iter().map(|e| e.frame.timestamp_ns()).collect::<Vec<_>>();
        assert_eq!(timestamps, vec![0, 10, 20]);
        assert!(received[0].decode_time_ms.is_some());
        assert_eq!(received[1].decode_time_ms, None);
        assert_eq!(received[2].decode_time_ms, None);
        // The QP is known even for frames coming out of a drain.
        assert_eq!(received[2].qp, Some(2));
    }

    #[test]
    fn failed_decodes_produce_no_event() {
        let bridge = CompletionBridge::new();
        let (mut decoder, events, errors) = new_decoder(&bridge, 0);

        decoder.start();
        decoder.queue([
            unit(1, 0),
            EncodedUnit::new(Vec::<u8>::new(), 1),
            EncodedUnit::new(vec![CORRUPT_MARKER], 2),
            unit(4, 3),
        ]);

        assert_eq!(events.recv_timeout(TIMEOUT).unwrap().frame.timestamp_ns(), 0);
        assert_eq!(events.recv_timeout(TIMEOUT).unwrap().frame.timestamp_ns(), 3);
        assert_eq!(errors.recv_timeout(TIMEOUT).unwrap(), VideoCodecStatus::Error);
        // Decode errors are not fatal.
        assert_eq!(decoder.state(), NativeDecoderState::Running);

        decoder.release();
        assert!(events.try_recv().is_err());
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn invalid_settings_fail_initialization() {
        let bridge = CompletionBridge::new();
        let (error_tx, error_rx) = mpsc::channel();
        let mut decoder = NativeDecoder::<DummyBackend>::new(
            &bridge,
            |_: DecodedFrameEvent<VideoFrame>| -> anyhow::Result<()> { Ok(()) },
            create_settings(0, 1920, 1080),
            options(0),
            move |status| {
                let _ = error_tx.send(status);
            },
        )
        .unwrap();

        assert_eq!(decoder.start(), VideoCodecStatus::Ok);
        assert_eq!(error_rx.recv_timeout(TIMEOUT).unwrap(), VideoCodecStatus::ErrParameter);
        assert_eq!(decoder.state(), NativeDecoderState::Error);
        assert_eq!(decoder.queue([unit(1, 0)]), VideoCodecStatus::Uninitialized);
        assert_eq!(decoder.start(), VideoCodecStatus::Error);

        decoder.stop();
        assert_eq!(decoder.state(), NativeDecoderState::Stopped);
        assert_eq!(bridge.state(decoder.id()), Some(BindingState::Created));
    }

    #[test]
    fn initialization_failure_leaves_the_sink_bound() {
        let bridge = CompletionBridge::new();
        let (event_tx, event_rx) = mpsc::channel();
        let (error_tx, error_rx) = mpsc::channel();
        let mut decoder = NativeDecoder::<DummyBackend>::new(
            &bridge,
            ChannelSink::new(event_tx),
            create_settings(1, 100_000, 100_000),
            options(0),
            move |status| {
                let _ = error_tx.send(status);
            },
        )
        .unwrap();

        assert_eq!(decoder.start(), VideoCodecStatus::Ok);
        // Depending on how far the worker got, the input is either refused or never decoded.
        let queued = decoder.queue([unit(1, 0), unit(2, 1)]);
        assert!(matches!(queued, VideoCodecStatus::Ok | VideoCodecStatus::Uninitialized));

        assert_eq!(error_rx.recv_timeout(TIMEOUT).unwrap(), VideoCodecStatus::Error);
        assert_eq!(decoder.state(), NativeDecoderState::Error);
        // No event comes and the channel stays open, so readers have to watch the state.
        assert_eq!(event_rx.recv_timeout(TIMEOUT).unwrap_err(), mpsc::RecvTimeoutError::Timeout);
        assert!(error_rx.try_recv().is_err());

        assert_eq!(decoder.release(), VideoCodecStatus::Ok);
        assert_eq!(bridge.state(decoder.id()), Some(BindingState::Retired));
        assert_eq!(
            event_rx.recv_timeout(TIMEOUT).unwrap_err(),
            mpsc::RecvTimeoutError::Disconnected
        );
    }

    #[test]
    fn delivery_failure_stops_decoding() {
        let bridge = CompletionBridge::new();
        let (mut decoder, events, errors) = new_decoder(&bridge, 0);
        drop(events);

        decoder.start();
        decoder.queue([unit(1, 0), unit(2, 1)]);

        assert_eq!(errors.recv_timeout(TIMEOUT).unwrap(), VideoCodecStatus::Error);
        decoder.stop();
        assert_eq!(decoder.state(), NativeDecoderState::Stopped);
        // The second unit was never decoded, so no second report.
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn release_waits_for_inflight_frame() {
        let _ = env_logger::try_init();

        let bridge = CompletionBridge::new();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel::<()>();
        let (frame_tx, frame_rx) = mpsc::channel();
        let entered_tx = Mutex::new(entered_tx);
        let resume_rx = Mutex::new(resume_rx);
        let frame_tx = Mutex::new(frame_tx);

        let mut decoder = NativeDecoder::<DummyBackend>::new(
            &bridge,
            move |event: DecodedFrameEvent<VideoFrame>| -> anyhow::Result<()> {
                entered_tx.lock().unwrap().send(())?;
                resume_rx.lock().unwrap().recv()?;
                frame_tx.lock().unwrap().send(event.frame.timestamp_ns())?;
                Ok(())
            },
            create_settings(1, 2, 2),
            options(0),
            |_| (),
        )
        .unwrap();
        let id = decoder.id();

        decoder.start();
        decoder.queue([unit(1, 100), unit(2, 200)]);
        entered_rx.recv_timeout(TIMEOUT).unwrap();

        let resumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            resume_tx.send(()).unwrap();
        });
        assert_eq!(decoder.release(), VideoCodecStatus::Ok);
        resumer.join().unwrap();

        assert_eq!(frame_rx.recv_timeout(TIMEOUT).unwrap(), 100);
        // The second unit was abandoned and the sink is gone.
        assert!(frame_rx.recv_timeout(TIMEOUT).is_err());
        assert_eq!(bridge.state(id), Some(BindingState::Retired));
        assert_eq!(bridge.live_decoders(), 0);
    }

    #[test]
    fn restart_keeps_identity() {
        let bridge = CompletionBridge::new();
        let (mut decoder, events, _errors) = new_decoder(&bridge, 0);
        let id = decoder.id();

        decoder.start();
        decoder.queue([unit(1, 0)]);
        events.recv_timeout(TIMEOUT).unwrap();
        decoder.stop();

        assert_eq!(decoder.start(), VideoCodecStatus::Ok);
        decoder.queue([unit(2, 1)]);
        assert_eq!(events.recv_timeout(TIMEOUT).unwrap().frame.timestamp_ns(), 1);
        assert_eq!(decoder.id(), id);
        assert_eq!(bridge.live_decoders(), 1);

        drop(decoder);
        assert_eq!(bridge.state(id), Some(BindingState::Retired));
        assert_eq!(bridge.live_decoders(), 0);
    }

    #[test]
    fn decoders_share_a_bridge() {
        let bridge = CompletionBridge::new();
        let (mut first, first_events, _first_errors) = new_decoder(&bridge, 0);
        let (mut second, second_events, _second_errors) = new_decoder(&bridge, 0);
        assert_ne!(first.id(), second.id());

        first.start();
        second.start();
        first.queue((0..20).map(|i| unit(1, i)));
        second.queue((0..20).map(|i| unit(2, 1000 + i)));

        for i in 0..20 {
            let event = first_events.recv_timeout(TIMEOUT).unwrap();
            assert_eq!((event.frame.timestamp_ns(), event.qp), (i, Some(1)));
            let event = second_events.recv_timeout(TIMEOUT).unwrap();
            assert_eq!((event.frame.timestamp_ns(), event.qp), (1000 + i, Some(2)));
        }

        first.release();
        second.release();
        assert!(first_events.try_recv().is_err());
        assert!(second_events.try_recv().is_err());
    }
}
