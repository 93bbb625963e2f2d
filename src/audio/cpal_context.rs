//! Audio context on a system output device via cpal.
//!
//! cpal streams are not `Send`, so a dedicated thread owns the stream and
//! takes commands over a channel. The output callback renders the shared
//! mixer; the context clock is the number of frames rendered so far.

use crate::audio::context::{AudioBuffer, AudioContext, ContextState, ScheduledSource};
use crate::audio::mixer::Mixer;
use crate::config::PlaybackConfig;
use crate::error::{Result, SpeechError};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

const RUNNING: u8 = 0;
const SUSPENDED: u8 = 1;
const CLOSED: u8 = 2;

enum Command {
    Play,
    Close,
}

/// Audio context backed by a cpal output stream.
pub struct CpalAudioContext {
    mixer: Arc<Mutex<Mixer>>,
    state: Arc<AtomicU8>,
    commands: Sender<Command>,
    sample_rate: u32,
}

impl CpalAudioContext {
    /// Open the configured (or default) output device and start playing.
    ///
    /// # Errors
    ///
    /// Returns an error if no device is found or the stream cannot start.
    pub fn new(config: &PlaybackConfig) -> Result<Self> {
        let sample_rate = config.sample_rate;
        let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate)));
        let state = Arc::new(AtomicU8::new(SUSPENDED));
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);

        let device_name = config.output_device.clone();
        let thread_mixer = Arc::clone(&mixer);
        let thread_state = Arc::clone(&state);
        std::thread::Builder::new()
            .name("ember-audio-out".into())
            .spawn(move || {
                run_device_thread(
                    device_name,
                    sample_rate,
                    thread_mixer,
                    thread_state,
                    command_rx,
                    ready_tx,
                );
            })
            .map_err(|e| SpeechError::Audio(format!("failed to spawn audio thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| SpeechError::Audio("audio thread exited during startup".into()))??;

        Ok(Self {
            mixer,
            state,
            commands,
            sample_rate,
        })
    }

    /// Names of the available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| SpeechError::Audio(format!("cannot enumerate devices: {e}")))?;
        Ok(devices
            .filter_map(|d| d.description().ok().map(|desc| desc.name().to_owned()))
            .collect())
    }

    fn lock_mixer(&self) -> Result<std::sync::MutexGuard<'_, Mixer>> {
        self.mixer
            .lock()
            .map_err(|_| SpeechError::Audio("mixer lock poisoned".into()))
    }
}

fn select_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .output_devices()
            .map_err(|e| SpeechError::Audio(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .is_some_and(|desc| desc.name() == name)
            })
            .ok_or_else(|| SpeechError::Audio(format!("output device '{name}' not found"))),
        None => host
            .default_output_device()
            .ok_or_else(|| SpeechError::Audio("no default output device".into())),
    }
}

fn open_stream(
    name: Option<&str>,
    sample_rate: u32,
    mixer: Arc<Mutex<Mixer>>,
) -> Result<cpal::Stream> {
    let device = select_device(name)?;
    let device_name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using output device: {device_name} at {sample_rate} Hz");

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| match mixer.lock() {
                Ok(mut m) => m.render(data),
                Err(_) => data.fill(0.0),
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| SpeechError::Audio(format!("failed to build output stream: {e}")))
}

fn run_device_thread(
    device_name: Option<String>,
    sample_rate: u32,
    mixer: Arc<Mutex<Mixer>>,
    state: Arc<AtomicU8>,
    commands: Receiver<Command>,
    ready: Sender<Result<()>>,
) {
    let stream = match open_stream(device_name.as_deref(), sample_rate, mixer) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    match stream.play() {
        Ok(()) => state.store(RUNNING, Ordering::Release),
        // Stays suspended; a later resume retries.
        Err(e) => warn!("output stream did not start: {e}"),
    }
    let _ = ready.send(Ok(()));

    while let Ok(command) = commands.recv() {
        match command {
            Command::Play => match stream.play() {
                Ok(()) => {
                    if state.load(Ordering::Acquire) != CLOSED {
                        state.store(RUNNING, Ordering::Release);
                    }
                }
                Err(e) => warn!("failed to resume output stream: {e}"),
            },
            Command::Close => break,
        }
    }
    debug!("audio output thread exiting");
    state.store(CLOSED, Ordering::Release);
}

impl AudioContext for CpalAudioContext {
    fn state(&self) -> ContextState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => ContextState::Running,
            SUSPENDED => ContextState::Suspended,
            _ => ContextState::Closed,
        }
    }

    fn current_time(&self) -> f64 {
        self.mixer.lock().map(|m| m.now_secs()).unwrap_or(0.0)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn schedule(&self, buffer: &AudioBuffer, when: f64) -> Result<ScheduledSource> {
        if self.state() == ContextState::Closed {
            return Err(SpeechError::Audio("audio context is closed".into()));
        }
        let (id, start_time, ended) = self.lock_mixer()?.add(buffer.samples.clone(), when);
        Ok(ScheduledSource {
            id,
            start_time,
            ended,
        })
    }

    fn stop_source(&self, id: u64) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.stop(id);
        }
    }

    fn resume(&self) -> Result<()> {
        if self.state() == ContextState::Closed {
            return Err(SpeechError::Audio("cannot resume a closed context".into()));
        }
        self.commands
            .send(Command::Play)
            .map_err(|_| SpeechError::Audio("audio thread is gone".into()))
    }

    fn close(&self) {
        self.state.store(CLOSED, Ordering::Release);
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.stop_all();
        }
        let _ = self.commands.send(Command::Close);
    }
}

impl Drop for CpalAudioContext {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close);
    }
}
