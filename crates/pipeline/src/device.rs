//! Platform audio output through cpal
//!
//! cpal streams are not `Send`, so the stream lives on a dedicated
//! thread and the backend drives it over a control channel. The device
//! buffer is sized to at least twice the platform minimum.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig, SupportedBufferSize};

use crate::player::{OutputBackend, OutputSpec, RenderFn};
use crate::PipelineError;

enum DeviceCommand {
    Pause,
    Resume,
    Close,
}

/// Output backend over the default platform device.
pub struct CpalBackend {
    control: Option<std::sync::mpsc::Sender<DeviceCommand>>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self { control: None }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBackend for CpalBackend {
    fn open(&mut self, spec: OutputSpec, render: RenderFn) -> Result<(), PipelineError> {
        let (control_tx, control_rx) = std::sync::mpsc::channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        std::thread::Builder::new()
            .name("vanta-playback".to_string())
            .spawn(move || {
                let stream = match build_stream(spec, render) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while let Ok(command) = control_rx.recv() {
                    match command {
                        DeviceCommand::Pause => {
                            if let Err(e) = stream.pause() {
                                tracing::warn!("device pause failed: {}", e);
                            }
                        }
                        DeviceCommand::Resume => {
                            if let Err(e) = stream.play() {
                                tracing::warn!("device resume failed: {}", e);
                            }
                        }
                        DeviceCommand::Close => break,
                    }
                }
            })
            .map_err(|e| PipelineError::Init(format!("playback thread: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| PipelineError::Init("playback thread died".to_string()))??;
        self.control = Some(control_tx);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), PipelineError> {
        self.send(DeviceCommand::Pause)
    }

    fn resume(&mut self) -> Result<(), PipelineError> {
        self.send(DeviceCommand::Resume)
    }

    fn close(&mut self) {
        if let Some(control) = self.control.take() {
            let _ = control.send(DeviceCommand::Close);
        }
    }
}

impl CpalBackend {
    fn send(&self, command: DeviceCommand) -> Result<(), PipelineError> {
        match &self.control {
            Some(control) => control
                .send(command)
                .map_err(|_| PipelineError::Player("playback thread gone".to_string())),
            None => Err(PipelineError::Player("device not open".to_string())),
        }
    }
}

fn build_stream(spec: OutputSpec, mut render: RenderFn) -> Result<cpal::Stream, PipelineError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PipelineError::Init("no output device".to_string()))?;

    let supported = device
        .default_output_config()
        .map_err(|e| PipelineError::Init(format!("output config: {}", e)))?;
    let buffer_size = match supported.buffer_size() {
        SupportedBufferSize::Range { min, .. } => BufferSize::Fixed((*min * 2).max(256)),
        SupportedBufferSize::Unknown => BufferSize::Default,
    };

    let config = StreamConfig {
        channels: spec.channels,
        sample_rate: SampleRate(spec.sample_rate),
        buffer_size,
    };

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| render(data),
            |err| tracing::error!("output stream error: {}", err),
            None,
        )
        .map_err(|e| PipelineError::Init(format!("output stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| PipelineError::Init(format!("output stream start: {}", e)))?;

    Ok(stream)
}
