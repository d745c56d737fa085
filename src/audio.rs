use std::{
    fs::File,
    io::BufReader,
    path::PathBuf,
    sync::mpsc::{self, Sender},
    thread,
};

use rodio::{Decoder, OutputStream, Sink};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct CueRequest {
    pub path: PathBuf,
    pub volume: f32,
    /// How many times the clip plays. Repetitions are queued on a single
    /// sink, so each one starts only after the previous finishes.
    pub repeat: u32,
}

/// Playback seam. The production implementation talks to the audio device;
/// tests record requests instead.
pub trait AudioCue: Send + Sync {
    fn play(&self, request: CueRequest);
}

#[derive(Clone)]
pub struct RodioPlayer {
    tx: Sender<CueRequest>,
}

impl RodioPlayer {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<CueRequest>();
        thread::spawn(move || {
            let mut output = OutputStream::try_default().ok();
            if output.is_none() {
                warn!("audio output unavailable; alert cues disabled until a device appears");
            }
            let mut active_sinks: Vec<Sink> = Vec::new();

            while let Ok(request) = rx.recv() {
                active_sinks.retain(|sink| !sink.empty());

                if output.is_none() {
                    output = OutputStream::try_default().ok();
                    if output.is_none() {
                        debug!("audio output still unavailable; cue dropped");
                        continue;
                    }
                }
                let Some((_stream, handle)) = output.as_ref() else {
                    continue;
                };

                match Sink::try_new(handle) {
                    Ok(sink) => {
                        sink.set_volume(request.volume.clamp(0.0, 2.0));
                        let mut queued = 0;
                        for _ in 0..request.repeat.max(1) {
                            let file = match File::open(&request.path) {
                                Ok(file) => file,
                                Err(err) => {
                                    debug!(?err, path = %request.path.display(), "failed opening cue file");
                                    break;
                                }
                            };
                            match Decoder::new(BufReader::new(file)) {
                                Ok(decoder) => {
                                    sink.append(decoder);
                                    queued += 1;
                                }
                                Err(err) => {
                                    debug!(?err, path = %request.path.display(), "failed decoding cue file");
                                    break;
                                }
                            }
                        }
                        if queued > 0 {
                            active_sinks.push(sink);
                        }
                    }
                    Err(err) => {
                        warn!(?err, "failed creating audio sink");
                        output = None;
                    }
                }
            }
        });
        Self { tx }
    }
}

impl Default for RodioPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioCue for RodioPlayer {
    fn play(&self, request: CueRequest) {
        let _ = self.tx.send(request);
    }
}
