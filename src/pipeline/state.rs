use crate::models::{DisplaySample, PresignedDestination, RawWaveform, TransportSignal, UploadRequest};
use crate::pipeline::error::PipelineError;
use crate::services::decimator::{decimate, validate_stride};

/// Identifies one run of the pipeline. Increases with every file selection.
pub type RunId = u64;

/// Lifecycle phase of the tracked file.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadStatus {
    Idle,
    AwaitingPresign {
        request: UploadRequest,
    },
    Uploading {
        file_name: String,
        destination: PresignedDestination,
        last_signal: Option<TransportSignal>,
    },
    Parsing {
        file_name: String,
        file_locator: String,
    },
    Ready {
        file_name: String,
        file_locator: String,
        samples: Vec<DisplaySample>,
    },
    Failed {
        file_name: String,
        error: PipelineError,
    },
}

impl UploadStatus {
    pub fn label(&self) -> &'static str {
        match self {
            UploadStatus::Idle => "idle",
            UploadStatus::AwaitingPresign { .. } => "awaiting_presign",
            UploadStatus::Uploading { .. } => "uploading",
            UploadStatus::Parsing { .. } => "parsing",
            UploadStatus::Ready { .. } => "ready",
            UploadStatus::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Ready { .. } | UploadStatus::Failed { .. })
    }

    pub fn file_name(&self) -> Option<&str> {
        match self {
            UploadStatus::Idle => None,
            UploadStatus::AwaitingPresign { request } => Some(request.desired_name()),
            UploadStatus::Uploading { file_name, .. }
            | UploadStatus::Parsing { file_name, .. }
            | UploadStatus::Ready { file_name, .. }
            | UploadStatus::Failed { file_name, .. } => Some(file_name),
        }
    }
}

/// Immutable view of the pipeline handed to and returned from each transition.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    pub run_id: RunId,
    pub status: UploadStatus,
}

impl RunSnapshot {
    pub fn idle(run_id: RunId) -> Self {
        Self {
            run_id,
            status: UploadStatus::Idle,
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Select { request: UploadRequest },
    PresignOk(PresignedDestination),
    PresignFailed(PipelineError),
    Transport(TransportSignal),
    ParseOk(RawWaveform),
    ParseFailed(PipelineError),
}

/// An event tagged with the run that produced it.
#[derive(Debug, Clone)]
pub struct RunEvent {
    pub run_id: RunId,
    pub event: PipelineEvent,
}

impl RunEvent {
    pub fn new(run_id: RunId, event: PipelineEvent) -> Self {
        Self { run_id, event }
    }
}

/// Work the driver must perform after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    RequestPresign(UploadRequest),
    StartUpload {
        file_name: String,
        destination: PresignedDestination,
    },
    /// Drop the transport's in-flight record so the file cannot be resubmitted
    ReleaseFile { file_name: String },
    RequestParse { file_name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub snapshot: RunSnapshot,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(run_id: RunId, status: UploadStatus, effects: Vec<Effect>) -> Self {
        Self {
            snapshot: RunSnapshot { run_id, status },
            effects,
        }
    }

    fn unchanged(snapshot: &RunSnapshot) -> Self {
        Self {
            snapshot: snapshot.clone(),
            effects: Vec::new(),
        }
    }
}

/// Deterministic transition function for a single upload run.
#[derive(Debug, Clone, Copy)]
pub struct UploadStateMachine {
    stride: i64,
}

impl UploadStateMachine {
    pub fn new(stride: i64) -> Result<Self, PipelineError> {
        validate_stride(stride)?;
        Ok(Self { stride })
    }

    pub fn transition(&self, snapshot: &RunSnapshot, event: RunEvent) -> Transition {
        if event.run_id != snapshot.run_id {
            tracing::debug!(
                "Discarding event for superseded run {} (current run {})",
                event.run_id,
                snapshot.run_id
            );
            return Transition::unchanged(snapshot);
        }

        let run_id = snapshot.run_id;
        match (&snapshot.status, event.event) {
            (UploadStatus::Idle, PipelineEvent::Select { request }) => Transition::to(
                run_id,
                UploadStatus::AwaitingPresign {
                    request: request.clone(),
                },
                vec![Effect::RequestPresign(request)],
            ),

            (UploadStatus::AwaitingPresign { request }, PipelineEvent::PresignOk(destination)) => {
                let file_name = request.desired_name().to_string();
                Transition::to(
                    run_id,
                    UploadStatus::Uploading {
                        file_name: file_name.clone(),
                        destination: destination.clone(),
                        last_signal: None,
                    },
                    vec![Effect::StartUpload {
                        file_name,
                        destination,
                    }],
                )
            }

            (UploadStatus::AwaitingPresign { request }, PipelineEvent::PresignFailed(error)) => {
                Transition::to(
                    run_id,
                    UploadStatus::Failed {
                        file_name: request.desired_name().to_string(),
                        error,
                    },
                    Vec::new(),
                )
            }

            (
                UploadStatus::Uploading {
                    file_name,
                    destination,
                    ..
                },
                PipelineEvent::Transport(signal),
            ) => match signal {
                TransportSignal::Preparing | TransportSignal::Uploading => Transition::to(
                    run_id,
                    UploadStatus::Uploading {
                        file_name: file_name.clone(),
                        destination: destination.clone(),
                        last_signal: Some(signal),
                    },
                    Vec::new(),
                ),
                TransportSignal::HeadersReceived => Transition::to(
                    run_id,
                    UploadStatus::Parsing {
                        file_name: file_name.clone(),
                        file_locator: destination.resulting_file_locator.clone(),
                    },
                    vec![
                        Effect::ReleaseFile {
                            file_name: file_name.clone(),
                        },
                        Effect::RequestParse {
                            file_name: file_name.clone(),
                        },
                    ],
                ),
                TransportSignal::Aborted => Transition::to(
                    run_id,
                    UploadStatus::Failed {
                        file_name: file_name.clone(),
                        error: PipelineError::TransportAborted(format!(
                            "upload of {} to {} was aborted",
                            file_name, destination.upload_url
                        )),
                    },
                    Vec::new(),
                ),
            },

            (
                UploadStatus::Parsing {
                    file_name,
                    file_locator,
                },
                PipelineEvent::ParseOk(raw),
            ) => {
                let status = match decimate(&raw, self.stride) {
                    Ok(samples) => UploadStatus::Ready {
                        file_name: file_name.clone(),
                        file_locator: file_locator.clone(),
                        samples,
                    },
                    Err(error) => UploadStatus::Failed {
                        file_name: file_name.clone(),
                        error,
                    },
                };
                Transition::to(run_id, status, Vec::new())
            }

            (UploadStatus::Parsing { file_name, .. }, PipelineEvent::ParseFailed(error)) => {
                Transition::to(
                    run_id,
                    UploadStatus::Failed {
                        file_name: file_name.clone(),
                        error,
                    },
                    Vec::new(),
                )
            }

            (status, event) => {
                tracing::warn!(
                    "Ignoring {:?} in state '{}' for run {}",
                    event,
                    status.label(),
                    run_id
                );
                Transition::unchanged(snapshot)
            }
        }
    }
}
