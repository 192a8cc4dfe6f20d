use crate::models::{SelectedFile, UploadRequest};
use crate::pipeline::error::PipelineError;
use crate::pipeline::state::{
    Effect, PipelineEvent, RunEvent, RunId, RunSnapshot, UploadStateMachine,
};
use crate::services::parse_client::ParseClient;
use crate::services::presign_client::PresignClient;
use crate::services::transport::UploadTransport;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Drives one file at a time through presign, upload and parse.
///
/// The driver is the only writer of the current [`RunSnapshot`]. Every async
/// result is tagged with the run that requested it, so a newer selection makes
/// late results of the older run inert.
pub struct UploadPipeline {
    machine: UploadStateMachine,
    presign: Arc<dyn PresignClient>,
    parser: Arc<dyn ParseClient>,
    transport: Arc<dyn UploadTransport>,
    status: watch::Sender<RunSnapshot>,
}

impl UploadPipeline {
    pub fn new(
        stride: i64,
        presign: Arc<dyn PresignClient>,
        parser: Arc<dyn ParseClient>,
        transport: Arc<dyn UploadTransport>,
    ) -> Result<Self, PipelineError> {
        let machine = UploadStateMachine::new(stride)?;
        let (status, _) = watch::channel(RunSnapshot::idle(0));
        Ok(Self {
            machine,
            presign,
            parser,
            transport,
            status,
        })
    }

    /// Observers get every published snapshot; they cannot write one.
    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.status.subscribe()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.status.borrow().clone()
    }

    /// Starts a new run for `file` and drives it until it is terminal or superseded.
    ///
    /// Returns the last snapshot this run reached.
    pub async fn select(&self, file: SelectedFile) -> Result<RunSnapshot, PipelineError> {
        let request = UploadRequest::new(file.name.clone())?;

        // Allocating the id under the channel lock keeps published run ids increasing
        let mut run_id = 0;
        let mut previous = None;
        self.status.send_modify(|current| {
            run_id = current.run_id + 1;
            previous = current.status.file_name().map(str::to_string);
            *current = RunSnapshot::idle(run_id);
        });
        if let Some(previous) = previous {
            info!(
                "🔁 Run {} for {} supersedes the run for {}",
                run_id,
                request.desired_name(),
                previous
            );
        }

        let mut last = RunSnapshot::idle(run_id);
        let mut pending: VecDeque<Effect> = self
            .apply(RunEvent::new(run_id, PipelineEvent::Select { request }), &mut last)
            .into();

        while let Some(effect) = pending.pop_front() {
            let follow_up = self.execute(run_id, effect, &file, &mut last).await;
            pending.extend(follow_up);
        }

        Ok(last)
    }

    /// Applies one event to the shared snapshot and returns the effects to run.
    fn apply(&self, event: RunEvent, last: &mut RunSnapshot) -> Vec<Effect> {
        let run_id = event.run_id;
        let mut effects = Vec::new();

        self.status.send_if_modified(|current| {
            let transition = self.machine.transition(current, event);
            if transition.snapshot == *current {
                return false;
            }
            info!(
                "🔄 Run {}: {} → {}",
                run_id,
                current.status.label(),
                transition.snapshot.status.label()
            );
            *current = transition.snapshot;
            effects = transition.effects;
            true
        });

        let current = self.status.borrow();
        if current.run_id == run_id {
            *last = current.clone();
        }
        effects
    }

    async fn execute(
        &self,
        run_id: RunId,
        effect: Effect,
        file: &SelectedFile,
        last: &mut RunSnapshot,
    ) -> Vec<Effect> {
        match effect {
            Effect::RequestPresign(request) => {
                let event = match self.presign.request_destination(&request).await {
                    Ok(destination) => PipelineEvent::PresignOk(destination),
                    Err(e) => PipelineEvent::PresignFailed(e),
                };
                self.apply(RunEvent::new(run_id, event), last)
            }

            Effect::StartUpload { destination, .. } => {
                let (tx, mut rx) = mpsc::unbounded_channel();
                let mut effects = Vec::new();

                let upload = self.transport.submit(&destination, file, tx);
                let signals = async {
                    while let Some(signal) = rx.recv().await {
                        let event = RunEvent::new(run_id, PipelineEvent::Transport(signal));
                        effects.extend(self.apply(event, last));
                    }
                };
                tokio::join!(upload, signals);

                // A superseded run never sees its ReleaseFile effect
                let superseded = self.status.borrow().run_id != run_id;
                let releases = effects
                    .iter()
                    .any(|effect| matches!(effect, Effect::ReleaseFile { .. }));
                if superseded && !releases {
                    info!("🧹 Run {} was superseded during upload of {}", run_id, file.name);
                    self.transport.release(&file.name);
                }

                effects
            }

            Effect::ReleaseFile { file_name } => {
                self.transport.release(&file_name);
                Vec::new()
            }

            Effect::RequestParse { file_name } => {
                let event = match self.parser.request_waveform(&file_name).await {
                    Ok(raw) => PipelineEvent::ParseOk(raw),
                    Err(e) => PipelineEvent::ParseFailed(e),
                };
                self.apply(RunEvent::new(run_id, event), last)
            }
        }
    }
}
