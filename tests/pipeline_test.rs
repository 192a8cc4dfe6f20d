use async_trait::async_trait;
use ecg_viewer::models::{
    DisplaySample, PresignResponse, PresignedDestination, RawWaveform, SelectedFile,
    TransportSignal, UploadRequest,
};
use ecg_viewer::pipeline::{PipelineError, UploadPipeline, UploadStatus};
use ecg_viewer::services::parse_client::ParseClient;
use ecg_viewer::services::presign_client::PresignClient;
use ecg_viewer::services::transport::UploadTransport;
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedSender;

type CallLog = Arc<Mutex<Vec<String>>>;

fn record(log: &CallLog, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

struct FakePresigner {
    log: CallLog,
    fail: bool,
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl PresignClient for FakePresigner {
    async fn request_destination(
        &self,
        request: &UploadRequest,
    ) -> Result<PresignedDestination, PipelineError> {
        record(&self.log, format!("presign {}", request.desired_name()));
        if let Some(gate) = &self.gate {
            if request.desired_name() == "slow.npy" {
                gate.notified().await;
            }
        }
        if self.fail {
            return Err(PipelineError::PresignFailed("HTTP 500".to_string()));
        }
        let response = PresignResponse {
            url: "https://s3/".to_string(),
            fields: BTreeMap::from([
                ("key".to_string(), format!("u/{}", request.desired_name())),
                ("policy".to_string(), "p".to_string()),
            ]),
        };
        PresignedDestination::from_response(response)
            .ok_or_else(|| PipelineError::PresignFailed("missing key".to_string()))
    }
}

struct FakeTransport {
    log: CallLog,
    outcome: TransportSignal,
}

#[async_trait]
impl UploadTransport for FakeTransport {
    async fn submit(
        &self,
        destination: &PresignedDestination,
        file: &SelectedFile,
        signals: UnboundedSender<TransportSignal>,
    ) {
        record(
            &self.log,
            format!("upload {} -> {}", file.name, destination.upload_url),
        );
        let _ = signals.send(TransportSignal::Preparing);
        let _ = signals.send(TransportSignal::Uploading);
        let _ = signals.send(self.outcome);
    }

    fn release(&self, file_name: &str) {
        record(&self.log, format!("release {}", file_name));
    }
}

struct FakeParser {
    log: CallLog,
    response: Result<serde_json::Value, PipelineError>,
}

#[async_trait]
impl ParseClient for FakeParser {
    async fn request_waveform(&self, file_name: &str) -> Result<RawWaveform, PipelineError> {
        record(&self.log, format!("parse {}", file_name));
        let body = self.response.clone()?;
        ecg_viewer::services::parse_client::extract_first_lead(&body)
    }
}

struct Harness {
    log: CallLog,
    pipeline: UploadPipeline,
}

fn harness(
    presign_fails: bool,
    outcome: TransportSignal,
    response: Result<serde_json::Value, PipelineError>,
) -> Harness {
    let log: CallLog = Arc::default();
    let pipeline = UploadPipeline::new(
        5,
        Arc::new(FakePresigner {
            log: log.clone(),
            fail: presign_fails,
            gate: None,
        }),
        Arc::new(FakeParser {
            log: log.clone(),
            response,
        }),
        Arc::new(FakeTransport {
            log: log.clone(),
            outcome,
        }),
    )
    .unwrap();
    Harness { log, pipeline }
}

fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[tokio::test]
async fn test_file_reaches_ready_with_decimated_samples() {
    let h = harness(
        false,
        TransportSignal::HeadersReceived,
        Ok(serde_json::json!([[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]])),
    );

    let snapshot = h
        .pipeline
        .select(SelectedFile::new("ecg1.npy", vec![0u8; 16]))
        .await
        .unwrap();

    match snapshot.status {
        UploadStatus::Ready {
            file_name,
            file_locator,
            samples,
        } => {
            assert_eq!(file_name, "ecg1.npy");
            assert_eq!(file_locator, "https://s3/u/ecg1.npy");
            assert_eq!(
                samples,
                vec![
                    DisplaySample {
                        index: 0,
                        value: Some(0.0)
                    },
                    DisplaySample {
                        index: 5,
                        value: Some(5.0)
                    },
                ]
            );
        }
        other => panic!("expected ready, got {:?}", other),
    }

    assert_eq!(
        calls(&h.log),
        vec![
            "presign ecg1.npy",
            "upload ecg1.npy -> https://s3/",
            "release ecg1.npy",
            "parse ecg1.npy",
        ]
    );
    assert_eq!(h.pipeline.snapshot().status.label(), "ready");
}

#[tokio::test]
async fn test_presign_failure_stops_before_upload() {
    let h = harness(true, TransportSignal::HeadersReceived, Ok(serde_json::json!([[1]])));

    let snapshot = h
        .pipeline
        .select(SelectedFile::new("ecg1.npy", vec![1u8]))
        .await
        .unwrap();

    assert!(matches!(
        snapshot.status,
        UploadStatus::Failed {
            error: PipelineError::PresignFailed(_),
            ..
        }
    ));
    assert_eq!(calls(&h.log), vec!["presign ecg1.npy"]);
}

#[tokio::test]
async fn test_aborted_upload_never_parses() {
    let h = harness(false, TransportSignal::Aborted, Ok(serde_json::json!([[1]])));

    let snapshot = h
        .pipeline
        .select(SelectedFile::new("ecg1.npy", vec![1u8]))
        .await
        .unwrap();

    assert!(matches!(
        snapshot.status,
        UploadStatus::Failed {
            error: PipelineError::TransportAborted(_),
            ..
        }
    ));
    assert!(!calls(&h.log).iter().any(|c| c.starts_with("parse")));
}

#[tokio::test]
async fn test_empty_lead_list_is_malformed() {
    let h = harness(false, TransportSignal::HeadersReceived, Ok(serde_json::json!([])));

    let snapshot = h
        .pipeline
        .select(SelectedFile::new("ecg1.npy", vec![1u8]))
        .await
        .unwrap();

    match snapshot.status {
        UploadStatus::Failed { error, .. } => {
            assert!(matches!(error, PipelineError::MalformedWaveform(_)));
            assert!(error.is_contract_violation());
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_parse_failure_ends_run() {
    let h = harness(
        false,
        TransportSignal::HeadersReceived,
        Err(PipelineError::ParseFailed("HTTP 502".to_string())),
    );

    let snapshot = h
        .pipeline
        .select(SelectedFile::new("ecg1.npy", vec![1u8]))
        .await
        .unwrap();

    assert_eq!(
        snapshot.status,
        UploadStatus::Failed {
            file_name: "ecg1.npy".to_string(),
            error: PipelineError::ParseFailed("HTTP 502".to_string()),
        }
    );
}

#[tokio::test]
async fn test_null_samples_pass_through() {
    let h = harness(
        false,
        TransportSignal::HeadersReceived,
        Ok(serde_json::json!([[null, 1, 2, 3, 4, 5.5]])),
    );

    let snapshot = h
        .pipeline
        .select(SelectedFile::new("gap.npy", vec![1u8]))
        .await
        .unwrap();

    let UploadStatus::Ready { samples, .. } = snapshot.status else {
        panic!("expected ready");
    };
    assert_eq!(samples[0].value, None);
    assert_eq!(samples[1].value, Some(5.5));
}

#[tokio::test]
async fn test_invalid_stride_is_rejected_up_front() {
    let log: CallLog = Arc::default();
    let result = UploadPipeline::new(
        0,
        Arc::new(FakePresigner {
            log: log.clone(),
            fail: false,
            gate: None,
        }),
        Arc::new(FakeParser {
            log: log.clone(),
            response: Ok(serde_json::json!([[1]])),
        }),
        Arc::new(FakeTransport {
            log: log.clone(),
            outcome: TransportSignal::HeadersReceived,
        }),
    );

    assert!(matches!(result, Err(PipelineError::InvalidStride(0))));
}

#[tokio::test]
async fn test_empty_file_name_is_rejected() {
    let h = harness(false, TransportSignal::HeadersReceived, Ok(serde_json::json!([[1]])));

    let result = h.pipeline.select(SelectedFile::new("", vec![1u8])).await;

    assert_eq!(result.unwrap_err(), PipelineError::EmptyFileName);
    assert!(calls(&h.log).is_empty());
    assert_eq!(h.pipeline.snapshot().status, UploadStatus::Idle);
}

#[tokio::test]
async fn test_display_samples_from_parse_client() {
    let log: CallLog = Arc::default();
    let parser = FakeParser {
        log: log.clone(),
        response: Ok(serde_json::json!([[0, 1, 2, 3, 4, 5, 6]])),
    };

    let samples = parser.request_display_samples("ecg1.npy", 3).await.unwrap();
    let indices: Vec<usize> = samples.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![0, 3, 6]);

    let err = parser.request_display_samples("ecg1.npy", -2).await.unwrap_err();
    assert_eq!(err, PipelineError::InvalidStride(-2));
    assert_eq!(calls(&log), vec!["parse ecg1.npy"]);
}

#[tokio::test]
async fn test_new_selection_supersedes_running_one() {
    let log: CallLog = Arc::default();
    let gate = Arc::new(Notify::new());
    let pipeline = UploadPipeline::new(
        5,
        Arc::new(FakePresigner {
            log: log.clone(),
            fail: false,
            gate: Some(gate.clone()),
        }),
        Arc::new(FakeParser {
            log: log.clone(),
            response: Ok(serde_json::json!([[1, 2, 3]])),
        }),
        Arc::new(FakeTransport {
            log: log.clone(),
            outcome: TransportSignal::HeadersReceived,
        }),
    )
    .unwrap();

    let slow = pipeline.select(SelectedFile::new("slow.npy", vec![1u8]));
    let fast = async {
        // Let the slow run reach its presign call first
        tokio::task::yield_now().await;
        let snapshot = pipeline
            .select(SelectedFile::new("fast.npy", vec![2u8]))
            .await;
        gate.notify_one();
        snapshot
    };

    let (slow, fast) = tokio::join!(slow, fast);
    let slow = slow.unwrap();
    let fast = fast.unwrap();

    assert_eq!(slow.run_id, 1);
    assert_eq!(slow.status.label(), "awaiting_presign");
    assert_eq!(fast.run_id, 2);
    assert_eq!(fast.status.label(), "ready");

    let current = pipeline.snapshot();
    assert_eq!(current.run_id, 2);
    assert_eq!(current.status.file_name(), Some("fast.npy"));
    assert!(!calls(&log).contains(&"upload slow.npy -> https://s3/".to_string()));
}

/// Keeps an in-flight set like the form transport and can hold the first
/// upload of `slow.npy` until released by the test.
struct TrackingTransport {
    in_flight: Mutex<HashSet<String>>,
    hold: Mutex<Option<Arc<Notify>>>,
}

impl TrackingTransport {
    fn new(hold: Option<Arc<Notify>>) -> Self {
        Self {
            in_flight: Mutex::default(),
            hold: Mutex::new(hold),
        }
    }

    fn is_in_flight(&self, file_name: &str) -> bool {
        self.in_flight.lock().unwrap().contains(file_name)
    }
}

#[async_trait]
impl UploadTransport for TrackingTransport {
    async fn submit(
        &self,
        _destination: &PresignedDestination,
        file: &SelectedFile,
        signals: UnboundedSender<TransportSignal>,
    ) {
        if !self.in_flight.lock().unwrap().insert(file.name.clone()) {
            let _ = signals.send(TransportSignal::Aborted);
            return;
        }
        let _ = signals.send(TransportSignal::Preparing);
        let _ = signals.send(TransportSignal::Uploading);

        let hold = if file.name == "slow.npy" {
            self.hold.lock().unwrap().take()
        } else {
            None
        };
        if let Some(hold) = hold {
            hold.notified().await;
        }
        let _ = signals.send(TransportSignal::HeadersReceived);
    }

    fn release(&self, file_name: &str) {
        self.in_flight.lock().unwrap().remove(file_name);
    }
}

fn tracking_pipeline(transport: Arc<TrackingTransport>) -> UploadPipeline {
    let log: CallLog = Arc::default();
    UploadPipeline::new(
        5,
        Arc::new(FakePresigner {
            log: log.clone(),
            fail: false,
            gate: None,
        }),
        Arc::new(FakeParser {
            log,
            response: Ok(serde_json::json!([[1, 2, 3]])),
        }),
        transport,
    )
    .unwrap()
}

#[tokio::test]
async fn test_file_superseded_during_upload_can_be_selected_again() {
    let hold = Arc::new(Notify::new());
    let transport = Arc::new(TrackingTransport::new(Some(hold.clone())));
    let pipeline = tracking_pipeline(transport.clone());

    let slow = pipeline.select(SelectedFile::new("slow.npy", vec![1u8]));
    let fast = async {
        // Wait until the slow upload is in flight
        while !transport.is_in_flight("slow.npy") {
            tokio::task::yield_now().await;
        }
        let snapshot = pipeline
            .select(SelectedFile::new("fast.npy", vec![2u8]))
            .await;
        hold.notify_one();
        snapshot
    };

    let (slow, fast) = tokio::join!(slow, fast);
    assert_eq!(slow.unwrap().status.label(), "uploading");
    assert_eq!(fast.unwrap().status.label(), "ready");
    assert!(!transport.is_in_flight("slow.npy"));
    assert!(!transport.is_in_flight("fast.npy"));

    let again = pipeline
        .select(SelectedFile::new("slow.npy", vec![1u8]))
        .await
        .unwrap();
    assert_eq!(again.run_id, 3);
    assert_eq!(again.status.label(), "ready");
    assert!(!transport.is_in_flight("slow.npy"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_selections_get_distinct_increasing_runs() {
    let transport = Arc::new(TrackingTransport::new(None));
    let pipeline = Arc::new(tracking_pipeline(transport));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .select(SelectedFile::new(format!("ecg{}.npy", i), vec![1u8]))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut run_ids = Vec::new();
    for handle in handles {
        run_ids.push(handle.await.unwrap().run_id);
    }
    run_ids.sort_unstable();
    assert_eq!(run_ids, (1..=8).collect::<Vec<_>>());

    let current = pipeline.snapshot();
    assert_eq!(current.run_id, 8);
    assert_eq!(current.status.label(), "ready");
}
