mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use common::*;
use dicom_dictionary_std::{tags, uids};
use dicom_object::meta::FileMetaTableBuilder;
use dimse::types::{STATUS_OUT_OF_RESOURCES, STATUS_SUB_OPERATIONS_WARNING, STATUS_UNABLE_TO_PROCESS};
use dimse::{total_of, DimseStatus, ProgressState, ProgressStatus, ProgressTracker};
use stowrs::config::StowConfig;
use stowrs::stow::{StowError, StowUploader, DEFAULT_USER_AGENT};

fn uploader_for(mock: &MockStow) -> StowUploader {
    let mut config = StowConfig::new(&mock.url);
    config
        .headers
        .insert("Authorization".to_string(), "Bearer test-token".to_string());
    StowUploader::new(&config).expect("uploader")
}

#[tokio::test]
async fn upload_file_streams_the_file_unmodified() {
    let mock = spawn_mock(StatusCode::OK, "{}").await;
    let dir = tempfile::tempdir().unwrap();
    let path = write_sample(dir.path(), "1.2.826.0.1.3680043.10.999.1.1.1");
    let original = std::fs::read(&path).unwrap();

    let uploader = uploader_for(&mock);
    let response = uploader.upload_file(&path).await.expect("upload");
    assert_eq!(response.status, 200);
    assert_eq!(response.outcome, ProgressStatus::Completed);

    let request = mock.last();
    assert_eq!(
        request.headers["content-type"],
        "multipart/related;type=\"application/dicom\";boundary=mimeTypeBoundary"
    );
    assert_eq!(request.headers["accept"], "application/dicom+json");
    assert_eq!(request.headers["user-agent"], DEFAULT_USER_AGENT);
    assert_eq!(request.headers["authorization"], "Bearer test-token");

    let parts = split_parts(&request.body);
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].header("Content-Type"), Some("application/dicom"));
    assert_eq!(parts[0].header("Content-Location"), None);
    assert_eq!(parts[0].content, original);
}

#[tokio::test]
async fn missing_file_fails_before_sending() {
    let mock = spawn_mock(StatusCode::OK, "{}").await;
    let uploader = uploader_for(&mock);

    let result = uploader.upload_file("/no/such/instance.dcm").await;
    assert!(matches!(result, Err(StowError::Io(_))));
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn service_error_is_reported_with_body() {
    let mock = spawn_mock(StatusCode::INTERNAL_SERVER_ERROR, "storage full").await;
    let dir = tempfile::tempdir().unwrap();
    let path = write_sample(dir.path(), "1.2.826.0.1.3680043.10.999.1.1.2");

    let uploader = uploader_for(&mock);
    match uploader.upload_file(&path).await {
        Err(StowError::Status { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "storage full");
        }
        other => panic!("expected a status error, got {:?}", other),
    }
}

#[tokio::test]
async fn accepted_with_warnings_is_a_warning() {
    let mock = spawn_mock(StatusCode::ACCEPTED, "{}").await;
    let dir = tempfile::tempdir().unwrap();
    let path = write_sample(dir.path(), "1.2.826.0.1.3680043.10.999.1.1.3");

    let response = uploader_for(&mock).upload_file(&path).await.unwrap();
    assert_eq!(response.status, 202);
    assert_eq!(response.outcome, ProgressStatus::Warning);
}

#[tokio::test]
async fn failed_sop_sequence_downgrades_success() {
    let mock = spawn_mock(
        StatusCode::OK,
        r#"{"00081198":{"vr":"SQ","Value":[{"00081197":{"vr":"US","Value":[272]}}]}}"#,
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let path = write_sample(dir.path(), "1.2.826.0.1.3680043.10.999.1.1.4");

    let response = uploader_for(&mock).upload_file(&path).await.unwrap();
    assert_eq!(response.outcome, ProgressStatus::Warning);
}

#[tokio::test]
async fn unreachable_service_is_out_of_resources() {
    // Grab a free port and release it so nothing listens there
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let path = write_sample(dir.path(), "1.2.826.0.1.3680043.10.999.1.1.5");
    let uploader =
        StowUploader::new(&StowConfig::new(format!("http://{}/studies", addr))).unwrap();

    let err = uploader.upload_file(&path).await.unwrap_err();
    assert!(matches!(err, StowError::Http(_)));
    assert_eq!(err.dimse_status(), STATUS_OUT_OF_RESOURCES);
}

#[tokio::test]
async fn upload_stream_prefixes_fresh_file_meta() {
    let mock = spawn_mock(StatusCode::OK, "{}").await;
    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
        .media_storage_sop_class_uid(uids::SECONDARY_CAPTURE_IMAGE_STORAGE)
        .media_storage_sop_instance_uid("1.2.826.0.1.3680043.10.999.1.1.6")
        .build()
        .unwrap();
    let dataset_bytes = b"caller encoded dataset".to_vec();

    let response = uploader_for(&mock)
        .upload_stream(std::io::Cursor::new(dataset_bytes.clone()), &meta)
        .await
        .unwrap();
    assert_eq!(response.outcome, ProgressStatus::Completed);

    let parts = split_parts(&mock.last().body);
    assert_eq!(parts.len(), 1);
    let content = &parts[0].content;
    assert!(content[..128].iter().all(|b| *b == 0));
    assert_eq!(&content[128..132], b"DICM");
    assert!(find(content, b"1.2.826.0.1.3680043.10.999.1.1.6").is_some());
    assert!(content.ends_with(&dataset_bytes));
}

#[tokio::test]
async fn upload_dataset_sends_the_edited_instance() {
    let mock = spawn_mock(StatusCode::OK, "{}").await;
    let mut dataset = sample_dataset("1.2.826.0.1.3680043.10.999.1.1.7");
    dataset.put_str(tags::PATIENT_NAME, dicom_core::VR::PN, "Override^Patient^Name");

    uploader_for(&mock)
        .upload_dataset(&dataset, uids::EXPLICIT_VR_LITTLE_ENDIAN)
        .await
        .unwrap();

    let parts = split_parts(&mock.last().body);
    let content = &parts[0].content;
    assert_eq!(&content[128..132], b"DICM");
    assert!(find(content, b"Override^Patient^Name").is_some());
    assert!(find(content, b"DOE^JOHN").is_none());
}

#[tokio::test]
async fn upload_dataset_requires_sop_identity() {
    let mock = spawn_mock(StatusCode::OK, "{}").await;
    let dataset = dicom_object::InMemDicomObject::new_empty();

    let result = uploader_for(&mock)
        .upload_dataset(&dataset, uids::EXPLICIT_VR_LITTLE_ENDIAN)
        .await;
    assert!(matches!(result, Err(StowError::Encoding(_))));
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn sequential_uploads_do_not_leak_parts() {
    let mock = spawn_mock(StatusCode::OK, "{}").await;
    let dir = tempfile::tempdir().unwrap();
    let first = write_sample(dir.path(), "1.2.826.0.1.3680043.10.999.1.2.1");
    let second = write_sample(dir.path(), "1.2.826.0.1.3680043.10.999.1.2.2");

    let uploader = uploader_for(&mock);
    uploader.upload_file(&first).await.unwrap();
    uploader.upload_file(&second).await.unwrap();

    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    let parts = split_parts(&requests[1].body);
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].content, std::fs::read(&second).unwrap());
    assert!(find(&requests[1].body, b"1.2.826.0.1.3680043.10.999.1.2.1").is_none());
}

#[tokio::test]
async fn close_cancels_the_exchange_in_flight() {
    let mock = spawn_mock_with_delay(StatusCode::OK, "{}", Duration::from_secs(5)).await;
    let dir = tempfile::tempdir().unwrap();
    let path = write_sample(dir.path(), "1.2.826.0.1.3680043.10.999.1.3.1");

    let uploader = Arc::new(uploader_for(&mock));
    let task = {
        let uploader = uploader.clone();
        let path = path.clone();
        tokio::spawn(async move { uploader.upload_file(&path).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    uploader.close();
    uploader.close();

    let result = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("cancellation should be prompt")
        .unwrap();
    assert!(matches!(result, Err(StowError::Cancelled)));
    assert!(matches!(
        uploader.upload_file(&path).await,
        Err(StowError::Closed)
    ));
}

#[tokio::test]
async fn store_files_accounts_every_instance() {
    let mock = spawn_mock(StatusCode::OK, "{}").await;
    let dir = tempfile::tempdir().unwrap();
    let files: Vec<_> = (1..=3)
        .map(|i| write_sample(dir.path(), &format!("1.2.826.0.1.3680043.10.999.1.4.{}", i)))
        .collect();

    let tracker = Arc::new(ProgressTracker::new());
    let notifications = Arc::new(AtomicUsize::new(0));
    {
        let notifications = notifications.clone();
        tracker.add_listener(Arc::new(move |_: &ProgressState| {
            notifications.fetch_add(1, Ordering::SeqCst);
        }));
    }

    let state = uploader_for(&mock)
        .store_files(&files, Some(tracker.clone()))
        .await;

    assert_eq!(state.status(), DimseStatus::Success);
    assert!(state.message().is_some());
    assert_eq!(notifications.load(Ordering::SeqCst), 3);

    let snapshot = tracker.snapshot().unwrap();
    assert_eq!(snapshot.completed, 3);
    assert_eq!(snapshot.failed, 0);
    assert_eq!(snapshot.remaining, 0);
    assert_eq!(
        snapshot.affected_sop_instance_uid.as_deref(),
        Some("1.2.826.0.1.3680043.10.999.1.4.3")
    );
    assert_eq!(mock.requests().len(), 3);
}

#[tokio::test]
async fn store_files_partial_failure_is_a_warning() {
    let mock = spawn_mock(StatusCode::OK, "{}").await;
    let dir = tempfile::tempdir().unwrap();
    let not_dicom = dir.path().join("notes.txt");
    std::fs::write(&not_dicom, b"not a DICOM file").unwrap();
    let files = vec![
        write_sample(dir.path(), "1.2.826.0.1.3680043.10.999.1.5.1"),
        write_sample(dir.path(), REJECTED_UID),
        not_dicom,
        write_sample(dir.path(), "1.2.826.0.1.3680043.10.999.1.5.2"),
    ];

    let tracker = Arc::new(ProgressTracker::new());
    let state = uploader_for(&mock)
        .store_files(&files, Some(tracker.clone()))
        .await;

    assert_eq!(
        state.status(),
        DimseStatus::Warning(STATUS_SUB_OPERATIONS_WARNING)
    );
    assert!(state.message().unwrap().contains("2 of 4"));

    let snapshot = tracker.snapshot().unwrap();
    assert_eq!(snapshot.completed, 2);
    assert_eq!(snapshot.failed, 2);
    assert_eq!(snapshot.remaining, 0);
    // The unreadable file never reaches the service
    assert_eq!(mock.requests().len(), 3);
}

#[tokio::test]
async fn store_files_total_failure() {
    let mock = spawn_mock(StatusCode::SERVICE_UNAVAILABLE, "maintenance").await;
    let dir = tempfile::tempdir().unwrap();
    let files = vec![
        write_sample(dir.path(), "1.2.826.0.1.3680043.10.999.1.6.1"),
        write_sample(dir.path(), "1.2.826.0.1.3680043.10.999.1.6.2"),
    ];

    let state = uploader_for(&mock).store_files(&files, None).await;
    assert_eq!(state.status(), DimseStatus::Failure(STATUS_UNABLE_TO_PROCESS));
    assert!(state.message().unwrap().contains("All 2"));
    assert!(state.progress().is_none());
}

#[tokio::test]
async fn store_files_server_error_fails_the_batch() {
    let mock = spawn_mock(StatusCode::INTERNAL_SERVER_ERROR, "database unavailable").await;
    let dir = tempfile::tempdir().unwrap();
    let files = vec![write_sample(dir.path(), "1.2.826.0.1.3680043.10.999.1.6.3")];

    let tracker = Arc::new(ProgressTracker::new());
    let state = uploader_for(&mock)
        .store_files(&files, Some(tracker.clone()))
        .await;

    assert_eq!(state.status(), DimseStatus::Failure(STATUS_UNABLE_TO_PROCESS));
    assert!(!state.message().unwrap().is_empty());
    let snapshot = tracker.snapshot().unwrap();
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.remaining, 0);
    assert_eq!(snapshot.status, Some(STATUS_UNABLE_TO_PROCESS));
}

#[tokio::test]
async fn tracker_reused_across_batches_starts_fresh() {
    let mock = spawn_mock(StatusCode::OK, "{}").await;
    let dir = tempfile::tempdir().unwrap();
    let first = vec![
        write_sample(dir.path(), "1.2.826.0.1.3680043.10.999.1.8.1"),
        write_sample(dir.path(), "1.2.826.0.1.3680043.10.999.1.8.2"),
    ];
    let second = vec![
        write_sample(dir.path(), "1.2.826.0.1.3680043.10.999.1.8.3"),
        write_sample(dir.path(), "1.2.826.0.1.3680043.10.999.1.8.4"),
    ];

    let uploader = uploader_for(&mock);
    let tracker = Arc::new(ProgressTracker::new());
    uploader.store_files(&first, Some(tracker.clone())).await;
    assert_eq!(total_of(tracker.snapshot().as_ref()), 2);

    let state = uploader.store_files(&second, Some(tracker.clone())).await;
    assert_eq!(state.status(), DimseStatus::Success);

    let snapshot = tracker.snapshot().unwrap();
    assert_eq!(snapshot.completed, 2);
    assert_eq!(snapshot.remaining, 0);
    assert_eq!(total_of(Some(&snapshot)), 2);
    assert_eq!(
        snapshot.affected_sop_instance_uid.as_deref(),
        Some("1.2.826.0.1.3680043.10.999.1.8.4")
    );
}

#[tokio::test]
async fn store_files_stops_when_cancelled() {
    let mock = spawn_mock(StatusCode::OK, "{}").await;
    let dir = tempfile::tempdir().unwrap();
    let files = vec![
        write_sample(dir.path(), "1.2.826.0.1.3680043.10.999.1.7.1"),
        write_sample(dir.path(), "1.2.826.0.1.3680043.10.999.1.7.2"),
    ];

    let tracker = Arc::new(ProgressTracker::new());
    tracker.cancel();
    let state = uploader_for(&mock)
        .store_files(&files, Some(tracker.clone()))
        .await;

    assert_eq!(state.status(), DimseStatus::Cancel);
    assert!(tracker.snapshot().is_none());
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn store_files_with_no_input_succeeds() {
    let mock = spawn_mock(StatusCode::OK, "{}").await;
    let state = uploader_for(&mock).store_files(&[], None).await;
    assert_eq!(state.status(), DimseStatus::Success);
    assert!(mock.requests().is_empty());
}
