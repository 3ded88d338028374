//! Upload driver tests against the in-memory remote store

use drivesync::progress::ProgressReporter;
use drivesync::remote::{Faults, MemoryRemote, RemoteCall, RemoteStore};
use drivesync::upload::{SessionState, UploadDriver};
use drivesync::{Error, ErrorKind, UploadMode, UploadOptions};
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};
use tokio_util::sync::CancellationToken;

const BLOCK: usize = 1024;

fn patterned(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i * 13 + 5) % 251) as u8 ^ seed)
        .collect()
}

fn options(chunk_size: usize, jobs: usize) -> UploadOptions {
    UploadOptions {
        block_size: BLOCK,
        savings_threshold_percent: 20.0,
        chunk_size,
        jobs,
    }
}

fn setup(chunk_size: usize, jobs: usize) -> (MemoryRemote, UploadDriver) {
    let remote = MemoryRemote::with_block_size(BLOCK);
    let driver = UploadDriver::new(RemoteStore::Memory(remote.clone()), options(chunk_size, jobs));
    (remote, driver)
}

fn write_file(data: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
    file
}

fn chunk_calls(calls: &[RemoteCall]) -> usize {
    calls
        .iter()
        .filter(|c| matches!(c, RemoteCall::TransmitChunk { .. }))
        .count()
}

fn completes(calls: &[RemoteCall]) -> usize {
    calls
        .iter()
        .filter(|c| matches!(c, RemoteCall::CompleteSession { .. }))
        .count()
}

#[tokio::test]
async fn test_full_upload_stores_content() {
    let (remote, driver) = setup(1000, 1);
    let data = patterned(4500, 1);
    let file = write_file(&data);

    let outcome = driver
        .smart_upload(
            file.path(),
            None,
            Some("folder-1"),
            &ProgressReporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.mode, UploadMode::Full);
    assert_eq!(outcome.bytes_sent, 4500);
    assert_eq!(remote.file_data(&outcome.file_id).unwrap(), data);
    assert_eq!(chunk_calls(&remote.calls()), 5);
    assert_eq!(remote.open_session_count(), 0);
}

#[tokio::test]
async fn test_parallel_chunks_finalize_after_all_acks() {
    let (remote, driver) = setup(512, 4);
    let data = patterned(10_000, 2);
    let file = write_file(&data);

    let outcome = driver
        .full_upload(
            file.path(),
            None,
            &ProgressReporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(remote.file_data(&outcome.file_id).unwrap(), data);

    let calls = remote.calls();
    assert_eq!(chunk_calls(&calls), 20);
    assert!(matches!(calls.last(), Some(RemoteCall::CompleteSession { .. })));
}

#[tokio::test]
async fn test_delta_upload_sends_only_changed_block() {
    let (remote, driver) = setup(4096, 1);
    let original = patterned(10_000, 3);
    let base_id = remote.insert_file("notes.txt", original.clone());

    let mut edited = original.clone();
    edited[9_900] ^= 0x55;
    let file = write_file(&edited);

    let outcome = driver
        .smart_upload(
            file.path(),
            Some(&base_id),
            None,
            &ProgressReporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.mode, UploadMode::Delta);
    assert_eq!(outcome.stats.novel_blocks, 1);
    assert_eq!(outcome.bytes_sent, (10_000 - 9 * BLOCK) as u64);
    assert_eq!(remote.file_data(&outcome.file_id).unwrap(), edited);

    let calls = remote.calls();
    assert_eq!(chunk_calls(&calls), 0);
    assert!(calls.iter().any(|c| matches!(
        c,
        RemoteCall::TransmitDelta { novel_blocks: 1, .. }
    )));

    let states: Vec<&str> = driver.last_session_history().iter().map(SessionState::name).collect();
    assert_eq!(states, vec!["init", "transmitting", "finalizing", "complete"]);
}

#[tokio::test]
async fn test_missing_signature_falls_back_to_full() {
    let (remote, driver) = setup(4096, 1);
    let data = patterned(6000, 4);
    let file = write_file(&data);

    let outcome = driver
        .smart_upload(
            file.path(),
            Some("no-such-file"),
            None,
            &ProgressReporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.mode, UploadMode::Full);
    assert_eq!(remote.file_data(&outcome.file_id).unwrap(), data);
    assert!(matches!(remote.calls()[0], RemoteCall::FetchSignature { .. }));
}

#[tokio::test]
async fn test_hidden_signatures_fall_back_to_full() {
    let (remote, driver) = setup(4096, 1);
    let base_id = remote.insert_file("a.bin", patterned(6000, 4));
    remote.set_faults(Faults {
        hide_signatures: true,
        ..Default::default()
    });
    let file = write_file(&patterned(6000, 4));

    let outcome = driver
        .smart_upload(
            file.path(),
            Some(&base_id),
            None,
            &ProgressReporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.mode, UploadMode::Full);
}

#[tokio::test]
async fn test_rewritten_file_falls_back_to_full() {
    let (remote, driver) = setup(4096, 1);
    let base_id = remote.insert_file("a.bin", patterned(8000, 1));
    let data = patterned(8000, 9);
    let file = write_file(&data);

    let outcome = driver
        .smart_upload(
            file.path(),
            Some(&base_id),
            None,
            &ProgressReporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.mode, UploadMode::Full);
    assert_eq!(outcome.stats.savings_percent, 0.0);
    assert_eq!(remote.file_data(&outcome.file_id).unwrap(), data);
    assert!(!remote
        .calls()
        .iter()
        .any(|c| matches!(c, RemoteCall::TransmitDelta { .. })));
}

#[tokio::test]
async fn test_chunk_failure_never_finalizes() {
    let (remote, driver) = setup(1000, 1);
    remote.set_faults(Faults {
        fail_chunk: Some(2),
        ..Default::default()
    });
    let file = write_file(&patterned(5000, 5));

    let err = driver
        .full_upload(
            file.path(),
            None,
            &ProgressReporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transmission);
    assert!(err.is_retryable());

    let calls = remote.calls();
    assert_eq!(completes(&calls), 0);
    assert_eq!(chunk_calls(&calls), 3);

    let history = driver.last_session_history();
    assert!(matches!(
        history.last(),
        Some(SessionState::Failed {
            kind: ErrorKind::Transmission,
            ..
        })
    ));
    assert!(!history.iter().any(|s| matches!(s, SessionState::Finalizing)));

    // A retry is a brand-new session from Init
    remote.set_faults(Faults::default());
    let outcome = driver
        .full_upload(
            file.path(),
            None,
            &ProgressReporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let opened = remote
        .calls()
        .iter()
        .filter(|c| matches!(c, RemoteCall::OpenSession { .. }))
        .count();
    assert_eq!(opened, 2);
    assert_eq!(driver.last_session_history()[0], SessionState::Init);
    assert!(remote.file_data(&outcome.file_id).is_some());
}

#[tokio::test]
async fn test_session_open_failure() {
    let (remote, driver) = setup(1000, 1);
    remote.set_faults(Faults {
        reject_open: true,
        ..Default::default()
    });
    let file = write_file(b"payload");

    let err = driver
        .full_upload(
            file.path(),
            None,
            &ProgressReporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SessionOpen { .. }));
    assert!(!err.is_retryable());
    assert_eq!(chunk_calls(&remote.calls()), 0);
}

#[tokio::test]
async fn test_finalize_failure_is_terminal() {
    let (remote, driver) = setup(1000, 1);
    remote.set_faults(Faults {
        fail_complete: true,
        ..Default::default()
    });
    let file = write_file(&patterned(2500, 6));

    let err = driver
        .full_upload(
            file.path(),
            None,
            &ProgressReporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Finalize);
    let states: Vec<&str> = driver.last_session_history().iter().map(SessionState::name).collect();
    assert_eq!(states, vec!["init", "transmitting", "finalizing", "failed"]);
}

#[tokio::test]
async fn test_delta_transmission_failure() {
    let (remote, driver) = setup(4096, 1);
    let original = patterned(9000, 7);
    let base_id = remote.insert_file("a.bin", original.clone());
    remote.set_faults(Faults {
        fail_delta: true,
        ..Default::default()
    });

    let mut edited = original;
    edited[0] ^= 1;
    let file = write_file(&edited);

    let err = driver
        .smart_upload(
            file.path(),
            Some(&base_id),
            None,
            &ProgressReporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transmission);
    assert_eq!(completes(&remote.calls()), 0);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let (remote, driver) = setup(1000, 1);
    let file = write_file(&patterned(3000, 8));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = driver
        .full_upload(file.path(), None, &ProgressReporter::disabled(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert!(remote.calls().is_empty());
    assert!(matches!(
        driver.last_session_history().last(),
        Some(SessionState::Failed {
            kind: ErrorKind::Cancelled,
            ..
        })
    ));
}

#[tokio::test]
async fn test_cancel_mid_transmission_skips_finalize() {
    let (remote, driver) = setup(100, 1);
    let file = write_file(&patterned(5000, 9));
    let cancel = CancellationToken::new();
    let (reporter, mut rx) = ProgressReporter::channel();

    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if event.fraction >= 0.2 {
                    cancel.cancel();
                }
            }
        })
    };

    let err = driver
        .full_upload(file.path(), None, &reporter, &cancel)
        .await
        .unwrap_err();
    drop(reporter);
    watcher.await.unwrap();

    assert!(matches!(err, Error::Cancelled));
    let calls = remote.calls();
    assert_eq!(completes(&calls), 0);
    assert!(chunk_calls(&calls) < 50);
}

#[tokio::test]
async fn test_progress_is_monotonic_and_reaches_one() {
    let (_remote, driver) = setup(700, 3);
    let file = write_file(&patterned(10_000, 10));
    let (reporter, mut rx) = ProgressReporter::channel();

    driver
        .full_upload(file.path(), None, &reporter, &CancellationToken::new())
        .await
        .unwrap();
    drop(reporter);

    let mut fractions = Vec::new();
    while let Some(event) = rx.recv().await {
        fractions.push(event.fraction);
    }

    assert!(!fractions.is_empty());
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    assert!(fractions.iter().all(|f| (0.0..=1.0).contains(f)));
    assert_eq!(*fractions.last().unwrap(), 1.0);
}

#[tokio::test]
async fn test_empty_file_against_existing_version() {
    let (remote, driver) = setup(1000, 1);
    let base_id = remote.insert_file("a.bin", patterned(3000, 11));
    let file = write_file(&[]);

    let outcome = driver
        .smart_upload(
            file.path(),
            Some(&base_id),
            None,
            &ProgressReporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.mode, UploadMode::Delta);
    assert_eq!(outcome.bytes_sent, 0);
    assert_eq!(outcome.stats.savings_percent, 100.0);
    assert!(remote.file_data(&outcome.file_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_file_full_upload() {
    let (remote, driver) = setup(1000, 1);
    let file = write_file(&[]);

    let outcome = driver
        .full_upload(
            file.path(),
            None,
            &ProgressReporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(chunk_calls(&remote.calls()), 0);
    assert!(remote.file_data(&outcome.file_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_block_size_follows_stored_signature() {
    let remote = MemoryRemote::with_block_size(2048);
    let driver = UploadDriver::new(RemoteStore::Memory(remote.clone()), options(4096, 1));

    let original = patterned(8192, 12);
    let base_id = remote.insert_file("a.bin", original.clone());
    let mut edited = original;
    edited[100] ^= 1;
    let file = write_file(&edited);

    let outcome = driver
        .smart_upload(
            file.path(),
            Some(&base_id),
            None,
            &ProgressReporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.mode, UploadMode::Delta);
    assert_eq!(outcome.stats.total_blocks, 4);
    assert_eq!(outcome.bytes_sent, 2048);
    assert_eq!(remote.file_data(&outcome.file_id).unwrap(), edited);
}

#[tokio::test]
async fn test_path_without_file_name_is_rejected() {
    let (_remote, driver) = setup(1000, 1);
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("..");

    let err = driver
        .full_upload(
            &root,
            None,
            &ProgressReporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
}

#[tokio::test]
async fn test_signature_error_falls_back_to_full() {
    let (remote, driver) = setup(4096, 1);
    let base_id = remote.insert_file("a.bin", patterned(6000, 4));
    remote.set_faults(Faults {
        signature_error: true,
        ..Default::default()
    });
    let data = patterned(6000, 4);
    let file = write_file(&data);

    let outcome = driver
        .smart_upload(
            file.path(),
            Some(&base_id),
            None,
            &ProgressReporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.mode, UploadMode::Full);
    assert_eq!(remote.file_data(&outcome.file_id).unwrap(), data);
}

#[tokio::test]
async fn test_corrupt_signature_falls_back_to_full() {
    let (remote, driver) = setup(4096, 1);
    let base_id = remote.insert_file("a.bin", patterned(6000, 4));
    remote.set_faults(Faults {
        corrupt_signatures: true,
        ..Default::default()
    });
    let file = write_file(&patterned(6000, 4));

    let outcome = driver
        .smart_upload(
            file.path(),
            Some(&base_id),
            None,
            &ProgressReporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.mode, UploadMode::Full);
    assert!(!remote
        .calls()
        .iter()
        .any(|c| matches!(c, RemoteCall::TransmitDelta { .. })));
}

#[tokio::test]
async fn test_oversized_stored_block_size_falls_back_to_full() {
    let remote = MemoryRemote::with_block_size(isize::MAX as usize + 1);
    let driver = UploadDriver::new(RemoteStore::Memory(remote.clone()), options(4096, 1));
    let base_id = remote.insert_file("a.bin", patterned(5000, 2));
    let data = patterned(5000, 3);
    let file = write_file(&data);

    let outcome = driver
        .smart_upload(
            file.path(),
            Some(&base_id),
            None,
            &ProgressReporter::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.mode, UploadMode::Full);
    assert_eq!(remote.file_data(&outcome.file_id).unwrap(), data);
}

#[tokio::test]
async fn test_empty_upload_reports_nothing_before_commit() {
    let (remote, driver) = setup(1000, 1);
    remote.set_faults(Faults {
        fail_complete: true,
        ..Default::default()
    });
    let file = write_file(&[]);
    let (reporter, mut rx) = ProgressReporter::channel();

    let err = driver
        .full_upload(file.path(), None, &reporter, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Finalize);
    assert_eq!(reporter.fraction(), 0.0);
    drop(reporter);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_empty_upload_reaches_one_after_commit() {
    let (_remote, driver) = setup(1000, 1);
    let file = write_file(&[]);
    let (reporter, mut rx) = ProgressReporter::channel();

    driver
        .full_upload(file.path(), None, &reporter, &CancellationToken::new())
        .await
        .unwrap();
    drop(reporter);

    let event = rx.recv().await.unwrap();
    assert_eq!(event.fraction, 1.0);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_unchanged_delta_reports_nothing_before_ack() {
    let (remote, driver) = setup(4096, 1);
    let data = patterned(8192, 13);
    let base_id = remote.insert_file("a.bin", data.clone());
    remote.set_faults(Faults {
        fail_delta: true,
        ..Default::default()
    });
    let file = write_file(&data);
    let reporter = ProgressReporter::disabled();

    let err = driver
        .smart_upload(
            file.path(),
            Some(&base_id),
            None,
            &reporter,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transmission);
    assert_eq!(reporter.fraction(), 0.0);
}

#[tokio::test]
async fn test_find_existing_by_name_and_folder() {
    let (remote, driver) = setup(1000, 1);
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, b"new content").unwrap();

    let cancel = CancellationToken::new();
    assert_eq!(driver.find_existing(&path, Some("docs"), &cancel).await, None);

    let stored = remote.insert_file_in("notes.txt", Some("docs"), b"old content".to_vec());
    remote.insert_file("notes.txt", b"root copy".to_vec());

    assert_eq!(
        driver.find_existing(&path, Some("docs"), &cancel).await,
        Some(stored)
    );
    assert!(remote.calls().iter().any(|c| matches!(
        c,
        RemoteCall::FindFile { folder: Some(f), .. } if f == "docs"
    )));
}
