use std::sync::Arc;
use std::time::{Duration, Instant};

use bci_daemon::app::{Session, SESSION_RECORD};
use eeg_types::BciConfig;
use session::PlaceholderModel;

/// A short session: 4 channels at 200 Hz, one-second trials.
fn test_config(data_dir: &std::path::Path, amp_id: u32, n_trials: u32) -> Arc<BciConfig> {
    let mut config = BciConfig::default();
    config.global.n_channels = 4;
    config.global.sample_rate = 200;
    config.amplifier.amp_id = amp_id;
    config.stimulus.n_trials = n_trials;
    config.stimulus.inter_trial_interval_ms = 100;
    config.processing.time_per_trial = 1;
    config.processing.time_start = 100;
    config.processing.time_stop = 800;
    config.session.poll_interval_ms = 50;
    config.session.data_dir = data_dir.to_path_buf();
    config.validate().unwrap();
    Arc::new(config)
}

#[test]
fn test_full_session_records_every_trial() {
    let data = tempfile::tempdir().unwrap();
    let config = test_config(data.path(), 9001, 3);
    let session =
        Session::build_with_model(config, Box::new(PlaceholderModel::seeded(11))).unwrap();
    let store = session.store().clone();
    let feedback = session.feedback();

    let summary = session.run().unwrap();

    assert!(summary.finished);
    assert!(!summary.error);
    assert_eq!(summary.trials_completed, 3);
    assert_eq!(summary.latencies_ms.len(), 3);

    let received = feedback.snapshot();
    assert_eq!(received.iter().map(|f| f.trial).collect::<Vec<_>>(), vec![1, 2, 3]);

    for trial in 1..=3u64 {
        let window = store.read_window(trial).unwrap();
        assert_eq!(window.n_channels(), 4);
        assert_eq!(window.n_samples(), 200);

        let result = store.read_result(trial).unwrap();
        assert_eq!(result.y, u8::from(result.y_prob >= 0.5));
        assert!(received[(trial - 1) as usize]
            .text
            .starts_with(&format!("y = {}, y_prob = {:.2}", result.y, result.y_prob)));
    }
    assert!(!store.result_path(4).exists());

    let record: serde_json::Value = serde_json::from_reader(
        std::fs::File::open(store.dir().join(SESSION_RECORD)).unwrap(),
    )
    .unwrap();
    assert_eq!(record["trials_completed"], 3);
    assert_eq!(record["run_id"], store.run_id());
}

#[test]
fn test_stop_request_ends_session_early() {
    let data = tempfile::tempdir().unwrap();
    let config = test_config(data.path(), 9002, 1000);
    let session =
        Session::build_with_model(config, Box::new(PlaceholderModel::seeded(5))).unwrap();
    let stop = session.stop_handle();

    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        stop.request();
    });

    let started = Instant::now();
    let summary = session.run().unwrap();
    stopper.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(summary.finished);
    assert!(!summary.error);
    assert!(summary.trials_completed < 1000);
}

#[test]
fn test_missing_model_file_fails_start() {
    let data = tempfile::tempdir().unwrap();
    let mut config = (*test_config(data.path(), 9003, 3)).clone();
    config.processing.classifier_fname = data.path().join("missing_classifier.bin");

    let session = Session::build(Arc::new(config)).unwrap();
    let store = session.store().clone();
    let err = session.run().unwrap_err();

    assert!(format!("{:#}", err).contains("trial_processor"));
    assert!(!store.window_path(1).exists());
}
