mod common;

use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use image_host_uploader::uploader::hosts::{CheveretoV4Backend, ImgBbBackend, PtpImgBackend};
use image_host_uploader::{AppError, ImageUploader, JobId, UploadOptions, UploadResult};

use common::{fast_settings, init_logging, write_images};

type Events = Arc<Mutex<Vec<(JobId, u8, u8)>>>;

fn recording_uploader(delete_job_as_completed: bool) -> (ImageUploader, Events) {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = events.clone();
    let uploader = ImageUploader::new(delete_job_as_completed).with_progress_sink(
        move |job_id, job_percent, aggregate_percent| {
            sink_events
                .lock()
                .unwrap()
                .push((job_id.clone(), job_percent, aggregate_percent));
        },
    );
    (uploader, events)
}

async fn v4_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/1/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "image": {"url": "https://v4.example/i.png"}
        })))
        .mount(&server)
        .await;
    server
}

async fn ptpimg_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"code": "p", "ext": "png"}])))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn concurrent_jobs_reach_full_progress() {
    init_logging();
    let v4 = v4_server().await;
    let ptp = ptpimg_server().await;
    let dir = tempfile::tempdir().unwrap();

    for delete_job_as_completed in [false, true] {
        let (mut uploader, events) = recording_uploader(delete_job_as_completed);
        uploader.register_backend(
            "v4",
            CheveretoV4Backend::new(&v4.uri(), Some("k"), &fast_settings()).unwrap(),
        );
        uploader.register_backend(
            "ptp",
            PtpImgBackend::with_base_url(Some("k"), &ptp.uri(), &fast_settings()).unwrap(),
        );

        let big = uploader
            .add_job("v4", write_images(dir.path(), "big", 4), UploadOptions::default())
            .unwrap();
        let small = uploader
            .add_job("ptp", write_images(dir.path(), "small", 1), UploadOptions::default())
            .unwrap();
        let empty = uploader.add_job("ptp", Vec::new(), UploadOptions::default());
        assert!(matches!(empty, Err(AppError::Validation { .. })));
        assert_eq!(uploader.pending_jobs(), 2);

        let outcomes = uploader.run_all().await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[&big].as_ref().unwrap().len(), 4);
        assert_eq!(outcomes[&small].as_ref().unwrap().len(), 1);
        assert_eq!(uploader.pending_jobs(), 0);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 5);

        let last_for = |job: &JobId| {
            events
                .iter()
                .filter(|(id, _, _)| id == job)
                .map(|(_, local, _)| *local)
                .last()
        };
        assert_eq!(last_for(&big), Some(100));
        assert_eq!(last_for(&small), Some(100));

        let aggregates: Vec<u8> = events.iter().map(|(_, _, aggregate)| *aggregate).collect();
        assert!(aggregates.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(aggregates.last(), Some(&100));
        assert_eq!(uploader.aggregate_percent(), 100);

        if delete_job_as_completed {
            assert!(uploader.progress(&big).is_none());
            assert!(uploader.progress(&small).is_none());
        } else {
            assert_eq!(uploader.progress(&big).unwrap().remaining, 0);
        }
    }
}

#[tokio::test]
async fn second_run_reports_only_its_own_jobs() {
    init_logging();
    let v4 = v4_server().await;
    let dir = tempfile::tempdir().unwrap();

    let (mut uploader, events) = recording_uploader(true);
    uploader.register_backend(
        "v4",
        CheveretoV4Backend::new(&v4.uri(), Some("k"), &fast_settings()).unwrap(),
    );

    uploader
        .add_job("v4", write_images(dir.path(), "first", 4), UploadOptions::default())
        .unwrap();
    uploader.run_all().await;
    events.lock().unwrap().clear();

    let second = uploader
        .add_job("v4", write_images(dir.path(), "second", 4), UploadOptions::default())
        .unwrap();
    uploader.run_all().await;

    let events = events.lock().unwrap();
    let progress: Vec<(u8, u8)> = events
        .iter()
        .filter(|(id, _, _)| *id == second)
        .map(|(_, local, aggregate)| (*local, *aggregate))
        .collect();
    assert_eq!(progress, vec![(25, 25), (50, 50), (75, 75), (100, 100)]);
}

#[tokio::test]
async fn failing_job_does_not_cancel_its_siblings() {
    init_logging();
    let v4 = v4_server().await;
    let dir = tempfile::tempdir().unwrap();

    let (mut uploader, events) = recording_uploader(false);
    uploader.register_backend(
        "v4",
        CheveretoV4Backend::new(&v4.uri(), Some("k"), &fast_settings()).unwrap(),
    );
    uploader.register_backend("keyless", ImgBbBackend::new(None, &fast_settings()).unwrap());

    let good = uploader
        .add_job("v4", write_images(dir.path(), "good", 3), UploadOptions::default())
        .unwrap();
    let bad = uploader
        .add_job("keyless", write_images(dir.path(), "bad", 2), UploadOptions::default())
        .unwrap();

    let outcomes = uploader.run_all().await;

    assert!(matches!(outcomes[&bad], Err(AppError::Configuration(_))));
    let results = outcomes[&good].as_ref().unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.values().all(UploadResult::is_success));

    let events = events.lock().unwrap();
    assert!(events.iter().all(|(id, _, _)| *id == good));
    assert_eq!(events.len(), 3);
}

#[tokio::test]
async fn unknown_host_is_rejected_when_queueing() {
    let mut uploader = ImageUploader::new(false);
    let result = uploader.add_job(
        "nowhere",
        vec!["a.png".into()],
        UploadOptions::default(),
    );
    assert!(matches!(result, Err(AppError::UnknownHost { host }) if host == "nowhere"));
    assert_eq!(uploader.pending_jobs(), 0);
}

#[tokio::test]
async fn registering_twice_replaces_the_backend() {
    init_logging();
    let ptp = ptpimg_server().await;
    let dir = tempfile::tempdir().unwrap();

    let mut uploader = ImageUploader::new(false);
    uploader.register_backend("host", ImgBbBackend::new(None, &fast_settings()).unwrap());
    uploader.register_backend(
        "host",
        PtpImgBackend::with_base_url(Some("k"), &ptp.uri(), &fast_settings()).unwrap(),
    );

    let job = uploader
        .add_job("host", write_images(dir.path(), "shot", 2), UploadOptions::default())
        .unwrap();
    assert_eq!(uploader.progress(&job).unwrap().remaining, 2);

    let mut outcomes: HashMap<_, _> = uploader.run_all().await;
    let results = outcomes.remove(&job).unwrap().unwrap();
    assert_eq!(
        results[&0].primary_url,
        Some(format!("{}/p.png", ptp.uri()))
    );
}

#[tokio::test]
async fn running_an_empty_queue_is_a_no_op() {
    let mut uploader = ImageUploader::new(true);
    assert!(uploader.run_all().await.is_empty());
}
