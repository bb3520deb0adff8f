//! Pipeline tests: intake through packaging with a fake separator and mixer.

mod common;

use std::time::Duration;

use common::{tagged_wav, write_wav, FakeSeparator, TestHarness};
use stemforged::pipeline::sidecar::{read_record, CoverArtSource};
use stemforged::pipeline::{enqueue_file, IntakeRequest};
use stemforged::worker;
use stemforged_common::{JobId, JobSource, JobStatus, PipelineSettings, StemCount};
use stemforged_db::models::Job;
use stemforged_db::queries::jobs::{self, NewJob};

async fn enqueue(h: &TestHarness, path: &std::path::Path, stems: Option<&str>) -> Job {
    let name = path.file_name().unwrap().to_str().unwrap();
    let request = IntakeRequest::new(name, JobSource::Cli).with_stems(stems.map(String::from));
    enqueue_file(&h.pipeline, request, path).await.unwrap()
}

fn reload(h: &TestHarness, id: JobId) -> Job {
    jobs::get_job(&h.conn(), id).unwrap().unwrap()
}

#[tokio::test]
async fn tagged_input_is_packaged_without_vocals() {
    let h = TestHarness::new();
    let src = h.data_path().join("song.wav");
    tagged_wav(&src, "A", "B", "C");

    let job = enqueue(&h, &src, None).await;
    assert_eq!(job.settings.stem_types, "drums,bass,other");
    assert!(src.exists(), "intake copies, it does not move");

    h.drain().await;

    let done = reload(&h, job.id);
    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.completed_at.is_some());
    assert!(done.error.is_none());

    let layout = &h.pipeline.layout;
    let output = layout.output.join("A").join("B").join("C.wav");
    assert_eq!(done.output_path.as_deref(), Some(output.to_str().unwrap()));
    assert!(output.exists());

    let tags = stemforged_av::read_tags(&output).unwrap().tags;
    assert_eq!(tags.artist.as_deref(), Some("A"));
    assert_eq!(tags.album.as_deref(), Some("B"));
    assert_eq!(tags.title.as_deref(), Some("C"));

    assert_eq!(h.separator.calls(), 1);
    assert_eq!(
        h.mixer.mixed_stems(),
        vec![vec!["drums".to_string(), "bass".to_string(), "other".to_string()]]
    );

    // Intermediates are gone and the run is logged.
    assert!(!layout.queue_file(&done.filename).exists());
    assert!(!layout.jobstate_file(&done.filename).exists());
    assert!(!layout.stems_dir(done.id).exists());
    assert!(!layout.sidecar(done.id).exists());
    let log = std::fs::read_to_string(layout.processed_log()).unwrap();
    assert!(log.contains(&done.id.to_string()));
}

#[tokio::test]
async fn untagged_input_uses_fallbacks() {
    let h = TestHarness::new();
    let src = h.data_path().join("Lonely Tune.wav");
    write_wav(&src);

    let job = enqueue(&h, &src, Some("vocals")).await;
    h.drain().await;

    let done = reload(&h, job.id);
    assert_eq!(done.status, JobStatus::Completed);
    let output = h
        .pipeline
        .layout
        .output
        .join("Unknown Artist")
        .join("Unknown Album")
        .join("Lonely Tune.wav");
    assert!(output.exists());
    assert_eq!(h.mixer.mixed_stems(), vec![vec!["vocals".to_string()]]);
}

#[tokio::test]
async fn keep_intermediates_archives_queue_copy() {
    let mut config = TestHarness::test_config();
    config.pipeline.cleanup_intermediate = false;
    let h = TestHarness::with_config(config);
    let src = h.data_path().join("keep.wav");
    tagged_wav(&src, "A", "B", "Keep");

    let job = enqueue(&h, &src, None).await;
    h.drain().await;

    let layout = &h.pipeline.layout;
    assert_eq!(reload(&h, job.id).status, JobStatus::Completed);
    assert!(layout.archive_file(&job.filename).exists());
    assert!(layout.stems_dir(job.id).join("drums.wav").exists());
    assert!(layout.sidecar(job.id).exists());
}

// 1x1 transparent PNG
const PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

#[tokio::test]
async fn embedded_cover_is_saved_and_placed() {
    let mut config = TestHarness::test_config();
    config.pipeline.cleanup_intermediate = false;
    let h = TestHarness::with_config(config);
    let src = h.data_path().join("covered.wav");
    write_wav(&src);
    let tags = stemforged_av::AudioTags {
        artist: Some("A".into()),
        album: Some("B".into()),
        title: Some("Covered".into()),
        ..Default::default()
    };
    stemforged_av::write_tags(&src, &tags, Some(PNG)).unwrap();

    let job = enqueue(&h, &src, None).await;
    h.drain().await;
    assert_eq!(reload(&h, job.id).status, JobStatus::Completed);

    let layout = &h.pipeline.layout;
    let cover = layout.cover_file(job.id, "png");
    assert_eq!(std::fs::read(&cover).unwrap(), PNG);

    let record = read_record(&layout.sidecar(job.id)).unwrap();
    assert_eq!(record.cover_art_path.as_deref(), Some(cover.as_path()));
    assert_eq!(record.cover_art_source, Some(CoverArtSource::Embedded));
    assert_eq!(
        std::fs::read(layout.output.join("A").join("B").join("cover.jpg")).unwrap(),
        PNG
    );
}

#[tokio::test]
async fn corrupt_input_fails_without_retry() {
    let h = TestHarness::new();
    let src = h.data_path().join("broken.wav");
    std::fs::write(&src, b"this is not audio at all").unwrap();

    let job = enqueue(&h, &src, None).await;
    h.drain().await;

    let failed = reload(&h, job.id);
    assert_eq!(failed.status, JobStatus::Error);
    assert_eq!(failed.metadata_retries, 0);
    assert!(failed.error.as_deref().unwrap().contains("Unreadable audio file"));
    assert_eq!(h.separator.calls(), 0);

    let layout = &h.pipeline.layout;
    assert!(!layout.queue_file(&failed.filename).exists());
    assert!(layout.error_file(&failed.filename).exists());
    assert_eq!(h.ctx.state.stats().failed, 1);
}

#[tokio::test]
async fn transient_separation_failure_is_retried() {
    let h = TestHarness::with_separator(TestHarness::test_config(), FakeSeparator::failing(2));
    let src = h.data_path().join("flaky.wav");
    tagged_wav(&src, "A", "B", "Flaky");

    let job = enqueue(&h, &src, None).await;
    h.drain().await;

    let done = reload(&h, job.id);
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.separation_retries, 2);
    assert!(done.last_error.is_none());
    assert_eq!(h.separator.calls(), 3);
    assert_eq!(h.ctx.state.stats().retries, 2);
}

#[tokio::test]
async fn separation_gives_up_after_max_retries() {
    let h = TestHarness::with_separator(TestHarness::test_config(), FakeSeparator::failing(10));
    let src = h.data_path().join("doomed.wav");
    tagged_wav(&src, "A", "B", "Doomed");

    let job = enqueue(&h, &src, None).await;
    h.drain().await;

    let failed = reload(&h, job.id);
    assert_eq!(failed.status, JobStatus::Error);
    assert_eq!(failed.separation_retries, 3);
    assert_eq!(failed.error.as_deref(), Some("separator crashed"));
    assert_eq!(h.separator.calls(), 3);
    assert!(h.pipeline.layout.error_file(&failed.filename).exists());
}

#[tokio::test]
async fn retry_waits_for_delay() {
    let mut config = TestHarness::test_config();
    config.pipeline.retry_delay_secs = 3600;
    let h = TestHarness::with_separator(config, FakeSeparator::failing(1));
    let src = h.data_path().join("later.wav");
    tagged_wav(&src, "A", "B", "Later");

    let job = enqueue(&h, &src, None).await;
    h.drain().await;

    let waiting = reload(&h, job.id);
    assert_eq!(waiting.status, JobStatus::MetadataExtracted);
    assert_eq!(waiting.separation_retries, 1);
    assert_eq!(waiting.last_error.as_deref(), Some("separator crashed"));
    assert!(waiting.not_before.is_some());
    assert!(waiting.claimed_by.is_none());
    assert_eq!(h.separator.calls(), 1);
}

#[tokio::test]
async fn unsupported_stem_rejected_before_separation() {
    let h = TestHarness::new();
    let id = JobId::new();
    let filename = format!("piano_{}.wav", id.short());
    tagged_wav(&h.pipeline.layout.queue_file(&filename), "A", "B", "Keys");

    // Snapshots are validated at intake, so write the row directly.
    let settings = PipelineSettings {
        stems: StemCount::FOUR,
        stem_types: "piano".into(),
        ..TestHarness::test_config().pipeline
    };
    let new = NewJob {
        id,
        filename: filename.clone(),
        original_filename: "piano.wav".into(),
        source: JobSource::Cli,
        settings,
        collection: None,
    };
    jobs::create_job(&h.conn(), &new).unwrap();

    h.drain().await;

    let failed = reload(&h, id);
    assert_eq!(failed.status, JobStatus::Error);
    assert!(failed.error.as_deref().unwrap().contains("piano"));
    assert_eq!(failed.separation_retries, 0);
    assert_eq!(h.separator.calls(), 0);
}

#[tokio::test]
async fn failure_events_are_broadcast() {
    let h = TestHarness::new();
    let mut rx = h.ctx.state.subscribe();
    let src = h.data_path().join("broken.wav");
    std::fs::write(&src, b"RIFX garbage").unwrap();

    let job = enqueue(&h, &src, None).await;
    h.drain().await;

    let mut types = Vec::new();
    while let Ok(event) = rx.try_recv() {
        types.push(event.event_type());
    }
    assert_eq!(types, vec!["job_queued", "job_claimed", "job_failed"]);
    assert_eq!(reload(&h, job.id).status, JobStatus::Error);
}

#[tokio::test]
async fn workers_process_in_background_and_stop() {
    let h = TestHarness::new();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handles = worker::spawn_all(&h.pipeline, &h.ctx.config.workers, &shutdown_rx);

    let src = h.data_path().join("bg.wav");
    tagged_wav(&src, "A", "B", "Background");
    let job = enqueue(&h, &src, None).await;

    let done = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let job = reload(&h, job.id);
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("job did not finish in time");
    assert_eq!(done.status, JobStatus::Completed);

    shutdown_tx.send(true).unwrap();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
