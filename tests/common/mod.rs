//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which creates an in-memory DB, a temporary data
//! directory and a full [`AppContext`] whose pipeline uses the fake
//! separator and mixer below. The [`with_server`] constructors start Axum on
//! a random port for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use hound::{SampleFormat, WavSpec, WavWriter};
use tempfile::TempDir;

use stemforged::config::Config;
use stemforged::pipeline::{handler_for, PipelineContext, Separator, StageError, StemMixer};
use stemforged::server::{create_router, AppContext};
use stemforged::state::AppState;
use stemforged::worker::StageWorker;
use stemforged_av::{write_tags, AudioTags};
use stemforged_common::{PipelineSettings, Stage};
use stemforged_db::models::{User, UserRole};
use stemforged_db::pool::{init_memory_pool, DbPool};

/// Write one second of a sine tone as 16-bit stereo WAV.
pub fn write_wav(path: &Path) {
    let spec = WavSpec {
        channels: 2,
        sample_rate: 44100,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).expect("failed to create wav");
    for i in 0..44100 {
        let s = ((i as f32 * 0.05).sin() * 8000.0) as i16;
        writer.write_sample(s).unwrap();
        writer.write_sample(s).unwrap();
    }
    writer.finalize().expect("failed to finalize wav");
}

/// WAV fixture tagged with artist, album and title.
pub fn tagged_wav(path: &Path, artist: &str, album: &str, title: &str) {
    write_wav(path);
    let tags = AudioTags {
        artist: Some(artist.to_string()),
        album: Some(album.to_string()),
        title: Some(title.to_string()),
        ..Default::default()
    };
    write_tags(path, &tags, None).expect("failed to tag fixture");
}

/// Separator that writes a WAV per stem of the configured model.
///
/// The first `fail_times` calls return a transient error.
#[derive(Default)]
pub struct FakeSeparator {
    pub calls: AtomicU32,
    pub fail_times: AtomicU32,
}

impl FakeSeparator {
    pub fn failing(times: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_times: AtomicU32::new(times),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Separator for FakeSeparator {
    fn separate(
        &self,
        _input: &Path,
        dest_dir: &Path,
        settings: &PipelineSettings,
    ) -> Result<Vec<(String, PathBuf)>, StageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_times.load(Ordering::SeqCst) {
            return Err(StageError::Transient("separator crashed".into()));
        }

        std::fs::create_dir_all(dest_dir)?;
        Ok(settings
            .stems
            .stems()
            .iter()
            .map(|stem| {
                let path = dest_dir.join(format!("{}.wav", stem));
                write_wav(&path);
                (stem.to_string(), path)
            })
            .collect())
    }
}

/// Mixer that copies the first stem and remembers what it was given.
#[derive(Default)]
pub struct FakeMixer {
    pub mixes: Mutex<Vec<Vec<PathBuf>>>,
}

impl FakeMixer {
    /// Stem file names of every mix so far.
    pub fn mixed_stems(&self) -> Vec<Vec<String>> {
        self.mixes
            .lock()
            .unwrap()
            .iter()
            .map(|stems| {
                stems
                    .iter()
                    .map(|p| p.file_stem().unwrap().to_string_lossy().into_owned())
                    .collect()
            })
            .collect()
    }
}

impl StemMixer for FakeMixer {
    fn mix(&self, stems: &[PathBuf], output: &Path, _bitrate: &str) -> Result<(), StageError> {
        self.mixes.lock().unwrap().push(stems.to_vec());
        std::fs::copy(&stems[0], output)?;
        Ok(())
    }
}

/// Test harness wrapping a fully-constructed [`AppContext`] backed by an
/// in-memory database.
pub struct TestHarness {
    pub ctx: AppContext,
    pub pipeline: Arc<PipelineContext>,
    pub db: DbPool,
    pub separator: Arc<FakeSeparator>,
    pub mixer: Arc<FakeMixer>,
    pub data_dir: TempDir,
}

impl TestHarness {
    /// Defaults suited to tests: auth and network lookups off, no retry delay.
    pub fn test_config() -> Config {
        let mut config = Config::default();
        config.server.auth.enabled = false;
        config.cover_art.enabled = false;
        config.watch.enabled = false;
        config.workers.poll_interval_ms = 50;
        config.pipeline.retry_delay_secs = 0;
        config
    }

    /// Create a new harness with test configuration and in-memory DB.
    pub fn new() -> Self {
        Self::with_config(Self::test_config())
    }

    /// Create a new harness with a custom configuration and in-memory DB.
    pub fn with_config(config: Config) -> Self {
        Self::with_separator(config, FakeSeparator::default())
    }

    pub fn with_separator(mut config: Config, separator: FakeSeparator) -> Self {
        let data_dir = tempfile::tempdir().expect("failed to create data dir");
        config.paths.data_dir = data_dir.path().to_path_buf();
        config.paths.layout().ensure_dirs().expect("failed to create layout");

        let db = init_memory_pool().expect("failed to create in-memory pool");
        let state = AppState::new(config.pipeline.clone());
        let separator = Arc::new(separator);
        let mixer = Arc::new(FakeMixer::default());

        let pipeline = Arc::new(
            PipelineContext::new(&config, db.clone(), state)
                .with_separator(separator.clone())
                .with_mixer(mixer.clone()),
        );
        let ctx = AppContext::new(config, None, pipeline.clone());

        Self {
            ctx,
            pipeline,
            db,
            separator,
            mixer,
            data_dir,
        }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::with_server_config(Self::test_config()).await
    }

    /// Start an Axum server with custom config on a random port.
    pub async fn with_server_config(config: Config) -> (Self, SocketAddr) {
        let harness = Self::with_config(config);
        let addr = harness.serve().await;
        (harness, addr)
    }

    /// Serve this harness' context on a random port.
    pub async fn serve(&self) -> SocketAddr {
        let app = create_router(self.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        addr
    }

    /// Get a database connection from the pool.
    pub fn conn(&self) -> stemforged_db::pool::PooledConnection {
        stemforged_db::pool::get_conn(&self.db).expect("failed to get db connection")
    }

    /// Create a user with a bcrypt-hashed password.
    pub fn create_user(&self, username: &str, password: &str, role: UserRole) -> User {
        let hash = stemforged::server::auth::hash_password(password).unwrap();
        stemforged_db::queries::users::create_user(&self.conn(), username, &hash, role, false)
            .unwrap()
    }

    /// Worker for `stage` over this harness' pipeline.
    pub fn worker(&self, stage: Stage) -> StageWorker {
        StageWorker::new(
            self.pipeline.clone(),
            handler_for(&self.pipeline, stage),
            &self.ctx.config.workers,
        )
    }

    /// Tick every stage until none of them finds work.
    pub async fn drain(&self) {
        let workers: Vec<StageWorker> = Stage::ALL.iter().map(|s| self.worker(*s)).collect();
        loop {
            let mut progressed = false;
            for worker in &workers {
                progressed |= worker.tick().await;
            }
            if !progressed {
                break;
            }
        }
    }

    pub fn data_path(&self) -> &Path {
        self.data_dir.path()
    }
}

/// Log in over HTTP and return the bearer token.
pub async fn login(addr: SocketAddr, username: &str, password: &str) -> String {
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/login"))
        .json(&serde_json::json!({ "username": username, "password": password }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "login failed for {}", username);
    let json: serde_json::Value = resp.json().await.unwrap();
    json["access_token"].as_str().unwrap().to_string()
}
