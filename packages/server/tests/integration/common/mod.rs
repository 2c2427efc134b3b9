use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use ::common::ConversionJob;
use ::common::storage::filesystem::FilesystemVault;
use ::common::storage::{EntityKind, IterationKey};
use server::config::{
    AppConfig, AuthConfig, CorsConfig, MqAppConfig, ServerConfig, StorageConfig,
};
use server::convert::ConversionTrigger;
use server::domain::SharedTarget;
use server::domain::memory::{MemoryRegistry, MemoryShareStore};
use server::state::AppState;
use server::utils::jwt;

const JWT_SECRET: &str = "integration-test-secret";

/// Records conversion jobs instead of publishing them, so tests can assert
/// the trigger fired (or observe that a failure stayed invisible).
pub struct RecordingConverter {
    jobs: Mutex<Vec<ConversionJob>>,
    fail: bool,
}

impl RecordingConverter {
    fn new(fail: bool) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            fail,
        }
    }

    pub fn jobs(&self) -> Vec<ConversionJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversionTrigger for RecordingConverter {
    async fn request_conversion(&self, job: ConversionJob) -> Result<(), mq::MqError> {
        self.jobs.lock().unwrap().push(job);
        if self.fail {
            return Err(mq::MqError::Internal("converter unavailable".into()));
        }
        Ok(())
    }
}

pub struct TestApp {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    pub registry: Arc<MemoryRegistry>,
    pub shares: Arc<MemoryShareStore>,
    pub converter: Arc<RecordingConverter>,
    vault_dir: PathBuf,
    _tmp: tempfile::TempDir,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_failing_converter(false).await
    }

    pub async fn spawn_with_failing_converter(fail: bool) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let vault_dir = tmp.path().join("vault");

        let config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 0,
                cors: CorsConfig {
                    allow_origins: vec![],
                    max_age: 3600,
                },
            },
            storage: StorageConfig {
                vault_dir: vault_dir.display().to_string(),
                max_file_size: 8 * 1024 * 1024,
            },
            auth: AuthConfig {
                jwt_secret: JWT_SECRET.into(),
            },
            mq: MqAppConfig::default(),
        };

        let vault = FilesystemVault::new(vault_dir.clone(), config.storage.max_file_size)
            .await
            .expect("vault");
        let registry = Arc::new(MemoryRegistry::new());
        let shares = Arc::new(MemoryShareStore::new());
        let converter = Arc::new(RecordingConverter::new(fail));

        let state = AppState {
            vault: Arc::new(vault),
            registry: registry.clone(),
            gate: registry.clone(),
            shares: shares.clone(),
            converter: converter.clone(),
            config: Arc::new(config),
        };

        let app = server::build_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server");
        });

        Self {
            addr,
            client: reqwest::Client::new(),
            registry,
            shares,
            converter,
            vault_dir,
            _tmp: tmp,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Filesystem location of a stored file, for fault injection.
    pub fn vault_file(&self, vault_path: &str) -> PathBuf {
        self.vault_dir.join(vault_path)
    }

    pub fn token(&self, login: &str) -> String {
        jwt::sign(login, true, JWT_SECRET.as_bytes()).expect("sign token")
    }

    pub fn inactive_token(&self, login: &str) -> String {
        jwt::sign(login, false, JWT_SECRET.as_bytes()).expect("sign token")
    }

    /// Create the iteration and give `login` write access to its workspace.
    pub fn seed_iteration(&self, key: &IterationKey, login: &str) {
        self.registry.create_iteration(key.clone());
        self.registry.grant_write(&key.workspace, login);
    }

    pub fn mint_share(&self, key: &IterationKey) -> String {
        self.shares
            .create_share(
                SharedTarget {
                    kind: key.kind,
                    workspace: key.workspace.clone(),
                    entity_id: key.entity_id.clone(),
                    version: key.version.clone(),
                },
                None,
            )
            .to_string()
    }

    pub async fn upload(
        &self,
        path: &str,
        files: Vec<(&str, Vec<u8>)>,
        token: &str,
    ) -> reqwest::Response {
        let mut form = reqwest::multipart::Form::new();
        for (name, data) in files {
            let part = reqwest::multipart::Part::bytes(data)
                .file_name(name.to_string())
                .mime_str("application/octet-stream")
                .expect("mime");
            form = form.part("file", part);
        }
        self.client
            .post(self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .multipart(form)
            .send()
            .await
            .expect("upload request")
    }

    pub async fn download(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await
            .expect("download request")
    }
}

pub mod routes {
    use ::common::storage::IterationKey;

    pub fn iteration(key: &IterationKey) -> String {
        format!(
            "/api/v1/files/{}/{}/{}/{}/{}",
            key.workspace, key.kind, key.entity_id, key.version, key.iteration
        )
    }

    pub fn iteration_sub(key: &IterationKey, sub_type: &str) -> String {
        format!("{}/{}", iteration(key), sub_type)
    }

    pub fn file(key: &IterationKey, file_name: &str) -> String {
        format!("{}/{}", iteration(key), file_name)
    }

    pub fn sub_file(key: &IterationKey, sub_type: &str, file_name: &str) -> String {
        format!("{}/{}/{}", iteration(key), sub_type, file_name)
    }

    pub fn shared_file(token: &str, kind: &str, iteration: u32, file_name: &str) -> String {
        format!("/api/v1/shared/{token}/{kind}/{iteration}/{file_name}")
    }

    pub fn shared_sub_file(
        token: &str,
        kind: &str,
        iteration: u32,
        sub_type: &str,
        file_name: &str,
    ) -> String {
        format!("/api/v1/shared/{token}/{kind}/{iteration}/{sub_type}/{file_name}")
    }
}

/// Part iteration key used by most tests.
pub fn part_key() -> IterationKey {
    IterationKey::new("wks", EntityKind::Parts, "P1", "A", 3)
}

pub fn document_key() -> IterationKey {
    IterationKey::new("wks", EntityKind::Documents, "SPEC-001", "B", 1)
}
