//! Docker-backed container engine.
//!
//! Talks to the Docker daemon through the native API. The endpoint comes
//! from `DOCKER_HOST` (with `DOCKER_CERT_PATH`/`DOCKER_TLS_VERIFY` for
//! TLS); absent, the local socket is used. Every launched container is
//! tracked so teardown can kill and remove whatever is still running.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::service::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tokio::sync::Mutex;

use super::engine::{Engine, EngineError, LaunchSpec, OutputSink};

const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Container engine backed by the Docker daemon.
pub struct DockerEngine {
    docker: Docker,
    containers: Mutex<Vec<String>>,
    destroyed: AtomicBool,
}

impl DockerEngine {
    /// Connects to the daemon selected by the environment.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Connect`] when the endpoint is unreachable
    /// or the TLS material cannot be loaded.
    pub async fn connect() -> Result<Self, EngineError> {
        let docker = match std::env::var("DOCKER_HOST") {
            Ok(host) if host.starts_with("unix://") => Docker::connect_with_unix(
                host.trim_start_matches("unix://"),
                CONNECT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            Ok(host) => {
                let cert_path = std::env::var("DOCKER_CERT_PATH").unwrap_or_default();
                let tls_verify = std::env::var("DOCKER_TLS_VERIFY").unwrap_or_default();
                if !tls_verify.is_empty() && !cert_path.is_empty() {
                    let certs = Path::new(&cert_path);
                    Docker::connect_with_ssl(
                        &host,
                        &certs.join("key.pem"),
                        &certs.join("cert.pem"),
                        &certs.join("ca.pem"),
                        CONNECT_TIMEOUT_SECS,
                        bollard::API_DEFAULT_VERSION,
                    )
                } else {
                    Docker::connect_with_http(
                        &host,
                        CONNECT_TIMEOUT_SECS,
                        bollard::API_DEFAULT_VERSION,
                    )
                }
            }
            Err(_) => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| EngineError::Connect(e.to_string()))?;

        docker
            .ping()
            .await
            .map_err(|e| EngineError::Connect(e.to_string()))?;

        Ok(Self {
            docker,
            containers: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        })
    }

    async fn pull(&self, spec: &LaunchSpec) -> Result<(), EngineError> {
        tracing::debug!(image = %spec.image, "pulling image");
        let options = CreateImageOptions {
            from_image: spec.image.clone(),
            ..Default::default()
        };
        let credentials = spec.auth.as_ref().map(|auth| DockerCredentials {
            username: none_if_empty(&auth.username),
            password: none_if_empty(&auth.password),
            email: none_if_empty(&auth.email),
            registrytoken: none_if_empty(&auth.registry_token),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(Some(options), None, credentials);
        while let Some(item) = stream.next().await {
            item.map_err(|e| EngineError::Pull(e.to_string()))?;
        }
        Ok(())
    }

    /// Creates and starts a container, pulling the image first when the
    /// spec demands it or the image is missing locally.
    async fn launch(&self, spec: &LaunchSpec) -> Result<String, EngineError> {
        if spec.pull {
            self.pull(spec).await?;
        }
        let id = match self.create(spec).await {
            Ok(id) => id,
            Err(EngineError::Launch(msg)) if msg.contains("404") && !spec.pull => {
                self.pull(spec).await?;
                self.create(spec).await?
            }
            Err(err) => return Err(err),
        };
        self.containers.lock().await.push(id.clone());

        self.docker
            .start_container(&id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| EngineError::Launch(e.to_string()))?;
        Ok(id)
    }

    async fn create(&self, spec: &LaunchSpec) -> Result<String, EngineError> {
        let host_config = HostConfig {
            binds: some_if_nonempty(&spec.volumes),
            privileged: Some(spec.privileged),
            network_mode: none_if_empty(&spec.network_mode),
            ..Default::default()
        };
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: some_if_nonempty(&spec.command),
            entrypoint: some_if_nonempty(&spec.entrypoint),
            env: some_if_nonempty(&spec.environment),
            working_dir: none_if_empty(&spec.working_dir),
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: format!("gantry_{}", uuid::Uuid::new_v4().simple()),
            ..Default::default()
        };
        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| EngineError::Launch(e.to_string()))?;
        Ok(response.id)
    }

    fn stream_logs(&self, id: &str, sink: OutputSink) {
        let docker = self.docker.clone();
        let id = id.to_string();
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        tokio::spawn(async move {
            let mut stream = docker.logs(&id, Some(options));
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(output) => {
                        if let Ok(mut sink) = sink.lock() {
                            let _ = sink.write_all(&output.into_bytes());
                        }
                    }
                    Err(err) => {
                        tracing::debug!(container = %id, error = %err, "log stream ended");
                        break;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Engine for DockerEngine {
    async fn run(&self, spec: &LaunchSpec, sink: OutputSink) -> Result<i64, EngineError> {
        let id = self.launch(spec).await?;
        self.stream_logs(&id, sink);

        let mut stream = self.docker.wait_container(
            &id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );
        match stream.next().await {
            Some(Ok(status)) => Ok(status.status_code),
            // A non-zero exit surfaces as a wait error carrying the code.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(err)) => Err(EngineError::Wait(err.to_string())),
            None => Err(EngineError::Wait("wait stream closed".to_string())),
        }
    }

    async fn start(&self, spec: &LaunchSpec) -> Result<(), EngineError> {
        self.launch(spec).await.map(|_| ())
    }

    async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let containers = std::mem::take(&mut *self.containers.lock().await);
        for id in containers {
            let _ = self
                .docker
                .kill_container(&id, None::<KillContainerOptions<String>>)
                .await;
            let _ = self
                .docker
                .remove_container(
                    &id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            tracing::debug!(container = %id, "removed container");
        }
    }
}

fn none_if_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn some_if_nonempty(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}
