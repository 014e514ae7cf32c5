#![allow(dead_code)]

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use stockroom::app::AppState;
use stockroom::config::AppConfig;
use stockroom::server;

pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    pub state: AppState,
    pub client: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<()>>>,
}

impl TestServer {
    /// Start an in-process server on an unused port with memory storage
    pub async fn spawn() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("warn")
            .with_test_writer()
            .try_init();

        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        let mut config = AppConfig::for_testing();
        config.api.port = port;

        let state = AppState::from_config(config).await?;
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .context("failed to bind test listener")?;

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server::run(state.clone(), listener, async move {
            let _ = rx.await;
        }));

        let server = Self {
            port,
            base_url,
            state,
            client: reqwest::Client::new(),
            shutdown: Some(tx),
            task: Some(task),
        };
        server.wait_ready(Duration::from_secs(10)).await?;
        Ok(server)
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() > deadline {
                break;
            }
            if let Ok(resp) = self.client.get(self.url("/health")).send().await {
                if resp.status() == StatusCode::OK || resp.status() == StatusCode::SERVICE_UNAVAILABLE {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Signal shutdown and wait for the serve loop to return
    pub async fn stop(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.take() {
            Some(task) => task.await?,
            None => Ok(()),
        }
    }

    /// POST /api/auth/register, returning the raw response
    pub async fn register(&self, name: &str, email: &str, store_uri: Option<&str>) -> Result<reqwest::Response> {
        let mut body = json!({
            "name": name,
            "email": email,
            "password": "password123",
        });
        if let Some(uri) = store_uri {
            body["store_uri"] = json!(uri);
        }
        Ok(self.client.post(self.url("/api/auth/register")).json(&body).send().await?)
    }

    /// Log in with the password `register` uses and return the JWT
    pub async fn login(&self, email: &str) -> Result<String> {
        let res = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&json!({ "email": email, "password": "password123" }))
            .send()
            .await?;
        anyhow::ensure!(res.status() == StatusCode::OK, "login failed: {}", res.status());

        let body: Value = res.json().await?;
        body["data"]["token"]
            .as_str()
            .map(str::to_string)
            .context("login response has no token")
    }

    /// Register then log in
    pub async fn sign_up(&self, name: &str, email: &str, store_uri: Option<&str>) -> Result<String> {
        let res = self.register(name, email, store_uri).await?;
        anyhow::ensure!(res.status() == StatusCode::CREATED, "register failed: {}", res.status());
        self.login(email).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
