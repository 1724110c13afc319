//! Runtime bundle staging and gateway startup.
//!
//! The messaging runtime ships as a prebuilt bundle: a manifest, the gateway
//! worker executable, and the shared binary module it loads. The loader
//! checks the fixed local layout first and falls back to the CDN for
//! anything missing, verifying each download against the manifest's SHA-256
//! digests. Staging is idempotent; an already-listening gateway makes the
//! whole procedure a no-op.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::Config;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const MANIFEST_NAME: &str = "runtime.json";

/// Short probe for an already-running gateway.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Deadline for the gateway to come up after being spawned.
const READY_TIMEOUT: Duration = Duration::from_secs(15);
const READY_RETRY_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),
    #[error("runtime manifest lists no files")]
    EmptyManifest,
    #[error("checksum mismatch for {name} (expected {expected}, got {actual})")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("gateway url {0} has no host")]
    MissingHost(String),
    #[error("gateway did not become ready within {0:?}")]
    ReadyTimeout(Duration),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeManifest {
    /// Bundle entry point, relative to the runtime dir.
    pub entry: String,
    pub files: Vec<BundleFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleFile {
    pub name: String,
    pub sha256: String,
}

/// Connect to a gateway that is already listening. `None` means nobody is
/// there and the bundle path has to be taken.
pub async fn probe_gateway(gateway_url: &str) -> Option<WsStream> {
    let url = Url::parse(gateway_url).ok()?;
    match tokio::time::timeout(PROBE_TIMEOUT, connect_async(url)).await {
        Ok(Ok((ws, _))) => Some(ws),
        _ => None,
    }
}

/// Make sure the runtime bundle is staged under the configured directory,
/// downloading missing files from the CDN. Returns the gateway executable
/// path. Repeated calls with an intact bundle touch nothing.
pub async fn ensure_runtime(
    http: &reqwest::Client,
    config: &Config,
) -> Result<PathBuf, LoaderError> {
    let dir = &config.runtime_dir;

    if let Some(entry) = staged_entry(dir)? {
        return Ok(entry);
    }

    let manifest = fetch_manifest(http, &config.runtime_base_url).await?;
    if manifest.files.is_empty() {
        return Err(LoaderError::EmptyManifest);
    }

    tokio::fs::create_dir_all(dir).await?;
    for file in &manifest.files {
        let dest = dir.join(&file.name);
        if dest.is_file() && sha256_file(&dest)? == normalize_digest(&file.sha256) {
            continue;
        }
        let url = format!("{}/{}", config.runtime_base_url, file.name);
        tracing::info!(name = %file.name, "downloading runtime file");
        download_file(http, &url, &dest).await?;
        let actual = sha256_file(&dest)?;
        let expected = normalize_digest(&file.sha256);
        if actual != expected {
            return Err(LoaderError::ChecksumMismatch {
                name: file.name.clone(),
                expected,
                actual,
            });
        }
    }

    let entry = dir.join(&manifest.entry);
    make_executable(&entry)?;
    Ok(entry)
}

/// Spawn the gateway worker detached. It outlives this process and serves
/// later invocations; the next run's probe finds it listening.
pub fn start_gateway(config: &Config, gateway: &Path) -> Result<(), LoaderError> {
    let listen = listen_addr(&config.gateway_url)?;
    let module = config.runtime_dir.join(MODULE_NAME);

    Command::new(gateway)
        .arg("--listen")
        .arg(listen)
        .arg("--module")
        .arg(module)
        .arg("--instance")
        .arg(&config.instance_name)
        .arg("--verbosity")
        .arg(config.verbosity_level.to_string())
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;
    Ok(())
}

/// One readiness wait for a just-spawned gateway: resolves with the open
/// socket or fails once the deadline passes. Cancelling the future abandons
/// the wait without side effects.
pub async fn await_gateway(gateway_url: &str) -> Result<WsStream, LoaderError> {
    let url = Url::parse(gateway_url)?;
    let connect = async {
        loop {
            if let Ok((ws, _)) = connect_async(url.clone()).await {
                return ws;
            }
            tokio::time::sleep(READY_RETRY_INTERVAL).await;
        }
    };
    tokio::time::timeout(READY_TIMEOUT, connect)
        .await
        .map_err(|_| LoaderError::ReadyTimeout(READY_TIMEOUT))
}

const MODULE_NAME: &str = "libtdjson.so";

/// A bundle counts as staged when the manifest and every file it lists are
/// present. Digests are not re-verified on this fast path.
fn staged_entry(dir: &Path) -> Result<Option<PathBuf>, LoaderError> {
    let manifest_path = dir.join(MANIFEST_NAME);
    if !manifest_path.is_file() {
        return Ok(None);
    }
    let manifest: RuntimeManifest =
        serde_json::from_str(&std::fs::read_to_string(&manifest_path)?)?;
    if manifest.files.is_empty() {
        return Ok(None);
    }
    for file in &manifest.files {
        if !dir.join(&file.name).is_file() {
            return Ok(None);
        }
    }
    Ok(Some(dir.join(&manifest.entry)))
}

async fn fetch_manifest(
    http: &reqwest::Client,
    base_url: &str,
) -> Result<RuntimeManifest, LoaderError> {
    let url = format!("{base_url}/{MANIFEST_NAME}");
    let response = http.get(&url).send().await?.error_for_status()?;
    Ok(response.json().await?)
}

async fn download_file(
    http: &reqwest::Client,
    url: &str,
    dest: &Path,
) -> Result<(), LoaderError> {
    let response = http.get(url).send().await?.error_for_status()?;
    let bytes = response.bytes().await?;
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(dest, &bytes).await?;
    Ok(())
}

fn sha256_file(path: &Path) -> Result<String, io::Error> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn normalize_digest(digest: &str) -> String {
    digest.trim().to_ascii_lowercase()
}

fn listen_addr(gateway_url: &str) -> Result<String, LoaderError> {
    let url = Url::parse(gateway_url)?;
    let host = url
        .host_str()
        .ok_or_else(|| LoaderError::MissingHost(gateway_url.to_string()))?;
    let port = url.port().unwrap_or(8293);
    Ok(format!("{host}:{port}"))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), io::Error> {
    use std::os::unix::fs::PermissionsExt;
    if path.is_file() {
        let perm = std::fs::Permissions::from_mode(0o755);
        std::fs::set_permissions(path, perm)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), io::Error> {
    Ok(())
}
