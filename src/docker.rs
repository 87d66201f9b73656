use crate::device::{self, AddressSource, Interface};
use crate::error::{Result, SnifferError};
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};

pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// 停止中のものも含めた全コンテナ
const CONTAINERS_PATH: &str = "/containers/json?all=true";

/// Docker Engine API の接続先
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerHost {
    Unix(PathBuf),
    /// `host:port`, plain HTTP.
    Tcp(String),
}

impl DockerHost {
    pub fn parse(value: &str) -> Result<Self> {
        if let Some(path) = value.strip_prefix("unix://") {
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = value
            .strip_prefix("tcp://")
            .or_else(|| value.strip_prefix("http://"))
        {
            return Ok(Self::Tcp(addr.trim_end_matches('/').to_string()));
        }
        Err(SnifferError::ContainerInventoryFailed(format!(
            "unsupported docker host {value:?} (expected unix:// or tcp://)"
        )))
    }
}

/// キャプチャ対象として選べるコンテナ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub names: Vec<String>,
    pub gateway: String,
    /// ゲートウェイが見つかったホスト側インターフェース
    pub interface: Option<Interface>,
}

impl Container {
    pub fn display_name(&self) -> String {
        self.names.join(",")
    }

    /// Docker reports names with a leading `/`; accept them with or without.
    pub fn has_name(&self, name: &str) -> bool {
        let wanted = name.trim_start_matches('/');
        self.names
            .iter()
            .any(|candidate| candidate.trim_start_matches('/') == wanted)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerSummary {
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    host_config: HostConfig,
    #[serde(default)]
    network_settings: NetworkSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostConfig {
    #[serde(default)]
    network_mode: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkSettings {
    #[serde(default)]
    networks: Option<HashMap<String, NetworkEndpoint>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkEndpoint {
    #[serde(default)]
    gateway: Option<String>,
}

impl ContainerSummary {
    /// Gateway of the network named by the container's network mode.
    fn gateway(&self) -> Option<String> {
        let mode = match self.host_config.network_mode.as_str() {
            "default" => "bridge",
            mode => mode,
        };
        self.network_settings
            .networks
            .as_ref()?
            .get(mode)?
            .gateway
            .clone()
            .filter(|gateway| !gateway.is_empty())
    }
}

/// `/containers/json` のレスポンスを解析し、ゲートウェイを持つものだけ返す
pub fn parse_containers(body: &[u8]) -> Result<Vec<Container>> {
    let summaries: Vec<ContainerSummary> =
        serde_json::from_slice(body).map_err(inventory_error)?;

    let mut containers = Vec::with_capacity(summaries.len());
    for summary in summaries {
        match summary.gateway() {
            Some(gateway) => containers.push(Container {
                names: summary.names,
                gateway,
                interface: None,
            }),
            None => debug!(
                "Skipping {:?}: no gateway on network mode {:?}",
                summary.names, summary.host_config.network_mode
            ),
        }
    }
    Ok(containers)
}

/// 各コンテナのゲートウェイ + マスクでホストのインターフェースを探す
///
/// A container whose gateway matches no interface keeps `interface: None`; it
/// stays listed and only fails if the operator picks it.
pub fn resolve_interfaces<S: AddressSource>(
    containers: Vec<Container>,
    interfaces: &[S],
    mask: &str,
) -> Vec<Container> {
    containers
        .into_iter()
        .map(|mut container| {
            let target = format!("{}{}", container.gateway, mask);
            match device::resolve(interfaces, &target) {
                Ok(interface) => container.interface = Some(interface),
                Err(e) => warn!("{}: {}", container.display_name(), e),
            }
            container
        })
        .collect()
}

/// Lists containers from the Docker Engine API on a throwaway current-thread
/// runtime; the rest of the program stays synchronous.
pub fn fetch_containers(host: &DockerHost) -> Result<Vec<Container>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(inventory_error)?;
    runtime.block_on(list_containers(host))
}

pub async fn list_containers(host: &DockerHost) -> Result<Vec<Container>> {
    info!("Querying containers from {:?}", host);
    let body = match host {
        DockerHost::Unix(path) => {
            let stream = UnixStream::connect(path).await.map_err(|e| {
                SnifferError::ContainerInventoryFailed(format!("{}: {}", path.display(), e))
            })?;
            get(stream, CONTAINERS_PATH).await?
        }
        DockerHost::Tcp(addr) => {
            let stream = TcpStream::connect(addr.as_str()).await.map_err(|e| {
                SnifferError::ContainerInventoryFailed(format!("{}: {}", addr, e))
            })?;
            get(stream, CONTAINERS_PATH).await?
        }
    };

    let containers = parse_containers(&body)?;
    info!("{} container(s) with a gateway", containers.len());
    Ok(containers)
}

async fn get<S>(stream: S, path: &str) -> Result<Bytes>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) =
        hyper::client::conn::http1::handshake::<_, Empty<Bytes>>(TokioIo::new(stream))
            .await
            .map_err(inventory_error)?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("Docker API connection ended: {}", e);
        }
    });

    let request = Request::builder()
        .method(Method::GET)
        .uri(path)
        .header(hyper::header::HOST, "docker")
        .body(Empty::<Bytes>::new())
        .map_err(inventory_error)?;

    let response = sender.send_request(request).await.map_err(inventory_error)?;
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(inventory_error)?
        .to_bytes();

    if !status.is_success() {
        return Err(SnifferError::ContainerInventoryFailed(format!(
            "GET {} returned {}: {}",
            path,
            status,
            String::from_utf8_lossy(&body).trim()
        )));
    }
    Ok(body)
}

fn inventory_error<E: Display>(e: E) -> SnifferError {
    SnifferError::ContainerInventoryFailed(e.to_string())
}
