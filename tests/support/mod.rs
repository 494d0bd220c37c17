#![allow(dead_code)]

use hdhomerun::protocol::{
    Frame, TAG_BASE_URL, TAG_DEVICE_ID, TAG_DEVICE_TYPE, TAG_ERROR_MESSAGE, TAG_GETSET_NAME,
    TAG_GETSET_VALUE, TAG_TUNER_COUNT, TYPE_DISCOVER_REQ, TYPE_DISCOVER_RPY, TYPE_GETSET_REQ,
    TYPE_GETSET_RPY,
};

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::oneshot::{self, Sender as OneShotSender};
use http::StatusCode;
use warp::Filter;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

pub const DEVICE_ID: &str = "1234ABCD";
pub const FIRMWARE_VERSION: &str = "20200907";
pub const OLD_FIRMWARE_VERSION: &str = "20180817";

/// Mutable behavior of the emulated HTTP surface
pub struct DeviceState {
    pub device_id: String,
    pub firmware_version: String,
    pub tuner_count: u8,
    pub base_url: String,
    /// When false, lineup.json answers 404
    pub lineup_ok: bool,
    /// When false, status.json answers 404 (pre-20190417 firmware)
    pub tuner_status_ok: bool,
}

/// A device emulated over HTTP, in the shape of the real JSON endpoints.
///
/// State may be mutated mid-test to flip endpoints between working and
/// missing; shutting the server down stands in for an unplugged device.
pub struct EmulatedDevice {
    pub state: Arc<RwLock<DeviceState>>,
    pub http_addr: SocketAddr,
    shutdown: Option<OneShotSender<()>>,
    drained: Option<std::sync::mpsc::Receiver<()>>,
}

impl EmulatedDevice {
    pub async fn start(device_id: &str, tuner_count: u8) -> Self {
        let state = Arc::new(RwLock::new(DeviceState {
            device_id: device_id.to_string(),
            firmware_version: FIRMWARE_VERSION.to_string(),
            tuner_count,
            base_url: String::new(),
            lineup_ok: true,
            tuner_status_ok: true,
        }));

        let discover = warp::path("discover.json").map({
            let state = state.clone();
            move || {
                warp::reply::with_status(
                    warp::reply::json(&discover_json(&state.read().unwrap())),
                    StatusCode::OK,
                )
            }
        });
        let lineup = warp::path("lineup.json").map({
            let state = state.clone();
            move || {
                if state.read().unwrap().lineup_ok {
                    warp::reply::with_status(warp::reply::json(&lineup_json()), StatusCode::OK)
                } else {
                    warp::reply::with_status(
                        warp::reply::json(&Value::Null),
                        StatusCode::NOT_FOUND,
                    )
                }
            }
        });
        let status = warp::path("status.json").map({
            let state = state.clone();
            move || {
                let state = state.read().unwrap();
                if state.tuner_status_ok {
                    warp::reply::with_status(
                        warp::reply::json(&status_json(state.tuner_count)),
                        StatusCode::OK,
                    )
                } else {
                    warp::reply::with_status(
                        warp::reply::json(&Value::Null),
                        StatusCode::NOT_FOUND,
                    )
                }
            }
        });

        // Keep-alive connections pooled by the client would outlive the
        // graceful shutdown and still be answered; close after every
        // response so shutdown() really means unreachable.
        let routes = discover
            .or(lineup)
            .or(status)
            .with(warp::reply::with::header("connection", "close"));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (http_addr, server) = warp::serve(routes)
            .bind_with_graceful_shutdown(SocketAddr::from(([127, 0, 0, 1], 0)), async {
                shutdown_rx.await.ok();
            });
        let (drained_tx, drained_rx) = std::sync::mpsc::channel();
        tokio::spawn(async move {
            server.await;
            drained_tx.send(()).ok();
        });

        state.write().unwrap().base_url = format!("http://{}", http_addr);

        Self {
            state,
            http_addr,
            shutdown: Some(shutdown_tx),
            drained: Some(drained_rx),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.http_addr)
    }

    pub fn discover_url(&self) -> String {
        format!("http://{}/discover.json", self.http_addr)
    }

    pub fn set_lineup_ok(&self, ok: bool) {
        self.state.write().unwrap().lineup_ok = ok;
    }

    pub fn set_tuner_status_ok(&self, ok: bool) {
        let mut state = self.state.write().unwrap();
        state.tuner_status_ok = ok;
        state.firmware_version = if ok {
            FIRMWARE_VERSION.to_string()
        } else {
            OLD_FIRMWARE_VERSION.to_string()
        };
    }

    /// Stop answering HTTP entirely, as an unplugged device would. Blocks
    /// until the server has finished draining so no request racing the
    /// signal can still be answered.
    pub fn shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.send(()).ok();
        }
        if let Some(drained) = self.drained.take() {
            drained
                .recv_timeout(std::time::Duration::from_secs(5))
                .ok();
        }
    }
}

fn discover_json(state: &DeviceState) -> Value {
    json!({
        "FriendlyName": "HDHomeRun CONNECT",
        "ModelNumber": "HDHR4-2US",
        "FirmwareName": "hdhomerun4_atsc",
        "FirmwareVersion": state.firmware_version,
        "DeviceID": state.device_id,
        "DeviceAuth": "t3stAuth/String",
        "BaseURL": state.base_url,
        "DiscoverURL": format!("{}/discover.json", state.base_url),
        "LineupURL": format!("{}/lineup.json", state.base_url),
        "TunerCount": state.tuner_count,
    })
}

fn lineup_json() -> Value {
    json!([
        {"GuideNumber": "5.1", "GuideName": "ABC", "HD": 1, "Favorite": 1,
         "URL": "http://192.168.0.20:5004/auto/v5.1"},
        {"GuideNumber": "7.2", "GuideName": "Retro", "Enabled": 0,
         "URL": "http://192.168.0.20:5004/auto/v7.2"},
    ])
}

fn status_json(tuner_count: u8) -> Value {
    let mut tuners = vec![json!({
        "Resource": "tuner0",
        "VctNumber": "5.1",
        "VctName": "ABC",
        "Frequency": 177_000_000u64,
        "SignalStrengthPercent": 92,
        "SignalQualityPercent": 88,
        "SymbolQualityPercent": 100,
        "TargetIP": "192.168.0.50",
        "NetworkRate": 6_892_000u64,
    })];
    for index in 1..tuner_count {
        tuners.push(json!({"Resource": format!("tuner{}", index)}));
    }
    Value::Array(tuners)
}

/// Answer UDP discovery requests for one emulated device. Reports its bound
/// address through `address_tx`.
pub async fn emulate_udp_device(
    address_tx: OneShotSender<SocketAddr>,
    device_id: u32,
    tuner_count: u8,
    base_url: Option<String>,
) {
    let socket = UdpSocket::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    address_tx.send(socket.local_addr().unwrap()).unwrap();

    let mut rbuf = [0; 2048];
    while let Ok((len, requester)) = socket.recv_from(&mut rbuf).await {
        let request = Frame::decode(&rbuf[..len]).unwrap();
        assert_eq!(request.frame_type(), TYPE_DISCOVER_REQ);

        let mut reply = Frame::new(TYPE_DISCOVER_RPY)
            .put_u32(TAG_DEVICE_TYPE, 1)
            .put_u32(TAG_DEVICE_ID, device_id)
            .put_u8(TAG_TUNER_COUNT, tuner_count);
        if let Some(url) = &base_url {
            reply = reply.put_bytes(TAG_BASE_URL, url.as_bytes());
        }
        socket.send_to(&reply.encode(), requester).await.unwrap();
    }
}

/// Serve one canned JSON body over raw HTTP for the discovery probe
pub async fn emulate_http_discovery(address_tx: OneShotSender<SocketAddr>, body: String) {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    address_tx.send(listener.local_addr().unwrap()).unwrap();

    while let Ok((mut stream, _)) = listener.accept().await {
        let mut rbuf = [0; 2048];
        let _ = stream.read(&mut rbuf).await;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
    }
}

/// Emulate the TCP control port: getset requests for known variables are
/// answered with their value, unknown names get the protocol error message,
/// and a restart drops the connection like a rebooting device.
pub async fn emulate_control_port(
    address_tx: OneShotSender<SocketAddr>,
    variables: HashMap<String, String>,
) {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    address_tx.send(listener.local_addr().unwrap()).unwrap();

    while let Ok((stream, _)) = listener.accept().await {
        tokio::spawn(serve_control_session(stream, variables.clone()));
    }
}

async fn serve_control_session(mut stream: TcpStream, variables: HashMap<String, String>) {
    loop {
        let mut header = [0; 4];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }
        let payload_len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let mut rest = vec![0; payload_len + 4];
        if stream.read_exact(&mut rest).await.is_err() {
            return;
        }

        let mut buf = header.to_vec();
        buf.extend_from_slice(&rest);
        let request = Frame::decode(&buf).unwrap();
        assert_eq!(request.frame_type(), TYPE_GETSET_REQ);

        let name = request.get_str(TAG_GETSET_NAME).unwrap();
        if name == "/sys/restart" {
            // Reboot: drop the connection without answering
            return;
        }

        let reply = match (
            variables.get(&name),
            request.get_str(TAG_GETSET_VALUE),
        ) {
            (Some(_), Some(new_value)) => Frame::new(TYPE_GETSET_RPY)
                .put_cstr(TAG_GETSET_NAME, &name)
                .put_cstr(TAG_GETSET_VALUE, new_value),
            (Some(value), None) => Frame::new(TYPE_GETSET_RPY)
                .put_cstr(TAG_GETSET_NAME, &name)
                .put_cstr(TAG_GETSET_VALUE, value),
            (None, _) => Frame::new(TYPE_GETSET_RPY)
                .put_cstr(TAG_GETSET_NAME, &name)
                .put_cstr(TAG_ERROR_MESSAGE, "ERROR: unknown getset variable"),
        };
        stream.write_all(&reply.encode()).await.unwrap();
    }
}

/// Standard set of control variables a healthy device would answer
pub fn control_variables() -> HashMap<String, String> {
    let mut variables = HashMap::new();
    variables.insert("/sys/version".to_string(), FIRMWARE_VERSION.to_string());
    variables.insert("/sys/model".to_string(), "hdhomerun4_atsc".to_string());
    variables.insert("/sys/hwmodel".to_string(), "HDHR4-2US".to_string());
    variables.insert("/sys/restart".to_string(), "self".to_string());
    variables
}
