//! SCPI client framing against a loopback TCP server.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use vectorstar::{ScpiClient, ScpiOps, VisaResource};

/// Minimal fake instrument: answers *IDN?, serves one binary block for
/// :DATA?, and never answers SLOW?.
async fn spawn_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match line.trim() {
                "*IDN?" => {
                    write_half.write_all(b"FAKE,VNA,0001,1.0\n").await.unwrap();
                }
                ":DATA?" => {
                    let mut payload = Vec::new();
                    for v in [1.5f64, -2.25] {
                        payload.extend_from_slice(&v.to_le_bytes());
                    }
                    let mut msg = format!("#2{}", payload.len()).into_bytes();
                    msg.extend_from_slice(&payload);
                    msg.push(b'\n');
                    write_half.write_all(&msg).await.unwrap();
                }
                ":BADBLOCK?" => {
                    write_half.write_all(b"@oops\n").await.unwrap();
                }
                "SLOW?" => {}
                _ => {}
            }
        }
    });
    port
}

fn loopback(port: u16) -> VisaResource {
    VisaResource::TcpipSocket {
        board: 0,
        host: "127.0.0.1".to_string(),
        port,
    }
}

#[tokio::test]
async fn query_and_binary_block_round_trip() {
    let port = spawn_server().await;
    let client = ScpiClient::connect(&loopback(port))
        .await
        .unwrap()
        .with_timeout(Duration::from_secs(2));

    assert_eq!(client.query("*IDN?").await.unwrap(), "FAKE,VNA,0001,1.0");

    let data = client.query_binary_f64(":DATA?").await.unwrap();
    assert_eq!(data, vec![1.5, -2.25]);

    // The block's trailing terminator must not corrupt the next query
    assert_eq!(client.query("*IDN?").await.unwrap(), "FAKE,VNA,0001,1.0");
}

#[tokio::test]
async fn malformed_block_marker_is_rejected() {
    let port = spawn_server().await;
    let client = ScpiClient::connect(&loopback(port))
        .await
        .unwrap()
        .with_timeout(Duration::from_secs(2));

    let err = client.query_binary_f64(":BADBLOCK?").await.unwrap_err();
    assert!(err.to_string().contains("block marker"), "{err:#}");
}

#[tokio::test]
async fn missing_response_times_out() {
    let port = spawn_server().await;
    let client = ScpiClient::connect(&loopback(port))
        .await
        .unwrap()
        .with_timeout(Duration::from_millis(100));

    let err = client.query("SLOW?").await.unwrap_err();
    assert!(err.to_string().contains("timeout"), "{err:#}");
}

#[tokio::test]
async fn gpib_resources_cannot_connect() {
    let err = ScpiClient::connect(&VisaResource::Gpib {
        board: 0,
        address: 6,
    })
    .await
    .unwrap_err();
    assert!(err.to_string().contains("not supported"), "{err:#}");
}
