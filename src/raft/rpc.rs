//! Wire framing shared by the Raft peer protocol and the application RPC
//! surface: a 4-byte big-endian length prefix followed by a JSON payload,
//! matching the teacher's existing `write_u32(len) + bytes` convention.

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub async fn write_message<T: Serialize>(stream: &mut TcpStream, msg: &T) -> Result<()> {
    let bytes = serde_json::to_vec(msg)?;
    stream.write_u32(bytes.len() as u32).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

pub async fn read_message<T: DeserializeOwned>(stream: &mut TcpStream) -> Result<T> {
    let len = stream.read_u32().await?;
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}

/// Send `msg` to `addr` and wait for a single framed reply, under `timeout`.
pub async fn call<Req: Serialize, Resp: DeserializeOwned>(
    addr: &str,
    msg: &Req,
    timeout: std::time::Duration,
) -> Result<Resp> {
    tokio::time::timeout(timeout, async {
        let mut stream = TcpStream::connect(addr).await?;
        write_message(&mut stream, msg).await?;
        read_message(&mut stream).await
    })
    .await
    .map_err(|_| anyhow::anyhow!("timeout calling {}", addr))?
}
