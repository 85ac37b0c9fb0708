//! Encrypted channel over any byte stream.
//!
//! [`client_handshake`] and [`server_handshake`] run the plaintext exchange
//! and hand back independent reader and writer halves that share one
//! [`CryptoSession`]. Each side seals with its own random nonce prefix, so the
//! two directions never reuse a nonce.

use std::sync::Arc;

use helix_crypto::{CryptoSession, IdentityKeyPair, KeyExchangeState, PublicIdentity};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::debug;

use crate::codec::{read_frame, read_json, write_frame, write_json};
use crate::error::ProtoError;
use crate::messages::{Handshake, PROTOCOL_VERSION};

/// What the client learned about the server during the handshake.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub server_id: String,
    pub identity: PublicIdentity,
}

/// What the server learned about the client during the handshake.
#[derive(Debug, Clone)]
pub struct ClientHello {
    pub device_id: String,
}

/// Receiving half of an established channel.
pub struct ChannelReader<R> {
    inner: R,
    session: Arc<CryptoSession>,
}

/// Sending half of an established channel.
pub struct ChannelWriter<W> {
    inner: W,
    session: Arc<CryptoSession>,
}

impl<R: AsyncRead + Unpin> ChannelReader<R> {
    /// Next message, or `None` once the peer has closed the stream.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtoError> {
        let Some(frame) = read_frame(&mut self.inner).await? else {
            return Ok(None);
        };
        let plaintext = self.session.open_frame(&frame)?;
        Ok(Some(serde_json::from_slice(&plaintext)?))
    }
}

impl<W: AsyncWrite + Unpin> ChannelWriter<W> {
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), ProtoError> {
        let plaintext = serde_json::to_vec(message)?;
        let frame = self.session.seal_frame(&plaintext)?;
        write_frame(&mut self.inner, &frame).await
    }

    /// Flush and half-close the underlying stream.
    pub async fn shutdown(&mut self) -> Result<(), ProtoError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

type Halves<S> = (ChannelReader<ReadHalf<S>>, ChannelWriter<WriteHalf<S>>);

fn split_channel<S>(stream: S, session: CryptoSession) -> Halves<S>
where
    S: AsyncRead + AsyncWrite,
{
    let session = Arc::new(session);
    let (r, w) = tokio::io::split(stream);
    (
        ChannelReader {
            inner: r,
            session: Arc::clone(&session),
        },
        ChannelWriter { inner: w, session },
    )
}

/// Client side of the handshake.
pub async fn client_handshake<S>(
    mut stream: S,
    device_id: &str,
) -> Result<(Halves<S>, ServerInfo), ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exchange = KeyExchangeState::new();
    write_json(
        &mut stream,
        &Handshake::Hello {
            protocol_version: PROTOCOL_VERSION,
            device_id: device_id.to_string(),
            ephemeral_public_key: hex::encode(exchange.public_bytes()),
        },
    )
    .await?;

    let (server_id, ephemeral, identity) = match read_json(&mut stream).await? {
        Handshake::Welcome {
            protocol_version,
            server_id,
            ephemeral_public_key,
            identity_public_key,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                return Err(ProtoError::VersionMismatch {
                    expected: PROTOCOL_VERSION,
                    actual: protocol_version,
                });
            }
            (server_id, ephemeral_public_key, identity_public_key)
        }
        Handshake::Reject { reason } => return Err(ProtoError::Rejected(reason)),
        Handshake::Hello { .. } => {
            return Err(ProtoError::UnexpectedMessage(
                "hello from server".to_string(),
            ));
        }
    };

    let identity = PublicIdentity::from_hex(&identity)?;
    let ephemeral = PublicIdentity::from_hex(&ephemeral)?;
    let session = exchange.complete_client(ephemeral.as_bytes(), &identity)?;
    debug!(%server_id, fingerprint = %identity.fingerprint(), "Channel key agreed");

    Ok((
        split_channel(stream, session),
        ServerInfo {
            server_id,
            identity,
        },
    ))
}

/// Server side of the handshake.
pub async fn server_handshake<S>(
    mut stream: S,
    identity: Arc<IdentityKeyPair>,
    server_id: &str,
) -> Result<(Halves<S>, ClientHello), ProtoError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (device_id, client_ephemeral) = match read_json(&mut stream).await? {
        Handshake::Hello {
            protocol_version,
            device_id,
            ephemeral_public_key,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                let reason = format!("unsupported protocol version {protocol_version}");
                write_json(&mut stream, &Handshake::Reject { reason }).await?;
                return Err(ProtoError::VersionMismatch {
                    expected: PROTOCOL_VERSION,
                    actual: protocol_version,
                });
            }
            (device_id, ephemeral_public_key)
        }
        other => {
            return Err(ProtoError::UnexpectedMessage(format!(
                "expected hello, got {other:?}"
            )));
        }
    };

    let client_ephemeral = PublicIdentity::from_hex(&client_ephemeral)?;
    let identity_hex = identity.public_identity().to_hex();
    let exchange = KeyExchangeState::with_identity(identity);
    write_json(
        &mut stream,
        &Handshake::Welcome {
            protocol_version: PROTOCOL_VERSION,
            server_id: server_id.to_string(),
            ephemeral_public_key: hex::encode(exchange.public_bytes()),
            identity_public_key: identity_hex,
        },
    )
    .await?;
    let session = exchange.complete_server(client_ephemeral.as_bytes())?;

    Ok((split_channel(stream, session), ClientHello { device_id }))
}
