//! Secure RPC channel to a Firehose endpoint.
//!
//! [`ChannelFactory`] turns a [`ChannelConfig`] and a bearer token into
//! connected [`FirehoseClient`]s. Every client carries the token as
//! `authorization: Bearer ...` metadata, the configured message size limits
//! and the configured compression.

use core::{fmt, str::FromStr, time::Duration};
use firehose_extract_core::{
    Error, Result, proto::bstream::block_stream_v2_client::BlockStreamV2Client,
};
use tonic::{
    Request, Status,
    codec::CompressionEncoding,
    metadata::{Ascii, MetadataValue},
    service::{Interceptor, interceptor::InterceptedService},
    transport::{Channel, ClientTlsConfig, Endpoint},
};

/// Default cap for encoded and decoded messages. Blocks with many traces
/// easily exceed tonic's 4 MiB default.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Streaming client with bearer authentication.
pub type FirehoseClient = BlockStreamV2Client<InterceptedService<Channel, BearerToken>>;

/// Message compression negotiated with the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Compression {
    None,
    #[default]
    Gzip,
    Zstd,
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "gzip" => Ok(Compression::Gzip),
            "zstd" => Ok(Compression::Zstd),
            other => Err(format!(
                "unknown compression `{other}` (expected none, gzip or zstd)"
            )),
        }
    }
}

impl From<Compression> for Option<CompressionEncoding> {
    fn from(value: Compression) -> Self {
        match value {
            Compression::None => None,
            Compression::Gzip => Some(CompressionEncoding::Gzip),
            Compression::Zstd => Some(CompressionEncoding::Zstd),
        }
    }
}

/// Where and how to connect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    /// `host:port`, or a full `http(s)://` URI.
    pub endpoint: String,
    /// Use TLS with the platform's native root certificates.
    pub tls: bool,
    pub max_message_size: usize,
    pub compression: Compression,
    pub connect_timeout: Duration,
}

impl ChannelConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            tls: true,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            compression: Compression::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Endpoint as a URI. A bare `host:port` gets `https://` with TLS and
    /// `http://` without.
    pub fn uri(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else if self.tls {
            format!("https://{}", self.endpoint)
        } else {
            format!("http://{}", self.endpoint)
        }
    }
}

/// Adds `authorization: Bearer <token>` to every outgoing call.
///
/// An empty token sends no header, which is what local unauthenticated
/// endpoints expect.
#[derive(Clone, Debug, Default)]
pub struct BearerToken(Option<MetadataValue<Ascii>>);

impl BearerToken {
    pub fn new(token: &str) -> Result<Self> {
        if token.is_empty() {
            return Ok(Self(None));
        }
        let value = format!("Bearer {token}")
            .parse::<MetadataValue<Ascii>>()
            .map_err(|_| Error::Authentication {
                reason: "token contains characters not allowed in gRPC metadata".to_string(),
            })?;
        Ok(Self(Some(value)))
    }
}

impl Interceptor for BearerToken {
    fn call(&mut self, mut request: Request<()>) -> core::result::Result<Request<()>, Status> {
        if let Some(value) = &self.0 {
            request
                .metadata_mut()
                .insert("authorization", value.clone());
        }
        Ok(request)
    }
}

/// Builds channels and clients for one run.
#[derive(Clone, Debug)]
pub struct ChannelFactory {
    config: ChannelConfig,
    auth: BearerToken,
}

impl ChannelFactory {
    pub fn new(config: ChannelConfig, token: &str) -> Result<Self> {
        Ok(Self {
            config,
            auth: BearerToken::new(token)?,
        })
    }

    pub const fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn endpoint(&self) -> Result<Endpoint> {
        let uri = self.config.uri();
        let endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| Error::Channel {
                context: format!("invalid endpoint `{uri}`: {e}"),
            })?
            .connect_timeout(self.config.connect_timeout)
            .http2_adaptive_window(true);

        if !self.config.tls {
            return Ok(endpoint);
        }

        endpoint
            .tls_config(ClientTlsConfig::new().with_native_roots())
            .map_err(|e| Error::Channel {
                context: format!("TLS setup for `{uri}` failed: {e}"),
            })
    }

    /// Opens a new HTTP/2 connection.
    pub async fn connect(&self) -> Result<Channel> {
        let endpoint = self.endpoint()?;
        tracing::debug!("Connecting to {}", self.config.uri());
        endpoint.connect().await.map_err(|e| Error::Channel {
            context: format!("could not connect to `{}`: {e}", self.config.uri()),
        })
    }

    /// Wraps `channel` with authentication, size limits and compression.
    pub fn client(&self, channel: Channel) -> FirehoseClient {
        let size = self.config.max_message_size;
        let client = BlockStreamV2Client::with_interceptor(channel, self.auth.clone())
            .max_decoding_message_size(size)
            .max_encoding_message_size(size);

        match Option::<CompressionEncoding>::from(self.config.compression) {
            Some(encoding) => client.accept_compressed(encoding).send_compressed(encoding),
            None => client,
        }
    }

    pub async fn connect_client(&self) -> Result<FirehoseClient> {
        Ok(self.client(self.connect().await?))
    }
}
