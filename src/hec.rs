//! Splunk HTTP Event Collector delivery
//!
//! Records are wrapped into the HEC batch format
//! (`{"index", "sourcetype", "event": [...]}`) and posted in a single request.
//! A delivery is one best-effort attempt: there is no retry and no queue, the
//! caller logs the failure and drops the data.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::config::SplunkConfig;
use crate::error::DeliveryError;
use crate::record::Record;

pub const DEFAULT_SOURCETYPE: &str = "_json";

const AUTHORIZATION_SCHEME: &str = "Splunk";

/// Batch wrapper expected by the event collector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    pub sourcetype: String,
    pub event: Vec<Record>,
}

impl Envelope {
    /// Empty values count as unset: no index, and `_json` as sourcetype.
    pub fn build(records: Vec<Record>, index: Option<&str>, sourcetype: Option<&str>) -> Envelope {
        let index = index.filter(|index| !index.is_empty());
        let sourcetype = sourcetype
            .filter(|sourcetype| !sourcetype.is_empty())
            .unwrap_or(DEFAULT_SOURCETYPE);

        Envelope {
            index: index.map(str::to_string),
            sourcetype: sourcetype.to_string(),
            event: records,
        }
    }
}

/// Envelope factory carrying the configured index and sourcetype
#[derive(Debug, Clone, Default)]
pub struct EnvelopeBuilder {
    index: Option<String>,
    sourcetype: Option<String>,
}

impl EnvelopeBuilder {
    pub fn new(index: Option<String>, sourcetype: Option<String>) -> Self {
        Self { index, sourcetype }
    }

    pub fn from_config(config: &SplunkConfig) -> Self {
        Self::new(config.splunk_index.clone(), config.splunk_sourcetype.clone())
    }

    pub fn build(&self, records: Vec<Record>) -> Envelope {
        Envelope::build(records, self.index.as_deref(), self.sourcetype.as_deref())
    }
}

/// HTTP client bound to one collector endpoint
#[derive(Debug, Clone)]
pub struct HecSink {
    client: Client,
    url: Url,
    token: String,
}

impl HecSink {
    /// Create a sink for `url`.
    ///
    /// Only `http` and `https` are accepted. With `tls_verify` disabled the
    /// certificate of an https endpoint is not checked.
    pub fn new(
        url: &str,
        token: &str,
        tls_verify: bool,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let url = Url::parse(url).map_err(|e| DeliveryError::InvalidUrl(e.to_string()))?;

        let builder = Client::builder().timeout(timeout);
        let builder = match url.scheme() {
            "http" => {
                debug!("using HTTP scheme");
                builder
            }
            "https" if tls_verify => {
                debug!("using HTTPS scheme");
                builder
            }
            "https" => {
                debug!("using HTTPS scheme, certificate check disabled");
                builder.danger_accept_invalid_certs(true)
            }
            other => return Err(DeliveryError::UnsupportedScheme(other.to_string())),
        };

        Ok(Self {
            client: builder.build()?,
            url,
            token: token.to_string(),
        })
    }

    pub fn from_config(config: &SplunkConfig) -> Result<Self, DeliveryError> {
        Self::new(
            &config.splunk_hec_url,
            &config.splunk_hec_token,
            config.tls_verify,
            config.delivery_timeout(),
        )
    }

    /// Post the envelope once and classify the response.
    #[instrument(skip_all, fields(events = envelope.event.len()))]
    pub async fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(envelope)?;
        debug!(payload = %String::from_utf8_lossy(&body), "data for HEC prepared");

        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("{AUTHORIZATION_SCHEME} {}", self.token))
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => format!("<failed to read response body: {e}>"),
            };
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!("data successfully sent to Splunk");
        Ok(())
    }
}

/// Envelope building and delivery in one step
#[derive(Debug, Clone)]
pub struct Forwarder {
    builder: EnvelopeBuilder,
    sink: HecSink,
}

impl Forwarder {
    pub fn new(builder: EnvelopeBuilder, sink: HecSink) -> Self {
        Self { builder, sink }
    }

    pub fn from_config(config: &SplunkConfig) -> Result<Self, DeliveryError> {
        Ok(Self::new(
            EnvelopeBuilder::from_config(config),
            HecSink::from_config(config)?,
        ))
    }

    /// Deliver `records` as one batch; returns how many events were accepted.
    pub async fn forward(&self, records: Vec<Record>) -> Result<usize, DeliveryError> {
        let envelope = self.builder.build(records);
        let count = envelope.event.len();
        self.sink.deliver(&envelope).await?;
        Ok(count)
    }
}
