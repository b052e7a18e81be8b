//! Time-series sinks

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use crate::config::InfluxConfig;
use crate::point::{to_line_protocol, MeasurementPoint};

/// Errors from a time-series sink
#[derive(Debug, Error)]
pub enum SinkError {
    /// The database could not be reached or failed on its side
    #[error("time-series database is not accessible: {0}")]
    Connection(String),

    /// The database refused the request; retrying will not help
    #[error("time-series database rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl SinkError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, SinkError::Rejected { .. })
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        SinkError::Connection(err.to_string())
    }
}

/// Destination for measurement points
#[async_trait]
pub trait TimeSeriesSink: Send + Sync {
    /// Check that the database is reachable
    async fn ping(&self) -> Result<(), SinkError>;

    /// Write one batch of points
    async fn write_points(&self, points: &[MeasurementPoint]) -> Result<(), SinkError>;
}

/// InfluxDB 1.x HTTP API sink
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: Client,
    base_url: String,
    database: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpSink {
    pub fn new(config: &InfluxConfig) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url(),
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_ref()),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> Result<(), SinkError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        if status.is_client_error() && status != StatusCode::REQUEST_TIMEOUT {
            Err(SinkError::Rejected {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(SinkError::Connection(format!("{status}: {message}")))
        }
    }
}

#[async_trait]
impl TimeSeriesSink for HttpSink {
    async fn ping(&self) -> Result<(), SinkError> {
        let url = format!("{}/ping", self.base_url);
        let response = self.authorize(self.client.get(&url)).send().await?;
        Self::check(response).await
    }

    async fn write_points(&self, points: &[MeasurementPoint]) -> Result<(), SinkError> {
        if points.is_empty() {
            return Ok(());
        }
        let url = format!("{}/write", self.base_url);
        let request = self
            .client
            .post(&url)
            .query(&[("db", self.database.as_str()), ("precision", "ns")])
            .body(to_line_protocol(points));
        let response = self.authorize(request).send().await?;
        Self::check(response).await?;
        debug!(points = points.len(), "Wrote points");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_are_permanent() {
        assert!(SinkError::Rejected {
            status: 400,
            message: "unable to parse".into()
        }
        .is_permanent());
        assert!(!SinkError::Connection("refused".into()).is_permanent());
    }

    #[test]
    fn test_http_sink_from_config() {
        let config = InfluxConfig {
            host: "influx.lan".into(),
            username: Some("ha".into()),
            ..InfluxConfig::default()
        };
        let sink = HttpSink::new(&config).unwrap();
        assert_eq!(sink.base_url, "http://influx.lan:8086");
        assert_eq!(sink.database, "home_assistant");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_connection_error() {
        let config = InfluxConfig {
            host: "127.0.0.1".into(),
            port: 9,
            timeout: std::time::Duration::from_millis(500),
            ..InfluxConfig::default()
        };
        let sink = HttpSink::new(&config).unwrap();
        let err = sink.ping().await.unwrap_err();
        assert!(matches!(err, SinkError::Connection(_)));
    }
}
