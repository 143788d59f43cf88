//! # Prometheus module
//!
//! This module provide a minimal prometheus http api client and the queries
//! used to monitor kubedb databases

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::svc::http::{self, RestClient};

pub mod dashboard;

// -----------------------------------------------------------------------------
// Constants

pub const STATUS_SUCCESS: &str = "success";
pub const ALERTS_WINDOW_MINUTES: i64 = 60;
pub const ALERTS_STEP: &str = "2m";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to query prometheus, {0}")]
    Http(http::Error),
    #[error("prometheus rejected query '{0}', {1}: {2}")]
    Query(String, String, String),
}

impl From<http::Error> for Error {
    fn from(err: http::Error) -> Self {
        Self::Http(err)
    }
}

// -----------------------------------------------------------------------------
// Query structures

#[derive(Serialize, PartialEq, Clone, Debug)]
pub struct InstantQuery {
    #[serde(rename = "query")]
    pub query: String,
    #[serde(rename = "time")]
    pub time: i64,
}

#[derive(Serialize, PartialEq, Clone, Debug)]
pub struct RangeQuery {
    #[serde(rename = "query")]
    pub query: String,
    #[serde(rename = "start")]
    pub start: i64,
    #[serde(rename = "end")]
    pub end: i64,
    #[serde(rename = "step")]
    pub step: String,
}

// -----------------------------------------------------------------------------
// Response structures

#[derive(Deserialize, PartialEq, Clone, Debug)]
pub struct Response<T> {
    #[serde(rename = "status")]
    pub status: String,
    #[serde(rename = "data", default = "Option::default")]
    pub data: Option<Data<T>>,
    #[serde(rename = "errorType", default)]
    pub error_type: Option<String>,
    #[serde(rename = "error", default)]
    pub error: Option<String>,
    #[serde(rename = "warnings", default)]
    pub warnings: Vec<String>,
}

#[derive(Deserialize, PartialEq, Clone, Debug)]
pub struct Data<T> {
    #[serde(rename = "resultType")]
    pub result_type: String,
    #[serde(rename = "result", default = "Vec::new")]
    pub result: Vec<T>,
}

/// an element of an instant vector
#[derive(Deserialize, PartialEq, Clone, Debug)]
pub struct Sample {
    #[serde(rename = "metric", default)]
    pub metric: BTreeMap<String, String>,
    #[serde(rename = "value")]
    pub value: (f64, String),
}

/// an element of a range vector
#[derive(Deserialize, PartialEq, Clone, Debug)]
pub struct Series {
    #[serde(rename = "metric", default)]
    pub metric: BTreeMap<String, String>,
    #[serde(rename = "values", default)]
    pub values: Vec<(f64, String)>,
}

// -----------------------------------------------------------------------------
// Client structure

#[derive(Clone, Debug)]
pub struct Client {
    inner: http::Client,
    endpoint: String,
}

impl Client {
    pub fn new(endpoint: String) -> Self {
        Self {
            inner: http::Client::default(),
            endpoint,
        }
    }

    /// evaluates an instant query at the given time
    pub async fn query(&self, query: &str, time: DateTime<Utc>) -> Result<Vec<Sample>, Error> {
        let params = InstantQuery {
            query: query.to_string(),
            time: time.timestamp(),
        };

        self.execute("query", query, &params).await
    }

    /// evaluates an expression query over a range of time
    pub async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: &str,
    ) -> Result<Vec<Series>, Error> {
        let params = RangeQuery {
            query: query.to_string(),
            start: start.timestamp(),
            end: end.timestamp(),
            step: step.to_string(),
        };

        self.execute("query_range", query, &params).await
    }

    async fn execute<Q, T>(&self, path: &str, query: &str, params: &Q) -> Result<Vec<T>, Error>
    where
        Q: Serialize + Send + Sync,
        T: DeserializeOwned + Send + Sync,
    {
        let endpoint = format!("{}/api/v1/{}", self.endpoint, path);

        debug!(endpoint = &endpoint, query = query, "execute prometheus query");
        let res: Response<T> = self.inner.get_with(&endpoint, params).await?;
        for warning in &res.warnings {
            warn!(query = query, warning = warning, "prometheus returned a warning");
        }

        into_result(query, res)
    }
}

/// extracts the result of a response, failed statuses become errors
pub fn into_result<T>(query: &str, res: Response<T>) -> Result<Vec<T>, Error> {
    if res.status != STATUS_SUCCESS {
        return Err(Error::Query(
            query.to_string(),
            res.error_type.unwrap_or_default(),
            res.error.unwrap_or_default(),
        ));
    }

    Ok(res.data.map(|data| data.result).unwrap_or_default())
}

// -----------------------------------------------------------------------------
// queries

/// returns the firing alerts of the database
pub fn alerts_query(plural: &str, name: &str, namespace: &str) -> String {
    format!(
        "ALERTS{{alertstate=\"firing\",k8s_group=\"kubedb.com\",k8s_resource=\"{}\",app=\"{}\",app_namespace=\"{}\"}}",
        plural, name, namespace
    )
}

/// returns the scrape state of the database's stats service
pub fn up_query(namespace: &str, name: &str) -> String {
    format!("up{{namespace=\"{}\",service=\"{}-stats\"}}", namespace, name)
}

/// returns the bounds of the window the alerts are looked up in
pub fn alerts_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (now - Duration::minutes(ALERTS_WINDOW_MINUTES), now)
}

/// renders labels like prometheus does, e.g. `{a="b", c="d"}`
pub fn render_labels(labels: &BTreeMap<String, String>) -> String {
    let labels = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v))
        .collect::<Vec<_>>()
        .join(", ");

    format!("{{{}}}", labels)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn builds_queries() {
        assert_eq!(
            alerts_query("postgreses", "pg-demo", "demo"),
            "ALERTS{alertstate=\"firing\",k8s_group=\"kubedb.com\",k8s_resource=\"postgreses\",app=\"pg-demo\",app_namespace=\"demo\"}"
        );
        assert_eq!(
            up_query("demo", "pg-demo"),
            "up{namespace=\"demo\",service=\"pg-demo-stats\"}"
        );
    }

    #[test]
    fn encodes_query_parameters() {
        let params = RangeQuery {
            query: "up{a=\"b\"}".into(),
            start: 10,
            end: 20,
            step: ALERTS_STEP.into(),
        };

        let encoded = serde_qs::to_string(&params).unwrap();
        assert!(encoded.starts_with("query=up%7Ba%3D%22b%22%7D"));
        assert!(encoded.ends_with("&start=10&end=20&step=2m"));
    }

    #[test]
    fn decodes_vectors_and_matrices() {
        let res: Response<Sample> = serde_json::from_value(json!({
            "status": "success",
            "data": {
                "resultType": "vector",
                "result": [{"metric": {"__name__": "up", "pod": "pg-0"}, "value": [1700000000.5, "1"]}]
            }
        }))
        .unwrap();

        let samples = into_result("up", res).unwrap();
        assert_eq!(samples[0].value.1, "1");
        assert_eq!(samples[0].metric["pod"], "pg-0");

        let res: Response<Series> = serde_json::from_value(json!({
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [{"metric": {"alertname": "PostgresDown"}, "values": [[1.0, "1"], [2.0, "1"]]}]
            },
            "warnings": ["partial"]
        }))
        .unwrap();

        assert_eq!(res.warnings, vec!["partial"]);
        assert_eq!(into_result("ALERTS", res).unwrap()[0].values.len(), 2);
    }

    #[test]
    fn surfaces_query_errors() {
        let res: Response<Sample> = serde_json::from_value(json!({
            "status": "error",
            "errorType": "bad_data",
            "error": "parse error"
        }))
        .unwrap();

        assert_eq!(
            into_result("up{", res).unwrap_err().to_string(),
            "prometheus rejected query 'up{', bad_data: parse error"
        );
    }

    #[test]
    fn computes_alert_window() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let (start, end) = alerts_window(now);

        assert_eq!(end, now);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap());
    }

    #[test]
    fn renders_prometheus_labels() {
        let labels = BTreeMap::from([
            ("alertname".to_string(), "Down".to_string()),
            ("app".to_string(), "pg".to_string()),
        ]);

        assert_eq!(render_labels(&labels), "{alertname=\"Down\", app=\"pg\"}");
    }
}
