use anyhow::{Context, Result};
use iris_testcontainers::jdbc_url::namespace_of;
use iris_testcontainers::ConnectionDetails;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{Duration, Instant};

/// One result row, keyed by column name.
pub type Row = Map<String, Value>;

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    parameters: &'a [Value],
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    status: Status,
    #[serde(default)]
    result: QueryResult,
}

#[derive(Debug, Default, Deserialize)]
struct Status {
    #[serde(default)]
    errors: Vec<Value>,
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Default, Deserialize)]
struct QueryResult {
    #[serde(default)]
    content: Vec<Row>,
}

/// Runs SQL against an IRIS instance through the Atelier REST API on the
/// web port, authenticating with the container credentials.
#[derive(Debug, Clone)]
pub struct IrisClient {
    http: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
}

impl IrisClient {
    pub fn connect(details: &ConnectionDetails) -> Result<Self> {
        let namespace = namespace_of(&details.jdbc_url)
            .with_context(|| format!("no namespace in url `{}`", details.jdbc_url))?;
        let endpoint = format!(
            "{}/api/atelier/v1/{}/action/query",
            details.web_url.trim_end_matches('/'),
            namespace
        );
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            endpoint,
            username: details.username.clone(),
            password: details.password.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.query_with(sql, &[]).await
    }

    pub async fn query_with(&self, sql: &str, parameters: &[Value]) -> Result<Vec<Row>> {
        tracing::debug!(endpoint = %self.endpoint, sql, "running query");
        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .json(&QueryRequest {
                query: sql,
                parameters,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("query failed with HTTP {}: {}", status, body);
        }

        let body: QueryResponse = response.json().await?;
        if !body.status.errors.is_empty() {
            let messages: Vec<String> = body
                .status
                .errors
                .iter()
                .map(|e| match e.get("error").and_then(Value::as_str) {
                    Some(message) => message.to_string(),
                    None => e.to_string(),
                })
                .collect();
            anyhow::bail!("query failed: {}", messages.join("; "));
        }
        if !body.status.summary.is_empty() {
            tracing::debug!(summary = %body.status.summary, "query summary");
        }
        Ok(body.result.content)
    }

    /// Runs a query expected to return exactly one row with one integer column.
    pub async fn query_scalar_i64(&self, sql: &str) -> Result<i64> {
        let rows = self.query(sql).await?;
        let [row] = rows.as_slice() else {
            anyhow::bail!("expected a single row, got {}", rows.len());
        };
        let mut values = row.values();
        let (Some(value), None) = (values.next(), values.next()) else {
            anyhow::bail!("expected a single column, got {}", row.len());
        };
        let scalar = match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        };
        scalar.with_context(|| format!("`{}` is not an integer", value))
    }

    pub async fn ping(&self) -> Result<Duration> {
        let t0 = Instant::now();
        let one = self.query_scalar_i64(iris_testcontainers::iris::TEST_QUERY).await?;
        anyhow::ensure!(one == 1, "test query returned {}", one);
        Ok(t0.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(jdbc_url: &str) -> ConnectionDetails {
        ConnectionDetails {
            jdbc_url: jdbc_url.to_string(),
            web_url: "http://localhost:52773/".to_string(),
            username: "test".to_string(),
            password: "test".to_string(),
        }
    }

    #[test]
    fn endpoint_uses_namespace_from_url() {
        let client = IrisClient::connect(&details("jdbc:IRIS://localhost:1972/TEST?a=b")).unwrap();
        assert_eq!(
            client.endpoint(),
            "http://localhost:52773/api/atelier/v1/TEST/action/query"
        );
    }

    #[test]
    fn url_without_namespace_is_rejected() {
        assert!(IrisClient::connect(&details("jdbc:IRIS://localhost:1972/")).is_err());
    }

    #[test]
    fn response_parses_rows() {
        let body: QueryResponse = serde_json::from_str(
            r#"{"status":{"errors":[],"summary":""},"console":[],"result":{"content":[{"Expression_1":1}]}}"#,
        )
        .unwrap();
        assert!(body.status.errors.is_empty());
        assert_eq!(body.result.content.len(), 1);
        assert_eq!(body.result.content[0]["Expression_1"], 1);
    }
}
