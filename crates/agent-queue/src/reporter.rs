// ResultReporter: delivers action results to the control plane.

use crate::error::ReportError;

use agent_common::constants::ACTION_RESULT_PATH;
use agent_common::ActionResult;
use async_trait::async_trait;

/// Delivers an action result. Callers only log the outcome.
#[async_trait]
pub trait ResultReporter: Send + Sync {
    async fn report(
        &self,
        result: &ActionResult,
        api_key: &str,
        base_url: &str,
    ) -> Result<(), ReportError>;
}

/// Posts results as JSON to `<base_url>/v2/integrations/oec/actionExecutionResult`.
pub struct HttpResultReporter {
    client: reqwest::Client,
}

impl HttpResultReporter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn result_url(base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), ACTION_RESULT_PATH)
    }
}

#[async_trait]
impl ResultReporter for HttpResultReporter {
    async fn report(
        &self,
        result: &ActionResult,
        api_key: &str,
        base_url: &str,
    ) -> Result<(), ReportError> {
        let response = self
            .client
            .post(Self::result_url(base_url))
            .header(reqwest::header::AUTHORIZATION, format!("GenieKey {}", api_key))
            .json(result)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accepts one request, answers with `status_line` and returns the raw request.
    async fn serve_once(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!("{}\r\nContent-Length: 4\r\n\r\nnope", status_line);
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (base_url, handle)
    }

    fn sample_result() -> ActionResult {
        ActionResult {
            alert_id: "alert-7".into(),
            action: "Restart".into(),
            is_successful: true,
            ..Default::default()
        }
    }

    #[test]
    fn result_url_trims_trailing_slash() {
        assert_eq!(
            HttpResultReporter::result_url("https://api.example.com/"),
            "https://api.example.com/v2/integrations/oec/actionExecutionResult"
        );
    }

    #[tokio::test]
    async fn posts_result_with_genie_key() {
        let (base_url, server) = serve_once("HTTP/1.1 202 Accepted").await;
        let reporter = HttpResultReporter::new(reqwest::Client::new());

        reporter
            .report(&sample_result(), "key-123", &base_url)
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v2/integrations/oec/actionExecutionResult "));
        assert!(request
            .to_ascii_lowercase()
            .contains("authorization: geniekey key-123"));
        assert!(request.contains(r#""alertId":"alert-7""#));
        assert!(request.contains(r#""isSuccessful":true"#));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (base_url, server) = serve_once("HTTP/1.1 401 Unauthorized").await;
        let reporter = HttpResultReporter::new(reqwest::Client::new());

        let err = reporter
            .report(&sample_result(), "bad-key", &base_url)
            .await
            .unwrap_err();

        assert!(matches!(err, ReportError::Status { status: 401, ref body } if body == "nope"));
        server.await.unwrap();
    }
}
