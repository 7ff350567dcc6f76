//! Random commit-message quotes from a plain-text HTTP service.

use async_trait::async_trait;

/// Fetches one quote. Never fails: errors are logged and whatever text was obtained is returned.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch(&self) -> String;
}

/// GETs a plain-text quote (e.g. whatthecommit.com/index.txt).
#[derive(Clone)]
pub struct HttpQuoteSource {
    url: String,
    client: reqwest::Client,
}

impl HttpQuoteSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    async fn fetch(&self) -> String {
        let res = match self.client.get(&self.url).send().await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("quote: GET {} failed: {}", self.url, e);
                return String::new();
            }
        };
        match res.text().await {
            Ok(body) => body.trim().to_string(),
            Err(e) => {
                log::warn!("quote: reading body from {} failed: {}", self.url, e);
                String::new()
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};

    #[tokio::test]
    async fn body_is_trimmed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/index.txt", get(|| async { "  \n Fixed a typo \n\n" }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let source = HttpQuoteSource::new(format!("http://{}/index.txt", addr));
        assert_eq!(source.fetch().await, "Fixed a typo");
    }

    #[tokio::test]
    async fn unreachable_service_yields_empty_text() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
            listener.local_addr().expect("local_addr").port()
        };
        let source = HttpQuoteSource::new(format!("http://127.0.0.1:{}/index.txt", port));
        assert_eq!(source.fetch().await, "");
    }
}
