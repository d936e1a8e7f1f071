//! End-to-end checks against a running server.
//!
//! Start it with the bundled fixture first:
//!
//! ```text
//! PORTAL_FIXTURE=fixtures/portal.json cargo run
//! cargo test --test integration_scrape_e2e -- --ignored
//! ```

use once_cell::sync::Lazy;
use serde_json::{Value, json};

static BASE_URL: Lazy<String> = Lazy::new(|| {
    std::env::var("E2E_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string())
});

struct TestContext {
    client: reqwest::Client,
}

impl TestContext {
    fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn url(path: &str) -> String {
        format!("{}{}", *BASE_URL, path)
    }

    async fn authenticate(&self, password: &str) -> reqwest::Response {
        self.client
            .post(Self::url("/user/alice/auth"))
            .json(&json!({ "password": password, "showBrowser": false }))
            .send()
            .await
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "needs a running server with PORTAL_FIXTURE=fixtures/portal.json"]
    async fn test_authenticate_and_query_january() {
        let context = TestContext::new();

        // Step 1: authenticate
        let response = context.authenticate("correct-pw").await;
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["authenticated"], true);

        // Step 2: January in Sydney
        let response = context
            .client
            .get(TestContext::url("/user/alice/transactions"))
            .query(&[("startDate", "01-01-2024"), ("endDate", "01-31-2024")])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let transactions: Vec<Value> = response.json().await.unwrap();
        assert_eq!(transactions.len(), 3);

        // Step 3: unknown account is a 404
        let response = context
            .client
            .get(TestContext::url("/user/alice/account/does-not-exist/transactions"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        // Step 4: sign out
        let response = context
            .client
            .delete(TestContext::url("/user/alice/auth"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    #[ignore = "needs a running server with PORTAL_FIXTURE=fixtures/portal.json"]
    async fn test_wrong_password_leaves_user_signed_out() {
        let context = TestContext::new();

        let response = context.authenticate("wrong-pw").await;
        assert_eq!(response.status(), 401);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["kind"], "invalid_credentials");

        let response = context
            .client
            .get(TestContext::url("/user/alice/accounts"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
    }

    #[tokio::test]
    #[ignore = "needs a running server with PORTAL_FIXTURE=fixtures/portal.json"]
    async fn test_scrape_stream_ends_with_done() {
        let context = TestContext::new();

        let response = context
            .client
            .get(TestContext::url("/api/scrape/stream"))
            .query(&[
                ("username", "alice"),
                ("password", "correct-pw"),
                ("startDate", "01-01-2024"),
                ("endDate", "01-31-2024"),
            ])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let text = response.text().await.unwrap();
        let last = text
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .last()
            .unwrap();
        let done: Value = serde_json::from_str(last).unwrap();
        assert_eq!(done["type"], "done");
        assert_eq!(done["transactions"].as_array().unwrap().len(), 3);
    }
}
