//! HTTP client for end-to-end tests
//!
//! This module provides a high-level HTTP client that wraps reqwest
//! and provides methods for all sheetbridge endpoints.
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::multipart::{Form, Part};
use reqwest::Response;
use std::time::Duration;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    /// Client that gives up on requests after `timeout`
    pub fn with_timeout(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    // ========================================================================
    // Upload Endpoint
    // ========================================================================

    /// POST /upload with a single file field
    pub async fn upload(&self, file_name: &str, content: &[u8]) -> Response {
        self.send_form(Form::new().part("file", file_part(file_name, content)))
            .await
    }

    /// POST /upload with a single file field, returning transport errors
    /// (timeouts included) instead of panicking
    pub async fn try_upload(&self, file_name: &str, content: &[u8]) -> reqwest::Result<Response> {
        self.client
            .post(format!("{}/upload", self.base_url))
            .multipart(Form::new().part("file", file_part(file_name, content)))
            .send()
            .await
    }

    /// POST /upload with a file field and a target format field
    pub async fn upload_with_format(
        &self,
        file_name: &str,
        content: &[u8],
        format: &str,
    ) -> Response {
        let form = Form::new()
            .text("format", format.to_string())
            .part("file", file_part(file_name, content));
        self.send_form(form).await
    }

    /// POST /upload with a declared content type on the file part
    pub async fn upload_with_mime(&self, file_name: &str, content: &[u8], mime: &str) -> Response {
        let part = file_part(file_name, content)
            .mime_str(mime)
            .expect("Invalid mime type");
        self.send_form(Form::new().part("file", part)).await
    }

    /// POST /upload without any file field
    pub async fn upload_without_file(&self) -> Response {
        self.send_form(Form::new().text("format", "xlsx")).await
    }

    async fn send_form(&self, form: Form) -> Response {
        self.client
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
            .send()
            .await
            .expect("Upload request failed")
    }

    // ========================================================================
    // Other Endpoints
    // ========================================================================

    /// GET /health
    pub async fn health(&self) -> Response {
        self.get("/health").await
    }

    /// GET /
    pub async fn home(&self) -> Response {
        self.get("/").await
    }

    /// GET a path returned by the server, e.g. a download URL
    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("GET request failed")
    }
}

fn file_part(file_name: &str, content: &[u8]) -> Part {
    Part::bytes(content.to_vec()).file_name(file_name.to_string())
}
