//! Chat-completion client for OpenRouter and other OpenAI-compatible APIs.

use crate::error::{ConfigError, GenerationError};
use crate::models::{ChatTurn, GenerationOptions};
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Produces text from an ordered conversation.
pub trait Generator {
    fn generate(
        &self,
        turns: &[ChatTurn],
        options: &GenerationOptions,
    ) -> Result<String, GenerationError>;
}

impl<T: Generator + ?Sized> Generator for &T {
    fn generate(
        &self,
        turns: &[ChatTurn],
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        (**self).generate(turns, options)
    }
}

#[derive(Debug, Clone)]
pub struct ChatClientConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub http_referer: Option<String>,
    pub x_title: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    temperature: f32,
    max_tokens: u32,
}

pub struct OpenRouterClient {
    client: Client,
    endpoint: String,
    config: ChatClientConfig,
}

impl OpenRouterClient {
    pub fn new(config: ChatClientConfig) -> Result<Self, ConfigError> {
        if config.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("OPENROUTER_API_KEY"));
        }

        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            config,
        })
    }
}

impl Generator for OpenRouterClient {
    fn generate(
        &self,
        turns: &[ChatTurn],
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&ChatRequest {
                model: &self.config.model,
                messages: turns,
                temperature: options.temperature,
                max_tokens: options.max_tokens,
            });
        if let Some(referer) = &self.config.http_referer {
            request = request.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.config.x_title {
            request = request.header("X-Title", title);
        }

        debug!(model = %self.config.model, turns = turns.len(), "sending chat completion");
        let response = request.send().map_err(|error| self.classify(error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(status = status.as_u16(), "generation endpoint returned an error");
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().map_err(|error| self.classify(error))?;
        parse_completion(&body)
    }
}

impl OpenRouterClient {
    fn classify(&self, error: reqwest::Error) -> GenerationError {
        if error.is_timeout() {
            GenerationError::Timeout(self.config.timeout.as_secs())
        } else {
            GenerationError::Network(error)
        }
    }
}

/// Pulls `choices[0].message.content` out of a chat-completion body.
pub fn parse_completion(body: &str) -> Result<String, GenerationError> {
    let parsed: Value = serde_json::from_str(body)
        .map_err(|error| GenerationError::MalformedResponse(format!("invalid json: {error}")))?;

    if let Some(message) = parsed.pointer("/error/message").and_then(Value::as_str) {
        return Err(GenerationError::MalformedResponse(format!(
            "provider error: {message}"
        )));
    }

    parsed
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            GenerationError::MalformedResponse(format!(
                "response has no choices[0].message.content: {}",
                truncate(body, 200)
            ))
        })
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::Role;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn options() -> GenerationOptions {
        GenerationOptions {
            temperature: 0.1,
            max_tokens: 64,
        }
    }

    fn client(api_base: String, timeout: Duration) -> OpenRouterClient {
        OpenRouterClient::new(ChatClientConfig {
            api_base,
            api_key: "test-key".to_string(),
            model: "test/model".to_string(),
            timeout,
            http_referer: Some("https://example.invalid/project".to_string()),
            x_title: Some("Test Harness".to_string()),
        })
        .expect("client should build")
    }

    /// Reads one HTTP request and returns its head and body.
    pub(crate) fn read_request(stream: &mut TcpStream) -> (String, String) {
        let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
        let mut head = String::new();
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).expect("read header line");
            if line == "\r\n" || line.is_empty() {
                break;
            }
            if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                content_length = value.trim().parse().unwrap_or(0);
            }
            head.push_str(&line);
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).expect("read body");
        (head, String::from_utf8_lossy(&body).to_string())
    }

    /// Serves exactly one canned response and hands back the request it saw.
    pub(crate) fn serve_once(status_line: &'static str, body: &'static str) -> (String, thread::JoinHandle<(String, String)>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let address = format!("http://{}", listener.local_addr().expect("local addr"));
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let request = read_request(&mut stream);
            let response = format!(
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).expect("write response");
            request
        });
        (address, handle)
    }

    #[test]
    fn completion_content_is_extracted() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"42"}}]}"#;
        assert_eq!(parse_completion(body).expect("valid body"), "42");
    }

    #[test]
    fn missing_content_is_malformed() {
        for body in [r#"{"choices":[]}"#, r#"{"id":"x"}"#, "not json", r#"{"error":{"message":"rate limited"}}"#] {
            assert!(matches!(
                parse_completion(body),
                Err(GenerationError::MalformedResponse(_))
            ));
        }
    }

    #[test]
    fn request_carries_auth_attribution_and_parameters() {
        let (address, server) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"grounded answer"}}]}"#,
        );
        let turns = vec![ChatTurn::system("rules"), ChatTurn::user("What is AI?")];

        let answer = client(address, Duration::from_secs(5))
            .generate(&turns, &options())
            .expect("generation should succeed");
        assert_eq!(answer, "grounded answer");

        let (head, body) = server.join().expect("server thread");
        let head = head.to_ascii_lowercase();
        assert!(head.starts_with("post /chat/completions"));
        assert!(head.contains("authorization: bearer test-key"));
        assert!(head.contains("http-referer: https://example.invalid/project"));
        assert!(head.contains("x-title: test harness"));

        let payload: Value = serde_json::from_str(&body).expect("json body");
        assert_eq!(payload["model"], "test/model");
        assert_eq!(payload["max_tokens"], 64);
        assert_eq!(payload["messages"][1]["role"], "user");
        assert_eq!(payload["messages"][1]["content"], "What is AI?");
        assert_eq!(turns[0].role, Role::System);
    }

    #[test]
    fn non_success_status_is_reported_with_code() {
        let (address, server) = serve_once("HTTP/1.1 429 Too Many Requests", r#"{"error":"slow down"}"#);
        let result = client(address, Duration::from_secs(5)).generate(&[ChatTurn::user("hi")], &options());
        server.join().expect("server thread");
        assert!(matches!(result, Err(GenerationError::Status { status: 429, .. })));
    }

    #[test]
    fn stalled_endpoint_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let address = format!("http://{}", listener.local_addr().expect("local addr"));
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            thread::sleep(Duration::from_secs(3));
            drop(stream);
        });

        let result = client(address, Duration::from_millis(300)).generate(&[ChatTurn::user("hi")], &options());
        assert!(matches!(result, Err(GenerationError::Timeout(_))));
        server.join().expect("server thread");
    }

    #[test]
    fn unreachable_endpoint_is_a_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let address = format!("http://{}", listener.local_addr().expect("local addr"));
        drop(listener);

        let result = client(address, Duration::from_secs(2)).generate(&[ChatTurn::user("hi")], &options());
        assert!(matches!(result, Err(GenerationError::Network(_))));
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let result = OpenRouterClient::new(ChatClientConfig {
            api_base: "https://openrouter.ai/api/v1".to_string(),
            api_key: " ".to_string(),
            model: "m".to_string(),
            timeout: Duration::from_secs(1),
            http_referer: None,
            x_title: None,
        });
        assert!(matches!(result, Err(ConfigError::Missing(_))));
    }
}
