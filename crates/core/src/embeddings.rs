use crate::error::EmbedError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// Text to vector collaborator. Must be deterministic for a given model id;
/// the same embedder has to be used for building an index and querying it.
pub trait Embedder {
    fn model_id(&self) -> &str;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

impl<T: Embedder + ?Sized> Embedder for Box<T> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        (**self).embed(text)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        (**self).embed_batch(texts)
    }
}

/// Offline embedder hashing character trigrams into a fixed number of buckets.
#[derive(Debug, Clone)]
pub struct CharacterNgramEmbedder {
    dimensions: usize,
    model_id: String,
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model_id: format!("char-trigram-{dimensions}"),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0f32; self.dimensions];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        for trigram in chars.windows(3) {
            vector[trigram_bucket(trigram, self.dimensions)] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            vector.iter_mut().for_each(|value| *value /= magnitude);
        }
        Ok(vector)
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over the UTF-8 bytes of the trigram.
fn trigram_bucket(trigram: &[char], buckets: usize) -> usize {
    let mut utf8 = [0u8; 4];
    let hash = trigram.iter().fold(FNV_OFFSET, |hash, ch| {
        ch.encode_utf8(&mut utf8)
            .bytes()
            .fold(hash, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME))
    });
    (hash % buckets as u64) as usize
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(
        api_base: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EmbedError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", api_base.trim_end_matches('/')),
            model: model.into(),
            api_key,
        })
    }
}

impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| EmbedError::InvalidResponse("no embedding returned".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EmbedError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: EmbeddingResponse = response
            .json()
            .map_err(|error| EmbedError::InvalidResponse(error.to_string()))?;
        order_embeddings(payload, texts.len())
    }
}

fn order_embeddings(
    payload: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    if payload.data.len() != expected {
        return Err(EmbedError::InvalidResponse(format!(
            "expected {expected} embeddings, got {}",
            payload.data.len()
        )));
    }

    let mut data = payload.data;
    if data.iter().all(|datum| datum.index.is_some()) {
        data.sort_by_key(|datum| datum.index);
    }
    Ok(data.into_iter().map(|datum| datum.embedding).collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::tests::serve_once;
    use std::cell::Cell;
    use std::net::TcpListener;
    use std::thread;

    /// Wraps the n-gram embedder and counts how often it is called.
    pub(crate) struct CountingEmbedder {
        inner: CharacterNgramEmbedder,
        pub calls: Cell<usize>,
    }

    impl CountingEmbedder {
        pub(crate) fn new() -> Self {
            Self {
                inner: CharacterNgramEmbedder::default(),
                calls: Cell::new(0),
            }
        }
    }

    impl Embedder for CountingEmbedder {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            self.calls.set(self.calls.get() + 1);
            self.inner.embed(text)
        }
    }

    fn cosine(left: &[f32], right: &[f32]) -> f32 {
        left.iter().zip(right).map(|(a, b)| a * b).sum()
    }

    #[test]
    fn question_lands_closer_to_its_passage_than_to_an_unrelated_one() -> Result<(), EmbedError> {
        let embedder = CharacterNgramEmbedder::default();
        let question = embedder.embed("What is Artificial Intelligence?")?;
        let passage = embedder.embed("Artificial Intelligence (AI) is a branch of computer science.")?;
        let unrelated = embedder.embed("Filters trap particles before they reach the valves.")?;

        assert!(cosine(&question, &passage) > cosine(&question, &unrelated));
        assert_eq!(question, embedder.embed("WHAT IS ARTIFICIAL INTELLIGENCE?")?);
        Ok(())
    }

    #[test]
    fn model_id_tracks_dimensions_so_cached_indexes_go_stale() -> Result<(), EmbedError> {
        let narrow = CharacterNgramEmbedder::new(32);
        assert_eq!(narrow.embed("Page one.")?.len(), 32);
        assert_ne!(narrow.model_id(), CharacterNgramEmbedder::default().model_id());
        assert_eq!(CharacterNgramEmbedder::new(0).dimensions(), 1);
        Ok(())
    }

    #[test]
    fn text_shorter_than_a_trigram_embeds_to_zero() -> Result<(), EmbedError> {
        let vector = CharacterNgramEmbedder::new(8).embed("AI")?;
        assert!(vector.iter().all(|value| *value == 0.0));
        Ok(())
    }

    fn http_embedder(address: &str, api_key: Option<&str>, timeout: Duration) -> HttpEmbedder {
        HttpEmbedder::new(
            &format!("{address}/v1/"),
            "test/embedder",
            api_key.map(str::to_string),
            timeout,
        )
        .expect("embedder should build")
    }

    #[test]
    fn http_batch_posts_to_embeddings_with_bearer_auth() -> Result<(), EmbedError> {
        let (address, server) = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"data":[{"index":1,"embedding":[0.0,1.0]},{"index":0,"embedding":[1.0,0.0]}]}"#,
        );

        let vectors = http_embedder(&address, Some("emb-key"), Duration::from_secs(5))
            .embed_batch(&["first page", "second page"])?;
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);

        let (head, body) = server.join().expect("server thread");
        let head = head.to_ascii_lowercase();
        assert!(head.starts_with("post /v1/embeddings "));
        assert!(head.contains("authorization: bearer emb-key"));
        let payload: serde_json::Value = serde_json::from_str(&body).expect("json body");
        assert_eq!(payload["model"], "test/embedder");
        assert_eq!(payload["input"][1], "second page");
        Ok(())
    }

    #[test]
    fn http_error_status_is_reported() {
        let (address, server) = serve_once("HTTP/1.1 401 Unauthorized", r#"{"error":"bad key"}"#);
        let result = http_embedder(&address, None, Duration::from_secs(5)).embed("hi");
        let (head, _) = server.join().expect("server thread");

        assert!(matches!(result, Err(EmbedError::Status { status: 401, .. })));
        assert!(!head.to_ascii_lowercase().contains("authorization"));
    }

    #[test]
    fn http_body_without_data_is_invalid() {
        let (address, server) = serve_once("HTTP/1.1 200 OK", r#"{"object":"list"}"#);
        let result = http_embedder(&address, None, Duration::from_secs(5)).embed("hi");
        server.join().expect("server thread");
        assert!(matches!(result, Err(EmbedError::InvalidResponse(_))));
    }

    #[test]
    fn stalled_embedding_endpoint_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let address = format!("http://{}", listener.local_addr().expect("local addr"));
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            thread::sleep(Duration::from_secs(2));
            drop(stream);
        });

        let result = http_embedder(&address, None, Duration::from_millis(300)).embed("hi");
        assert!(matches!(result, Err(EmbedError::Http(ref error)) if error.is_timeout()));
        server.join().expect("server thread");
    }

    #[test]
    fn batch_embedding_preserves_order() -> Result<(), EmbedError> {
        let embedder = CharacterNgramEmbedder::default();
        let batch = embedder.embed_batch(&["first text", "second text"])?;
        assert_eq!(batch[0], embedder.embed("first text")?);
        assert_eq!(batch[1], embedder.embed("second text")?);
        Ok(())
    }

    #[test]
    fn http_payload_is_reordered_by_index() -> Result<(), EmbedError> {
        let payload: EmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"index":1,"embedding":[2.0]},{"index":0,"embedding":[1.0]}]}"#,
        )
        .map_err(|error| EmbedError::InvalidResponse(error.to_string()))?;

        let ordered = order_embeddings(payload, 2)?;
        assert_eq!(ordered, vec![vec![1.0], vec![2.0]]);
        Ok(())
    }

    #[test]
    fn http_payload_with_wrong_count_is_rejected() {
        let payload = EmbeddingResponse { data: Vec::new() };
        assert!(matches!(
            order_embeddings(payload, 1),
            Err(EmbedError::InvalidResponse(_))
        ));
    }
}
