use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use pdf_chat_core::StreamEvent;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;

use super::upload::{read_pdf_upload, TempUpload};
use super::{ApiError, ApiKey, AppState};

pub const DONE_SENTINEL: &str = "[DONE]";
pub const ERROR_PREFIX: &str = "[ERROR]";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub chunks_length: usize,
    pub filename: String,
    pub saved_as: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub question: String,
}

impl ChatRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.question.trim().is_empty() {
            return Err(ApiError::Validation("Question cannot be empty.".to_string()));
        }
        if self.session_id.trim().is_empty() {
            return Err(ApiError::Validation("session_id cannot be empty.".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub answer: String,
}

fn chat_body(body: Result<Json<ChatRequest>, JsonRejection>) -> Result<ChatRequest, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    request.validate()?;
    Ok(request)
}

pub async fn root() -> Json<Value> {
    Json(json!({ "status": "working fine" }))
}

pub async fn ingest(
    State(state): State<AppState>,
    ApiKey(key): ApiKey,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<IngestResponse>, ApiError> {
    state.limits.ingest.check(&key)?;
    let mut multipart =
        multipart.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;

    let upload = read_pdf_upload(&mut multipart, state.uploads.max_file_size).await?;
    let stored = TempUpload::persist(&state.uploads.dir, &upload.bytes).await?;
    tracing::info!(
        filename = %upload.filename,
        saved_as = %stored.saved_as(),
        bytes = upload.bytes.len(),
        "upload received"
    );

    let report = state.indexer.index(stored.path()).await?;

    Ok(Json(IngestResponse {
        chunks_length: report.chunks_created,
        filename: upload.filename,
        saved_as: stored.saved_as().to_string(),
        status: report.status,
    }))
}

pub async fn chat(
    State(state): State<AppState>,
    ApiKey(key): ApiKey,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    state.limits.chat.check(&key)?;
    let request = chat_body(body)?;

    let answer = state
        .orchestrator
        .answer(&request.session_id, &request.question)
        .await?;

    Ok(Json(ChatResponse {
        session_id: request.session_id,
        answer,
    }))
}

pub async fn chat_stream(
    State(state): State<AppState>,
    ApiKey(key): ApiKey,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    state.limits.stream.check(&key)?;
    let request = chat_body(body)?;

    let events = state
        .orchestrator
        .answer_stream(&request.session_id, &request.question)
        .await?;
    let sse = events.map(|event| Ok::<_, Infallible>(to_sse_event(event)));

    Ok(Sse::new(sse).into_response())
}

fn to_sse_event(event: StreamEvent) -> Event {
    match event {
        StreamEvent::Token(token) => Event::default().data(sse_safe(&token)),
        StreamEvent::Error(message) => {
            Event::default().data(format!("{ERROR_PREFIX} {}", sse_safe(&message)))
        }
        StreamEvent::Done => Event::default().data(DONE_SENTINEL),
    }
}

/// SSE fields cannot carry carriage returns; `data()` splits the remaining newlines
/// into separate `data:` lines.
fn sse_safe(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

pub async fn delete_session(
    State(state): State<AppState>,
    ApiKey(key): ApiKey,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.limits.session.check(&key)?;
    state.orchestrator.clear_session(&session_id).await;
    Ok(Json(json!({ "message": format!("Session {session_id} cleared") })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::gateway::{create_app, RateLimits, UploadSettings, API_KEY_HEADER};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use futures::stream;
    use pdf_chat_core::{
        CharacterNgramEmbedder, ChatError, ChatMessage, ChatModel, ChatOrchestrator,
        ConversationStore, DocumentIndexer, IngestError, IngestionOptions, InMemoryVectorStore,
        PageText, PdfExtractor, Retriever, TokenStream, FALLBACK_ANSWER,
    };
    use std::num::NonZeroU32;
    use std::path::Path as FsPath;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const KEY: &str = "test-secret";
    const MAX_UPLOAD: usize = 1024;
    const BOUNDARY: &str = "pdfchatboundary";

    struct ThreePages;

    impl PdfExtractor for ThreePages {
        fn extract_pages(&self, _path: &FsPath) -> Result<Vec<PageText>, IngestError> {
            Ok(vec![
                PageText {
                    number: 1,
                    text: "Pumps move hydraulic fluid through the circuit.".to_string(),
                },
                PageText {
                    number: 2,
                    text: "Valves regulate pressure in each branch.".to_string(),
                },
                PageText {
                    number: 3,
                    text: "Seals keep the fluid from leaking.".to_string(),
                },
            ])
        }
    }

    struct Unreadable;

    impl PdfExtractor for Unreadable {
        fn extract_pages(&self, _path: &FsPath) -> Result<Vec<PageText>, IngestError> {
            Err(IngestError::Extraction("no text layer".to_string()))
        }
    }

    /// Deterministic model that records the prompts it receives.
    #[derive(Default)]
    struct EchoModel {
        prompts: Mutex<Vec<Vec<ChatMessage>>>,
        fail_mid_stream: bool,
        fragments: Option<Vec<&'static str>>,
    }

    impl EchoModel {
        fn reply(messages: &[ChatMessage]) -> String {
            if messages[0].content.trim_end().ends_with("Context:") {
                FALLBACK_ANSWER.to_string()
            } else {
                let question = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
                format!("Based on the document, {question} is answered.")
            }
        }
    }

    #[async_trait]
    impl ChatModel for EchoModel {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
            self.prompts.lock().expect("prompts").push(messages.to_vec());
            Ok(Self::reply(messages))
        }

        async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream, ChatError> {
            self.prompts.lock().expect("prompts").push(messages.to_vec());
            let mut items: Vec<Result<String, ChatError>> = match &self.fragments {
                Some(fragments) => fragments.iter().map(|f| Ok(f.to_string())).collect(),
                None => Self::reply(messages)
                    .split_inclusive(' ')
                    .map(|token| Ok(token.to_string()))
                    .collect(),
            };
            if self.fail_mid_stream {
                items.truncate(1);
                items.push(Err(ChatError::Generation("upstream closed".to_string())));
            }
            Ok(stream::iter(items).boxed())
        }
    }

    struct Harness {
        app: Router,
        model: Arc<EchoModel>,
        conversations: Arc<ConversationStore>,
        uploads: TempDir,
    }

    fn harness_with(
        extractor: Arc<dyn PdfExtractor>,
        model: EchoModel,
        limits: RateLimitConfig,
    ) -> Harness {
        let uploads = tempfile::tempdir().expect("upload dir");
        let embedder = Arc::new(CharacterNgramEmbedder::default());
        let store = Arc::new(InMemoryVectorStore::new());
        let model = Arc::new(model);
        let conversations = Arc::new(ConversationStore::default());

        let indexer = DocumentIndexer::new(
            extractor,
            embedder.clone(),
            store.clone(),
            IngestionOptions::default(),
        );
        let orchestrator = ChatOrchestrator::new(
            Retriever::new(embedder, store, 4),
            model.clone(),
            conversations.clone(),
        );

        let state = AppState {
            indexer: Arc::new(indexer),
            orchestrator: Arc::new(orchestrator),
            limits: Arc::new(RateLimits::new(limits)),
            api_key: Arc::from(KEY),
            uploads: Arc::new(UploadSettings {
                dir: uploads.path().to_path_buf(),
                max_file_size: MAX_UPLOAD,
            }),
        };

        Harness {
            app: create_app(state),
            model,
            conversations,
            uploads,
        }
    }

    fn harness() -> Harness {
        harness_with(
            Arc::new(ThreePages),
            EchoModel::default(),
            RateLimitConfig::default(),
        )
    }

    fn multipart_request(filename: &str, contents: &[u8], key: Option<&str>) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/pdf\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(contents);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/ingest")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            );
        if let Some(key) = key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder.body(Body::from(body)).expect("request")
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header(API_KEY_HEADER, KEY)
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, bytes.to_vec())
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, bytes) = send(app, request).await;
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    fn sse_payloads(body: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(body)
            .split("\n\n")
            .filter(|event| !event.is_empty())
            .map(|event| {
                event
                    .lines()
                    .filter_map(|line| line.strip_prefix("data: "))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .collect()
    }

    fn upload_dir_is_empty(harness: &Harness) -> bool {
        std::fs::read_dir(harness.uploads.path())
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    #[tokio::test]
    async fn root_reports_liveness() {
        let harness = harness();
        let request = Request::builder().uri("/").body(Body::empty()).expect("request");
        let (status, body) = send_json(&harness.app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "working fine");
    }

    #[tokio::test]
    async fn ingest_indexes_pdf_and_removes_upload() {
        let harness = harness();
        let (status, body) = send_json(
            &harness.app,
            multipart_request("manual.pdf", b"%PDF-1.4 three pages", Some(KEY)),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["chunks_length"].as_u64().unwrap_or(0) > 0);
        assert_eq!(body["status"], "success");
        assert_eq!(body["filename"], "manual.pdf");
        assert!(body["saved_as"].as_str().unwrap_or_default().ends_with(".pdf"));
        assert!(upload_dir_is_empty(&harness));
    }

    #[tokio::test]
    async fn ingest_rejects_bad_uploads() {
        let harness = harness();

        let (status, _) = send(&harness.app, multipart_request("empty.pdf", b"", Some(KEY))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let oversized = vec![b'x'; MAX_UPLOAD + 1];
        let (status, _) = send(&harness.app, multipart_request("big.pdf", &oversized, Some(KEY))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let exact = vec![b'x'; MAX_UPLOAD];
        let (status, _) = send(&harness.app, multipart_request("exact.pdf", &exact, Some(KEY))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&harness.app, multipart_request("notes.txt", b"text", Some(KEY))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(upload_dir_is_empty(&harness));
    }

    #[tokio::test]
    async fn ingest_requires_valid_api_key() {
        let harness = harness();

        let (status, _) = send(&harness.app, multipart_request("a.pdf", b"%PDF", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&harness.app, multipart_request("a.pdf", b"%PDF", Some("wrong"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn indexer_failure_is_server_error_and_cleans_up() {
        let harness = harness_with(
            Arc::new(Unreadable),
            EchoModel::default(),
            RateLimitConfig::default(),
        );
        let (status, body) =
            send_json(&harness.app, multipart_request("scan.pdf", b"%PDF-1.4", Some(KEY))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error_type"], "ingestion_error");
        assert!(upload_dir_is_empty(&harness));
    }

    #[tokio::test]
    async fn chat_without_documents_falls_back() {
        let harness = harness();
        let (status, body) = send_json(
            &harness.app,
            json_request(
                Method::POST,
                "/chat",
                json!({"session_id": "s1", "question": "What is X?"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_id"], "s1");
        assert!(body["answer"].as_str().unwrap_or_default().contains(FALLBACK_ANSWER));
    }

    #[tokio::test]
    async fn chat_rejects_blank_fields() {
        let harness = harness();
        for payload in [
            json!({"session_id": "s1", "question": "   "}),
            json!({"session_id": "", "question": "What?"}),
            json!({"question": "What?"}),
        ] {
            let (status, _) =
                send(&harness.app, json_request(Method::POST, "/chat", payload)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
        assert_eq!(harness.conversations.session_count().await, 0);
    }

    #[tokio::test]
    async fn second_chat_prompt_includes_first_turn() {
        let harness = harness();
        send(&harness.app, multipart_request("manual.pdf", b"%PDF", Some(KEY))).await;

        let (_, first) = send_json(
            &harness.app,
            json_request(
                Method::POST,
                "/chat",
                json!({"session_id": "s1", "question": "What do pumps move?"}),
            ),
        )
        .await;
        send(
            &harness.app,
            json_request(
                Method::POST,
                "/chat",
                json!({"session_id": "s1", "question": "And valves?"}),
            ),
        )
        .await;

        let prompts = harness.model.prompts.lock().expect("prompts").clone();
        let second = &prompts[1];
        assert_eq!(second[1].content, "What do pumps move?");
        assert_eq!(second[2].content, first["answer"].as_str().unwrap_or_default());
        assert_eq!(second[3].content, "And valves?");
    }

    #[tokio::test]
    async fn stream_concatenates_to_blocking_answer() {
        let blocking = harness();
        let (_, body) = send_json(
            &blocking.app,
            json_request(
                Method::POST,
                "/chat",
                json!({"session_id": "s1", "question": "What do pumps move?"}),
            ),
        )
        .await;
        let expected = body["answer"].as_str().unwrap_or_default().to_string();

        let streaming = harness();
        let (status, bytes) = send(
            &streaming.app,
            json_request(
                Method::POST,
                "/chat/stream",
                json!({"session_id": "s1", "question": "What do pumps move?"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let payloads = sse_payloads(&bytes);
        assert_eq!(payloads.last().map(String::as_str), Some(DONE_SENTINEL));
        let streamed = payloads[..payloads.len() - 1].concat();
        assert_eq!(streamed, expected);
        assert_eq!(streaming.conversations.turn_count("s1").await, 1);
    }

    #[tokio::test]
    async fn stream_failure_reports_error_before_done() {
        let harness = harness_with(
            Arc::new(ThreePages),
            EchoModel {
                fail_mid_stream: true,
                ..EchoModel::default()
            },
            RateLimitConfig::default(),
        );
        let (status, bytes) = send(
            &harness.app,
            json_request(
                Method::POST,
                "/chat/stream",
                json!({"session_id": "s1", "question": "q"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let payloads = sse_payloads(&bytes);
        let count = payloads.len();
        assert!(count >= 2);
        assert!(payloads[count - 2].starts_with(ERROR_PREFIX));
        assert_eq!(payloads[count - 1], DONE_SENTINEL);
        assert_eq!(harness.conversations.turn_count("s1").await, 0);
    }

    #[tokio::test]
    async fn delete_session_is_idempotent() {
        let harness = harness();
        send(
            &harness.app,
            json_request(Method::POST, "/chat", json!({"session_id": "s1", "question": "q"})),
        )
        .await;
        assert_eq!(harness.conversations.turn_count("s1").await, 1);

        for _ in 0..2 {
            let request = Request::builder()
                .method(Method::DELETE)
                .uri("/session/s1")
                .header(API_KEY_HEADER, KEY)
                .body(Body::empty())
                .expect("request");
            let (status, body) = send_json(&harness.app, request).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["message"], "Session s1 cleared");
        }
        assert_eq!(harness.conversations.turn_count("s1").await, 0);
    }

    #[tokio::test]
    async fn rate_limited_chat_does_not_touch_history() {
        let harness = harness_with(
            Arc::new(ThreePages),
            EchoModel::default(),
            RateLimitConfig {
                chat: NonZeroU32::MIN,
                ..RateLimitConfig::default()
            },
        );
        let request =
            || json_request(Method::POST, "/chat", json!({"session_id": "s1", "question": "q"}));

        let (status, _) = send(&harness.app, request()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send_json(&harness.app, request()).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error_type"], "rate_limit_exceeded");
        assert_eq!(harness.conversations.turn_count("s1").await, 1);
    }

    #[tokio::test]
    async fn carriage_returns_in_fragments_do_not_break_the_stream() {
        let harness = harness_with(
            Arc::new(ThreePages),
            EchoModel {
                fragments: Some(vec!["line one\r\nline two", " and\rmore"]),
                ..EchoModel::default()
            },
            RateLimitConfig::default(),
        );
        let (status, bytes) = send(
            &harness.app,
            json_request(
                Method::POST,
                "/chat/stream",
                json!({"session_id": "s1", "question": "q"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(!bytes.contains(&b'\r'));
        let payloads = sse_payloads(&bytes);
        assert_eq!(
            payloads,
            vec![
                "line one\nline two".to_string(),
                " and\nmore".to_string(),
                DONE_SENTINEL.to_string()
            ]
        );
    }

    #[test]
    fn error_events_are_sse_safe() {
        assert_eq!(sse_safe("bad\r\ngateway\r"), "bad\ngateway\n");
        // Building the event must not panic.
        let _ = to_sse_event(StreamEvent::Error("upstream\r\nreset".to_string()));
    }

    #[tokio::test]
    async fn every_protected_route_checks_the_api_key() {
        let harness = harness();
        let routes = [
            (Method::POST, "/chat", json!({"session_id": "s1", "question": "q"}).to_string()),
            (Method::POST, "/chat/stream", json!({"session_id": "s1", "question": "q"}).to_string()),
            (Method::DELETE, "/session/s1", String::new()),
        ];

        for (method, uri, body) in routes {
            for (key, expected) in [
                (None, StatusCode::UNAUTHORIZED),
                (Some("wrong"), StatusCode::FORBIDDEN),
            ] {
                let mut builder = Request::builder()
                    .method(method.clone())
                    .uri(uri)
                    .header("content-type", "application/json");
                if let Some(key) = key {
                    builder = builder.header(API_KEY_HEADER, key);
                }
                let request = builder.body(Body::from(body.clone())).expect("request");

                let (status, error) = send_json(&harness.app, request).await;
                assert_eq!(status, expected, "{method} {uri} with key {key:?}");
                assert_eq!(error["error_type"], "unauthorized");
            }
        }
        assert_eq!(harness.conversations.session_count().await, 0);
    }
}
