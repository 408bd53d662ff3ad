use std::fmt::{Debug, Display};

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

/// One decoded unit of the completion stream: either a piece of assistant
/// text or the `[DONE]` sentinel that ends the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatResponse {
    Done,
    DeltaContent(String),
}
impl ChatResponse {
    const DONE_SENTINEL: &'static str = "[DONE]";
    fn from_data(data: &str) -> Result<Self> {
        if data.starts_with(Self::DONE_SENTINEL) {
            return Ok(Self::Done);
        }
        match serde_json::from_str::<StreamChat>(data) {
            Ok(chunk) => Ok(Self::from(chunk)),
            Err(e) => Err(ChatClientError::new(
                format!("failed to parse chat chunk: {}", e),
                ChatClientErrorKind::ParseError(data.to_string()),
            )),
        }
    }
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
    pub fn delta_content(&self) -> &str {
        match self {
            Self::DeltaContent(s) => s.as_str(),
            _ => "",
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub(crate) struct StreamChat {
    choices: Vec<StreamChatChoices>,
    created: usize,
    id: String,
    model: String,
    object: String,
}
impl StreamChat {
    fn first_delta(self) -> Option<String> {
        self.choices.into_iter().next()?.delta.content
    }
}
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
struct StreamChatChoices {
    delta: StreamChatChoicesDelta,
    finish_reason: serde_json::Value,
    index: usize,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
struct StreamChatChoicesDelta {
    content: Option<String>,
}
impl From<StreamChat> for ChatResponse {
    fn from(s: StreamChat) -> Self {
        s.first_delta()
            .map_or_else(|| Self::DeltaContent(String::new()), Self::DeltaContent)
    }
}

/// The unified seam over the streaming transport: one call per received
/// increment, `Done` on graceful end, an error otherwise. Decode errors
/// carry the `ParseError` kind and are skippable by the consumer.
#[allow(async_fn_in_trait)]
pub trait ChatStream {
    async fn receive_next(&mut self) -> Result<ChatResponse>;
}

/// Assembles raw body bytes into complete lines. Chunks may end mid-line or
/// even mid-utf8 sequence, so text decoding happens only once the `\n` byte
/// closing a line has arrived.
struct SseLineBuffer {
    buffer: Vec<u8>,
}
impl SseLineBuffer {
    fn new() -> Self {
        Self { buffer: Vec::new() }
    }
    fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }
    fn take_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let line_bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
        let mut line = String::from_utf8_lossy(&line_bytes).into_owned();
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }
}

/// SSE framing over a chat-completions response body. Bytes are buffered
/// until a full `data:` line is available, then decoded one event at a time.
pub struct SseChatStream {
    response: reqwest::Response,
    buffer: SseLineBuffer,
}
impl SseChatStream {
    fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            buffer: SseLineBuffer::new(),
        }
    }
}
impl ChatStream for SseChatStream {
    async fn receive_next(&mut self) -> Result<ChatResponse> {
        loop {
            while let Some(line) = self.buffer.take_line() {
                if let Some(decoded) = decode_sse_line(&line) {
                    return decoded;
                }
            }
            match self.response.chunk().await {
                Ok(Some(bytes)) => self.buffer.extend(&bytes),
                // body closed without a [DONE] sentinel is still a graceful end
                Ok(None) => return Ok(ChatResponse::Done),
                Err(e) => {
                    return Err(ChatClientError::new(
                        format!("failed to read sse stream: {}", e),
                        ChatClientErrorKind::ReadStreamError(e.to_string()),
                    ))
                }
            }
        }
    }
}

/// Decodes one SSE line. Blank lines, comments and non-data fields yield
/// `None` and are not events at all.
fn decode_sse_line(line: &str) -> Option<Result<ChatResponse>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let data = line.strip_prefix("data:")?.trim_start();
    Some(ChatResponse::from_data(data))
}

pub struct ChatClient {
    inner: reqwest::Client,
}
impl ChatClient {
    const URL: &'static str = "https://api.openai.com/v1/chat/completions";
    pub fn new(key: ApiKey) -> Result<Self> {
        // auth and content-type ride on every request via the client itself,
        // never at the call site
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", key.key())).map_err(|e| {
            ChatClientError::new(
                format!("api key is not a valid header value: {}", e),
                ChatClientErrorKind::RequestError(e.to_string()),
            )
        })?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let inner = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| {
                ChatClientError::new(
                    format!("failed to build http client: {}", e),
                    ChatClientErrorKind::RequestError(e.to_string()),
                )
            })?;
        Ok(Self { inner })
    }
    pub fn from_env() -> Result<Self> {
        Self::new(ApiKey::from_env()?)
    }
    pub async fn stream_chat(&self, request: &ChatRequest) -> Result<SseChatStream> {
        let response = self
            .inner
            .post(Self::URL)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                ChatClientError::new(
                    format!("failed to send chat request: {}", e),
                    ChatClientErrorKind::RequestError(e.to_string()),
                )
            })?
            .error_for_status()
            .map_err(|e| {
                ChatClientError::new(
                    format!("chat endpoint returned an error status: {}", e),
                    ChatClientErrorKind::ResponseError(e.to_string()),
                )
            })?;
        Ok(SseChatStream::new(response))
    }
}

#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    const ENV_KEY: &'static str = "API_KEY";
    pub fn from_env() -> Result<Self> {
        match std::env::var(Self::ENV_KEY) {
            Ok(key) if !key.is_empty() => Ok(Self(key)),
            _ => Err(ChatClientError::new(
                format!("{} is not set", Self::ENV_KEY),
                ChatClientErrorKind::NotFoundEnvApiKey,
            )),
        }
    }
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
    fn key(&self) -> &str {
        self.0.as_str()
    }
}
impl Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", "x".repeat(self.0.len()))
    }
}
impl Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", "x".repeat(self.0.len()))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct ChatRequest {
    model: OpenAIModel,
    stream: bool,
    messages: Vec<RequestMessage>,
}
impl ChatRequest {
    pub fn new(model: OpenAIModel, messages: Vec<RequestMessage>) -> Self {
        Self {
            model,
            stream: true,
            messages,
        }
    }
}

/// The `{role, content}` pair on the wire. History entries are mapped into
/// this shape per turn; display-only fields never reach the endpoint.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct RequestMessage {
    role: Role,
    content: String,
}
impl RequestMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Deserialize, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}
impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}
impl serde::Serialize for Role {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, serde::Deserialize, PartialEq, Eq, Default)]
pub enum OpenAIModel {
    #[default]
    Gpt3Dot5Turbo,
    Gpt4,
}
impl serde::Serialize for OpenAIModel {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}
impl OpenAIModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt3Dot5Turbo => "gpt-3.5-turbo",
            Self::Gpt4 => "gpt-4",
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ChatClientError {
    message: String,
    pub kind: ChatClientErrorKind,
}
impl ChatClientError {
    pub fn new(message: String, kind: ChatClientErrorKind) -> Self {
        Self { message, kind }
    }
    /// Decode failures are the only errors a stream consumer may skip.
    pub fn is_decode_error(&self) -> bool {
        matches!(self.kind, ChatClientErrorKind::ParseError(_))
    }
}
impl Display for ChatClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "kind : {}\n message : {}", self.kind, self.message)
    }
}
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ChatClientErrorKind {
    NotFoundEnvApiKey,
    RequestError(String),
    ResponseError(String),
    ParseError(String),
    ReadStreamError(String),
}
impl Display for ChatClientErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::NotFoundEnvApiKey => format!("Not found {} in env", ApiKey::ENV_KEY),
            Self::RequestError(s) => format!("Request Error. Error is : {}", s),
            Self::ResponseError(s) => format!("Response Error. Error is : {}", s),
            Self::ParseError(s) => format!("Parse Error. Data is : {}", s),
            Self::ReadStreamError(s) => format!("Not Read Stream. Error is : {}", s),
        };
        write!(f, "{}", kind)
    }
}
impl std::error::Error for ChatClientError {}
pub type Result<T> = std::result::Result<T, ChatClientError>;


#[cfg(test)]
pub mod fakes {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Plays back a fixed sequence of stream events; counts how many times
    /// the connection was released via `Drop`.
    pub struct ScriptedStream {
        events: VecDeque<Result<ChatResponse>>,
        closed: Arc<AtomicUsize>,
    }
    impl ScriptedStream {
        pub fn new(events: Vec<Result<ChatResponse>>) -> (Self, Arc<AtomicUsize>) {
            let closed = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    events: events.into(),
                    closed: Arc::clone(&closed),
                },
                closed,
            )
        }
    }
    impl ChatStream for ScriptedStream {
        async fn receive_next(&mut self) -> Result<ChatResponse> {
            self.events.pop_front().unwrap_or(Ok(ChatResponse::Done))
        }
    }
    impl Drop for ScriptedStream {
        fn drop(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn delta(s: &str) -> Result<ChatResponse> {
        Ok(ChatResponse::DeltaContent(s.to_string()))
    }
    pub fn parse_error(data: &str) -> Result<ChatResponse> {
        Err(ChatClientError::new(
            format!("failed to parse chat chunk: {}", data),
            ChatClientErrorKind::ParseError(data.to_string()),
        ))
    }
    pub fn stream_error(message: &str) -> Result<ChatResponse> {
        Err(ChatClientError::new(
            message.to_string(),
            ChatClientErrorKind::ReadStreamError(message.to_string()),
        ))
    }

    pub fn make_stream_chat_json(message: &str) -> String {
        format!(
            r#"{{"id":"chatcmpl-xxxxxxxxxxxxxxxxxxxxxxxxxxxxx","object":"chat.completion.chunk","created":1694832938,"model":"gpt-3.5-turbo-0613","choices":[{{"index":0,"delta":{{"content":"{}"}},"finish_reason":null}}]}}"#,
            message
        )
    }
}
