use std::io::{self, Write};

use super::client::{
    ChatClient, ChatClientError, ChatRequest, ChatResponse, ChatStream, OpenAIModel,
    RequestMessage, Role,
};
use crate::persona::{self, Personality};

/// One history entry. `speaker` is the display label (the user's name or the
/// personality's name, empty for system) and never reaches the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub speaker: String,
    pub content: String,
}
impl Message {
    pub fn user(speaker: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            speaker: speaker.into(),
            content: content.into(),
        }
    }
    pub fn assistant(speaker: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            speaker: speaker.into(),
            content: content.into(),
        }
    }
}
impl From<&Message> for RequestMessage {
    fn from(m: &Message) -> Self {
        RequestMessage::new(m.role, m.content.as_str())
    }
}

/// Append-only transcript of the conversation. The system message is never
/// stored here; it is recomputed for every request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatHistory {
    inner: Vec<Message>,
}
impl ChatHistory {
    pub fn new() -> Self {
        Self { inner: Vec::new() }
    }
    pub fn push_message(&mut self, message: Message) {
        self.inner.push(message);
    }
    pub fn all(&self) -> &[Message] {
        &self.inner
    }
    pub fn len(&self) -> usize {
        self.inner.len()
    }
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

const WRAP_WIDTH: usize = 50;

/// Prints increments as they arrive and accumulates them into the final
/// reply text. A line break is emitted before an increment whenever the
/// count of characters already printed sits on the wrap boundary; counting
/// is per `char`, so multi-byte scripts wrap at the same visual rhythm.
pub struct StreamDisplay<W: Write> {
    out: W,
    text: String,
    printed: usize,
}
impl<W: Write> StreamDisplay<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            text: String::new(),
            printed: 0,
        }
    }
    pub fn push(&mut self, delta: &str) {
        if self.printed % WRAP_WIDTH == WRAP_WIDTH - 1 {
            writeln!(self.out).unwrap();
        }
        write!(self.out, "{}", delta).unwrap();
        self.out.flush().unwrap();
        self.printed += delta.chars().count();
        self.text.push_str(delta);
    }
    pub fn finish(&mut self) {
        writeln!(self.out).unwrap();
        self.out.flush().unwrap();
    }
    pub fn text(&self) -> &str {
        &self.text
    }
    fn take_text(&mut self) -> String {
        std::mem::take(&mut self.text)
    }
}
impl StreamDisplay<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

/// Drains a stream into the display and returns the assembled reply.
///
/// A decode error is reported and the event skipped; any other error aborts
/// the turn. The stream is taken by value so the connection is released on
/// every exit path.
pub async fn collect_stream<S, W>(
    mut stream: S,
    display: &mut StreamDisplay<W>,
) -> Result<String, ChatClientError>
where
    S: ChatStream,
    W: Write,
{
    loop {
        match stream.receive_next().await {
            Ok(ChatResponse::DeltaContent(delta)) => display.push(&delta),
            Ok(ChatResponse::Done) => break,
            Err(e) if e.is_decode_error() => eprintln!("{}", e),
            Err(e) => {
                // unstick the partially printed line before the diagnostic
                display.finish();
                return Err(e);
            }
        }
    }
    display.finish();
    Ok(display.take_text())
}

/// One persona-flavored chat session against the completion endpoint.
pub struct CharaChat {
    client: ChatClient,
    model: OpenAIModel,
    persona: &'static Personality,
    user_name: String,
}
impl CharaChat {
    pub fn new(
        client: ChatClient,
        model: OpenAIModel,
        persona: &'static Personality,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            model,
            persona,
            user_name: user_name.into(),
        }
    }
    pub fn from_env(
        model: OpenAIModel,
        persona: &'static Personality,
        user_name: impl Into<String>,
    ) -> Result<Self, ChatClientError> {
        Ok(Self::new(ChatClient::from_env()?, model, persona, user_name))
    }
    pub fn persona(&self) -> &'static Personality {
        self.persona
    }
    pub async fn complete(&self, history: &ChatHistory) -> Result<Message, ChatClientError> {
        let request = self.make_request(history);
        let stream = self.client.stream_chat(&request).await?;
        let mut display = StreamDisplay::stdout();
        let text = collect_stream(stream, &mut display).await?;
        Ok(Message::assistant(self.persona.name, text))
    }
    fn make_request(&self, history: &ChatHistory) -> ChatRequest {
        let system = persona::compile(self.persona, &self.user_name);
        let mut messages = vec![RequestMessage::new(Role::System, system)];
        messages.extend(history.all().iter().map(RequestMessage::from));
        ChatRequest::new(self.model, messages)
    }
}

#[cfg(test)]
mod tests {
    use crate::gpt::client::fakes::*;
    use crate::gpt::client::ApiKey;
    use crate::persona;

    use super::*;

    fn display() -> StreamDisplay<Vec<u8>> {
        StreamDisplay::new(Vec::new())
    }
    fn written(display: &StreamDisplay<Vec<u8>>) -> String {
        String::from_utf8(display.out.clone()).unwrap()
    }

    #[test]
    fn 増分は50文字目の直前で折り返される() {
        let mut sut = display();
        sut.push(&"a".repeat(49));
        sut.push("b");
        assert_eq!(written(&sut), format!("{}\nb", "a".repeat(49)));
        assert_eq!(sut.text(), format!("{}b", "a".repeat(49)));
    }
    #[test]
    fn 最初の増分の前では折り返されない() {
        let mut sut = display();
        sut.push("hello");
        assert_eq!(written(&sut), "hello");
    }
    #[test]
    fn マルチバイト文字は1文字として数えられる() {
        let mut sut = display();
        for _ in 0..50 {
            sut.push("あ");
        }
        let wraps = written(&sut).matches('\n').count();
        assert_eq!(wraps, 1);
    }
    #[test]
    fn finishは改行を1つだけ出力する() {
        let mut sut = display();
        sut.push("hi");
        sut.finish();
        assert_eq!(written(&sut), "hi\n");
    }

    #[tokio::test]
    async fn 増分は到着順に連結されて返る() {
        let (stream, _closed) = ScriptedStream::new(vec![
            delta("hello"),
            delta(" world"),
            Ok(ChatResponse::Done),
        ]);
        let mut out = display();

        let text = collect_stream(stream, &mut out).await.unwrap();

        assert_eq!(text, "hello world");
        assert_eq!(written(&out), "hello world\n");
    }
    #[tokio::test]
    async fn 壊れたイベントは読み飛ばされストリームは続行する() {
        let (stream, _closed) = ScriptedStream::new(vec![
            delta("a"),
            parse_error("{broken"),
            delta("b"),
            Ok(ChatResponse::Done),
        ]);
        let mut out = display();

        let text = collect_stream(stream, &mut out).await.unwrap();

        assert_eq!(text, "ab");
    }
    #[tokio::test]
    async fn 致命的なエラーはターンを中断し接続は解放される() {
        let (stream, closed) =
            ScriptedStream::new(vec![delta("partial"), stream_error("connection reset")]);
        let mut out = display();

        let result = collect_stream(stream, &mut out).await;

        assert!(result.is_err());
        assert_eq!(closed.load(std::sync::atomic::Ordering::SeqCst), 1);
        // the partial line is closed so the diagnostic starts on a fresh line
        assert_eq!(written(&out), "partial\n");
    }
    #[tokio::test]
    async fn 正常終了時も接続は解放される() {
        let (stream, closed) = ScriptedStream::new(vec![delta("ok"), Ok(ChatResponse::Done)]);
        let mut out = display();

        collect_stream(stream, &mut out).await.unwrap();

        assert_eq!(closed.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn リクエストはsystemメッセージを先頭に履歴を元の順で並べる() {
        let mut history = ChatHistory::new();
        history.push_message(Message::user("太郎", "こんにちは"));
        history.push_message(Message::assistant("さくら", "やっほー"));
        history.push_message(Message::user("太郎", "元気?"));
        let chat = CharaChat::new(
            ChatClient::new(ApiKey::new("dummy")).unwrap(),
            OpenAIModel::Gpt3Dot5Turbo,
            persona::Personality::lookup(persona::DEFAULT_KEY),
            "太郎",
        );

        let value = serde_json::to_value(chat.make_request(&history)).unwrap();
        let messages = value["messages"].as_array().unwrap();

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "こんにちは");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3]["content"], "元気?");
        let systems = messages.iter().filter(|m| m["role"] == "system").count();
        assert_eq!(systems, 1);
    }
    #[test]
    fn 履歴は追記のみで元の順序を保つ() {
        let mut history = ChatHistory::new();
        history.push_message(Message::user("you", "hello"));
        history.push_message(Message::assistant("gpt", "hi there"));
        history.push_message(Message::user("you", "thanks"));
        assert_eq!(
            history.all(),
            &[
                Message::user("you", "hello"),
                Message::assistant("gpt", "hi there"),
                Message::user("you", "thanks"),
            ]
        );
    }
}
