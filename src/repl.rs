use std::io::Write;

use crate::gpt::chat::{CharaChat, ChatHistory, Message};
use crate::gpt::client::ChatClientError;

/// One conversation turn behind the loop: the implementor streams the reply
/// to the terminal itself and returns the assembled assistant message.
#[allow(async_fn_in_trait)]
pub trait Chat {
    fn assistant_name(&self) -> &str;
    async fn chat(&mut self, history: &ChatHistory) -> Result<Message, ChatClientError>;
}

impl Chat for CharaChat {
    fn assistant_name(&self) -> &str {
        self.persona().name
    }
    async fn chat(&mut self, history: &ChatHistory) -> Result<Message, ChatClientError> {
        self.complete(history).await
    }
}

pub struct CharaRepl<T: Chat> {
    chat: T,
    history: ChatHistory,
    user: String,
}

impl<T: Chat> CharaRepl<T> {
    pub fn new(chat: T, user: impl Into<String>) -> Self {
        CharaRepl {
            chat,
            history: ChatHistory::new(),
            user: user.into(),
        }
    }
    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    /// Runs until stdin reaches end-of-file. A failed turn leaves the reply
    /// out of history and keeps the loop alive. Ctrl-c during a turn aborts
    /// only that turn, dropping its connection with the cancelled future;
    /// ctrl-c at the idle prompt exits. Both points listen for the signal,
    /// since the handler installed by the first `ctrl_c()` poll stays for
    /// the process lifetime and would otherwise swallow prompt-time
    /// interrupts inside the blocking read.
    pub async fn repl(&mut self) {
        loop {
            self.user_first();
            let input = tokio::select! {
                input = tokio::task::spawn_blocking(user_input) => input.unwrap(),
                _ = tokio::signal::ctrl_c() => {
                    // the reader thread is still parked on stdin, so a
                    // runtime shutdown would wait on it forever
                    println!();
                    std::process::exit(0);
                }
            };
            let line = match input {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    eprintln!("failed to read input: {}", e);
                    continue;
                }
            };
            let message = line.trim();
            if message.is_empty() {
                continue;
            }
            let message = message.to_string();
            self.assistant_first();
            tokio::select! {
                _ = self.turn(&message) => {}
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    eprintln!("interrupted");
                }
            }
        }
    }

    /// Appends the user message, runs one completion, appends the reply on
    /// success. On failure only the diagnostic is printed; the reply slot
    /// stays empty and the caller loops.
    pub async fn turn(&mut self, message: &str) {
        self.history.push_message(Message::user(&self.user, message));
        match self.chat.chat(&self.history).await {
            Ok(reply) => self.history.push_message(reply),
            Err(e) => eprintln!("{}", e),
        }
    }

    fn user_first(&self) {
        print!("{} > ", self.user);
        std::io::stdout().flush().unwrap();
    }
    fn assistant_first(&self) {
        print!("{} > ", self.chat.assistant_name());
        std::io::stdout().flush().unwrap();
    }
}

/// Blocking line read, run on a blocking task so the loop can keep
/// listening for signals. `None` is end-of-file.
fn user_input() -> std::io::Result<Option<String>> {
    let mut message = String::new();
    let read = std::io::stdin().read_line(&mut message)?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(message))
}
