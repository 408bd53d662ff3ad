use std::str::FromStr;

use clap::Parser;

use crate::gpt::chat::CharaChat;
use crate::gpt::client::OpenAIModel;
use crate::persona::{self, Personality};
use crate::repl::CharaRepl;

#[derive(Parser)]
pub struct Chara {
    /// persona key, unknown keys fall back to the default persona
    #[clap(short = 'p', long = "persona")]
    persona: Option<String>,
    /// pick a random persona for this session
    #[clap(short = 'r', long = "random")]
    random: bool,
    /// your name, defaults to $USER
    #[clap(short = 'u', long = "user")]
    user: Option<String>,
    #[clap(short = 'v', long = "gpt", default_value = "gpt3")]
    gpt: GptVersion,
    /// list persona keys and exit
    #[clap(short = 'l', long = "list")]
    list: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GptVersion {
    Gpt3,
    Gpt4,
}
impl FromStr for GptVersion {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gpt3" | "3" => Ok(Self::Gpt3),
            "gpt4" | "4" => Ok(Self::Gpt4),
            _ => Err(format!("{} is not supported", s)),
        }
    }
}

impl Chara {
    pub fn new() -> Self {
        Self::parse()
    }
    pub async fn run(&self) {
        if self.list {
            for key in Personality::keys() {
                println!("{}", key);
            }
            return;
        }
        let persona = self.pick_persona();
        let user = self.user_name();
        let model = match self.gpt {
            GptVersion::Gpt3 => OpenAIModel::Gpt3Dot5Turbo,
            GptVersion::Gpt4 => OpenAIModel::Gpt4,
        };
        // a missing credential is the one fatal error
        let chat = match CharaChat::from_env(model, persona, &user) {
            Ok(chat) => chat,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        };
        Self::print_init(persona.name);
        CharaRepl::new(chat, user).repl().await;
    }
    fn pick_persona(&self) -> &'static Personality {
        if self.random {
            return Personality::choose(&mut rand::thread_rng());
        }
        match &self.persona {
            Some(key) => Personality::lookup(key),
            None => Personality::lookup(persona::DEFAULT_KEY),
        }
    }
    fn user_name(&self) -> String {
        self.user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_default()
    }
    fn print_init(persona_name: &str) {
        println!("Welcome to charai REPL ({})", persona_name);
    }
}
