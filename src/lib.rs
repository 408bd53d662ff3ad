pub mod cli;
pub mod gpt;
pub mod persona;
pub mod repl;
