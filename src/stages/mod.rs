//! Concrete stage functions used by the command-line runner.

pub mod command;
pub mod speech;

pub use command::{CommandExecutor, CommandStage, ExecOutcome, SystemCommandExecutor};
pub use speech::SpeechSynthesizer;
