//! Voice call example.
//!
//! Talks to the model through the default microphone and speaker until
//! Ctrl-C is pressed.
//!
//! # Usage
//!
//! ```bash
//! GEMINI_API_KEY=... cargo run --example voice_call -- Ana
//!
//! # Imitate someone from an exported chat
//! GEMINI_API_KEY=... cargo run --example voice_call -- Ana --history chat.txt
//!
//! # Show available devices
//! cargo run --example voice_call -- --list-devices
//! ```

use std::path::PathBuf;

use clap::Parser;
use companion_voice::playback::Speaker;
use companion_voice::source::{list_input_devices, list_output_devices, Microphone};
use companion_voice::{CallConfig, CallController, CallEvent, PersonaContext};
use tracing_subscriber::EnvFilter;

/// Voice call with the companion model
#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Name the companion uses for the user
    user_name: Option<String>,

    /// Exported chat to imitate
    #[arg(long)]
    history: Option<PathBuf>,

    /// List available audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn print_devices() -> Result<(), Box<dyn std::error::Error>> {
    println!("\nInput devices:");
    for name in list_input_devices()? {
        println!("  {name}");
    }
    println!("\nOutput devices:");
    for name in list_output_devices()? {
        println!("  {name}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.list_devices {
        return print_devices();
    }

    let mut persona = PersonaContext::new(args.user_name.unwrap_or_default());
    if let Some(path) = args.history {
        persona = persona.with_text_history(std::fs::read_to_string(path)?);
    }

    let controller = CallController::builder()
        .config(CallConfig::from_env())
        .persona(persona)
        .input(Microphone::default_device())
        .output(Speaker::default_device())
        .on_event(|event| match event {
            CallEvent::StateChanged { status, .. } => println!("[{status}]"),
            CallEvent::Interrupted { stopped } => println!("(interrompido, {stopped} trechos)"),
            other => tracing::debug!(?other, "call event"),
        })
        .build()?;

    controller.start().await?;
    println!("Press Ctrl+C to hang up.");

    tokio::signal::ctrl_c().await?;
    controller.end();

    println!("Stats: {:?}", controller.stats());
    Ok(())
}
