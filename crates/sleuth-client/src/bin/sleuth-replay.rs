//! Replay a recorded realtime transcript through a session.
//!
//! # Usage
//!
//! ```bash
//! sleuth-replay capture.jsonl --game 7 --player 1
//! RUST_LOG=sleuth_core=debug sleuth-replay capture.jsonl --game 7 --player 1
//! ```

use std::path::PathBuf;

use clap::Parser;
use sleuth_client::replay::{parse_transcript, replay};
use sleuth_core::{SessionConfig, SessionIdentity};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Sleuth transcript replayer
#[derive(Parser, Debug)]
#[command(name = "sleuth-replay")]
#[command(about = "Replay recorded Sleuth realtime frames offline")]
#[command(version)]
struct Args {
    /// Transcript file (JSON lines)
    transcript: PathBuf,

    /// Game the transcript belongs to
    #[arg(short, long)]
    game: u64,

    /// Viewing player
    #[arg(short, long)]
    player: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(path = %args.transcript.display(), "loading transcript");
    let text = std::fs::read_to_string(&args.transcript)?;
    let entries = parse_transcript(&text)?;

    let identity = SessionIdentity::new(args.game, args.player);
    let outcome = replay(&entries, identity, SessionConfig::default())?;

    let view = &outcome.view;
    tracing::info!(
        frames = outcome.frames,
        actions = outcome.actions.len(),
        connection = ?view.connection,
        "replay finished"
    );
    if let Some(turn) = &view.turn {
        tracing::info!(
            turn_owner = turn.turn_owner,
            phase = ?turn.phase,
            draw = turn.piles.draw_count,
            discard = turn.piles.discard_count,
            "final turn"
        );
    }
    for player in &view.ordered_players {
        tracing::info!(
            id = player.id,
            name = %player.name,
            sets = player.sets.len(),
            disgraced = player.in_disgrace,
            "player"
        );
    }
    tracing::info!(
        countdown = view.countdown,
        pending = ?view.pending.as_ref().map(|p| p.kind()),
        selection = ?view.selection,
        "board"
    );

    Ok(())
}
