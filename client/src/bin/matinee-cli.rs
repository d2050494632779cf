//! Headless party client: join a party from the terminal and drive playback
//! with simple line commands. Mostly useful against a local relay while
//! developing, and as a reference embedding of the library.

use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use matinee_client::{
    ClientConfig, PartyRoom, ReactionKind, SimulatedPlayer,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "matinee_client=debug,info".into()),
        )
        .init();

    let (party_id, token) = parse_args()?;
    let config = ClientConfig::from_env();
    tracing::info!("joining party {party_id} via {}", config.server_url);

    let player = Arc::new(SimulatedPlayer::new());
    let room = PartyRoom::join(config, &party_id, &token, player).await?;

    // Connectivity badge and chat feed on stdout.
    let mut conn_rx = room.connection();
    tokio::spawn(async move {
        while conn_rx.changed().await.is_ok() {
            let state = *conn_rx.borrow_and_update();
            println!("** connection: {state}");
        }
    });

    print_help();
    let mut seen_chat = 0usize;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        // Drain chat that arrived since the last prompt.
        let chat = room.chat_events();
        for event in &chat[seen_chat.min(chat.len())..] {
            println!("[{:?}] {}: {}", event.kind, short(event.author), event.body);
        }
        seen_chat = chat.len();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let mut words = line.split_whitespace();
        let result = match words.next() {
            Some("play") => room.play(),
            Some("pause") => room.pause(),
            Some("seek") => match words.next().and_then(|w| w.parse::<f64>().ok()) {
                Some(seconds) => room.seek(seconds),
                None => {
                    println!("usage: seek <seconds>");
                    Ok(())
                }
            },
            Some("say") => room.send_chat(line.trim_start_matches("say").trim()),
            Some("heart") => room.send_reaction(ReactionKind::Heart),
            Some("like") => room.send_reaction(ReactionKind::Like),
            Some("kick") => match words.next().and_then(|w| w.parse().ok()) {
                Some(id) => room.kick(id),
                None => {
                    println!("usage: kick <participant-uuid>");
                    Ok(())
                }
            },
            Some("roster") => {
                for p in room.participants() {
                    println!(
                        "  {} {} ({:?}) hearts={} likes={}",
                        short(p.id),
                        p.name,
                        p.role,
                        p.reaction_counters.hearts,
                        p.reaction_counters.likes
                    );
                }
                Ok(())
            }
            Some("status") => {
                let stats = room.stats();
                println!(
                    "  {} | in {} msgs / out {} msgs | rtt {:?} ms | reconnects {}",
                    room.connection_state(),
                    stats.messages_in,
                    stats.messages_out,
                    stats.last_rtt_ms,
                    stats.reconnect_attempts
                );
                if let Some(sync) = room.sync_state() {
                    println!(
                        "  playing={} t={:.1}s rate={}",
                        sync.is_playing, sync.current_time, sync.playback_rate
                    );
                }
                Ok(())
            }
            Some("quit") | Some("exit") => break,
            Some(other) => {
                println!("unknown command: {other}");
                Ok(())
            }
            None => Ok(()),
        };
        if let Err(e) = result {
            println!("!! {e}");
        }
    }

    room.close();
    Ok(())
}

fn parse_args() -> Result<(String, String)> {
    let mut args = std::env::args().skip(1);
    let (Some(party_id), Some(token)) = (args.next(), args.next()) else {
        bail!("usage: matinee-cli <party-id> <token>   (MATINEE_SERVER_URL overrides the relay)");
    };
    Ok((party_id, token))
}

fn short(id: uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

fn print_help() {
    println!(
        "commands: play | pause | seek <s> | say <text> | heart | like | kick <uuid> | roster | status | quit"
    );
}
