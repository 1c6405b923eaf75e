//! Command-line arguments

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "roomlink", version, about = "Share and join game lobbies with room codes")]
pub struct Args {
    /// Settings file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "ROOMLINK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a lobby and print its room code
    Host {
        /// Port to listen on (defaults to the configured port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address other players use to reach this machine
        #[arg(short = 'a', long)]
        public_address: Option<String>,

        /// Lobby name shown to joining players
        #[arg(short, long)]
        name: Option<String>,

        /// Copy the room code to the clipboard
        #[arg(long)]
        copy: bool,
    },

    /// Join a lobby. Reads room codes from stdin when none is given.
    Join {
        /// Room code, or "localhost"
        code: Option<String>,

        /// Name announced to the lobby
        #[arg(short = 'n', long)]
        player_name: Option<String>,
    },

    /// Print the room code for an address and port
    Encode { address: String, port: u16 },

    /// Print the address and port inside a room code
    Decode { code: String },
}
