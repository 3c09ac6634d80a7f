//! Command line interface for the demo binary.

use clap::{Parser, Subcommand};

/// Command line arguments for the `rsocket` demo binary.
#[derive(Debug, Parser)]
#[command(name = "rsocket", version, about = "RSocket demo client and server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Demo subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the hello-stream responder with resumable sessions.
    Serve {
        /// Port to accept connections on.
        #[arg(short, long, default_value_t = 9898)]
        port: u16,
    },
    /// Request a hello stream, force a disconnect mid-stream, then resume.
    Stream {
        /// Host to connect to.
        #[arg(long, default_value = "localhost")]
        host: String,
        /// Port to connect to.
        #[arg(short, long, default_value_t = 9898)]
        port: u16,
        /// Name to greet.
        #[arg(short, long, default_value = "Jane")]
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn parses_stream_subcommand() {
        let cli = Cli::parse_from(["rsocket", "stream", "--name", "Bob", "--port", "7878"]);
        let Command::Stream { host, port, name } = cli.command else {
            panic!("expected stream subcommand");
        };
        assert_eq!(host, "localhost");
        assert_eq!(port, 7878);
        assert_eq!(name, "Bob");
    }

    #[test]
    fn parses_serve_default_port() {
        let cli = Cli::parse_from(["rsocket", "serve"]);
        let Command::Serve { port } = cli.command else {
            panic!("expected serve subcommand");
        };
        assert_eq!(port, 9898);
    }
}
