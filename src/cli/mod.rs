//! Command line entry points

pub mod serve;

use clap::{Parser, Subcommand};

/// Layerforge - define, train and query neural networks over HTTP
#[derive(Parser)]
#[command(name = "layerforge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve(serve::ServeArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_is_optional() {
        let cli = Cli::try_parse_from(["layerforge"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_serve_port_override() {
        let cli = Cli::try_parse_from(["layerforge", "serve", "--port", "9090"]).unwrap();
        match cli.command {
            Some(Command::Serve(args)) => assert_eq!(args.port, Some(9090)),
            None => panic!("expected serve"),
        }
    }
}
