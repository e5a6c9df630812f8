//! Command-line arguments.

use clap::{Parser, Subcommand};
use voicecore_event_bus::BrokerBackend;

/// Operator runtime for the VoiceCore event bus.
///
/// Broker and schema settings come from the environment
/// (`KAFKA_BOOTSTRAP_SERVERS`, `SCHEMA_REGISTRY_URL`, `VC_BUS_BACKEND`, ...).
#[derive(Parser, Debug)]
#[command(name = "voicecore-bus-runtime", version)]
#[command(about = "Tail, replay and publish VoiceCore bus events")]
pub struct Cli {
    /// Override the broker backend (`kafka` or `memory`)
    #[arg(long, global = true)]
    pub backend: Option<BrokerBackend>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Consume topics and log every event until Ctrl-C
    Tail {
        /// Comma-separated topic list
        #[arg(long, value_delimiter = ',', required = true)]
        topics: Vec<String>,

        /// Consumer group (defaults to VC_CONSUMER_GROUP)
        #[arg(long)]
        group: Option<String>,
    },

    /// Print a topic's events in a time window as JSON lines
    Replay {
        #[arg(long)]
        topic: String,

        /// Window start, epoch milliseconds (inclusive)
        #[arg(long)]
        start: i64,

        /// Window end, epoch milliseconds (inclusive)
        #[arg(long)]
        end: i64,
    },

    /// Publish one JSON event and wait for the acknowledgement
    Publish {
        #[arg(long)]
        topic: String,

        /// Partition key
        #[arg(long)]
        key: String,

        /// Event body as a JSON object
        #[arg(long)]
        event: String,
    },

    /// List the topic catalog with schema ids
    Topics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_splits_topic_list() {
        let cli = Cli::try_parse_from([
            "voicecore-bus-runtime",
            "tail",
            "--topics",
            "call.events,crm.updates",
            "--group",
            "ops",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Tail {
                topics: vec!["call.events".into(), "crm.updates".into()],
                group: Some("ops".into()),
            }
        );
        assert!(cli.backend.is_none());
    }

    #[test]
    fn test_tail_requires_topics() {
        assert!(Cli::try_parse_from(["voicecore-bus-runtime", "tail"]).is_err());
    }

    #[test]
    fn test_backend_is_global() {
        let cli = Cli::try_parse_from(["voicecore-bus-runtime", "topics", "--backend", "memory"])
            .unwrap();
        assert_eq!(cli.backend, Some(BrokerBackend::Memory));
        assert_eq!(cli.command, Command::Topics);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(
            Cli::try_parse_from(["voicecore-bus-runtime", "--backend", "pulsar", "topics"]).is_err()
        );
    }

    #[test]
    fn test_replay_window_arguments() {
        let cli = Cli::try_parse_from([
            "voicecore-bus-runtime",
            "replay",
            "--topic",
            "billing.transactions",
            "--start",
            "1000",
            "--end",
            "2000",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Command::Replay {
                topic: "billing.transactions".into(),
                start: 1000,
                end: 2000,
            }
        );
    }
}
