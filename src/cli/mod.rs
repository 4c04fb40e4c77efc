//! Command-line interface.

mod policy;

pub use policy::{PolicyCommand, run_policy_command};

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "vanish", version, about = "Per-channel message retention for Discord")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the sweep scheduler until interrupted
    Run,

    /// Sweep every vanishing channel once and exit
    Sweep,

    /// Manage channel retention policies
    #[command(subcommand)]
    Policy(PolicyCommand),
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_policy_set() {
        let cli = Cli::try_parse_from(["vanish", "policy", "set", "123", "456", "6h"]).unwrap();
        match cli.command {
            Command::Policy(PolicyCommand::Set {
                channel_id,
                guild_id,
                duration,
            }) => {
                assert_eq!(channel_id, "123");
                assert_eq!(guild_id, "456");
                assert_eq!(duration, "6h");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_policy_list_with_guild() {
        let cli = Cli::try_parse_from(["vanish", "policy", "list", "--guild", "9"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Policy(PolicyCommand::List { guild: Some(ref g) }) if g == "9"
        ));
    }

    #[test]
    fn test_policy_list_guild_falls_back_to_env() {
        let cmd = Cli::command();
        let guild = cmd
            .find_subcommand("policy")
            .and_then(|c| c.find_subcommand("list"))
            .and_then(|c| c.get_arguments().find(|a| a.get_id() == "guild"))
            .unwrap();
        assert_eq!(guild.get_env(), Some(std::ffi::OsStr::new("SWEEP_GUILD_ID")));
    }
}
