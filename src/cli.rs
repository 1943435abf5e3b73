//! Command-line surface (spec §4.1). One flat command, no subcommands —
//! every run mode is a flag combination rather than a verb.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "cimian", version, about = "Managed software update agent")]
pub struct Cli {
    /// Probe installed state and report what would change, without installing anything.
    #[arg(long)]
    pub checkonly: bool,

    /// Install/update/uninstall items already identified by a prior --checkonly pass, skipping probing.
    #[arg(long)]
    pub installonly: bool,

    /// Full unattended run: fetch, probe, and reconcile in one pass (the default when no mode flag is given).
    #[arg(long)]
    pub auto: bool,

    /// Use a local manifest file instead of fetching one from the repo.
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<String>,

    /// Overrides config's local_only_manifest for this run.
    #[arg(long = "local-only-manifest", value_name = "FILE")]
    pub local_only_manifest: Option<String>,

    /// Skips the preflight.ps1 hook for this run.
    #[arg(long = "no-preflight")]
    pub no_preflight: bool,

    /// Marks bootstrap mode: optional_installs are treated as required until cleared.
    #[arg(long = "set-bootstrap-mode")]
    pub set_bootstrap_mode: bool,

    /// Clears bootstrap mode.
    #[arg(long = "clear-bootstrap-mode")]
    pub clear_bootstrap_mode: bool,

    /// Prints the most recently published run status and exits.
    #[arg(long = "show-status")]
    pub show_status: bool,

    /// Prints the most recent completed-run report and exits.
    #[arg(long)]
    pub report: bool,

    /// Increases log verbosity; repeatable (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Restricts this run to the named item(s) only; repeatable.
    #[arg(long = "item", value_name = "NAME")]
    pub item: Vec<String>,
}

impl Cli {
    /// Resolves the run mode, defaulting to a full auto run when the user
    /// named no mode flag at all.
    pub fn run_type(&self) -> &'static str {
        if self.checkonly {
            "checkonly"
        } else if self.installonly {
            "installonly"
        } else {
            "auto"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_to_auto_run_type() {
        let cli = Cli::parse_from(["cimian"]);
        assert_eq!(cli.run_type(), "auto");
    }

    #[test]
    fn checkonly_flag_selects_checkonly_run_type() {
        let cli = Cli::parse_from(["cimian", "--checkonly"]);
        assert_eq!(cli.run_type(), "checkonly");
    }

    #[test]
    fn repeated_item_flag_collects_all_values() {
        let cli = Cli::parse_from(["cimian", "--item", "Firefox", "--item", "Vlc"]);
        assert_eq!(cli.item, vec!["Firefox".to_string(), "Vlc".to_string()]);
    }
}
