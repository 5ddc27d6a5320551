use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use indexmap::IndexMap;
use log::error;

use sheaf::{config::Config, generator::Generator};

#[derive(Debug, Parser)]
#[command(
    name = "sheaf",
    version,
    about = "Variant-aware build generator: resolves class dependencies and packs them into delivery bundles"
)]
struct Cli {
    /// Path to the job configuration file
    #[arg(default_value = "sheaf.toml")]
    config: PathBuf,

    /// Pin a variant domain to a single value (repeatable)
    #[arg(long = "variant", value_name = "NAME=VALUE", value_parser = parse_key_value)]
    variants: Vec<(String, String)>,

    /// Override a build setting (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    settings: Vec<(String, String)>,

    /// Add a load dependency edge (repeatable)
    #[arg(long = "require", value_name = "CLASS=DEP", value_parser = parse_key_value)]
    require: Vec<(String, String)>,

    /// Add a run dependency edge (repeatable)
    #[arg(long = "use", value_name = "CLASS=DEP", value_parser = parse_key_value)]
    uses: Vec<(String, String)>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))
}

/// Fold repeated CLASS=DEP pairs into an edge map.
fn collect_edges(pairs: Vec<(String, String)>) -> IndexMap<String, Vec<String>> {
    let mut edges: IndexMap<String, Vec<String>> = IndexMap::new();
    for (class, target) in pairs {
        edges.entry(class).or_default().push(target);
    }
    edges
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    let generator = Generator::new(
        config,
        cli.variants.into_iter().collect::<IndexMap<_, _>>(),
        cli.settings.into_iter().collect::<IndexMap<_, _>>(),
        collect_edges(cli.require),
        collect_edges(cli.uses),
    )?;
    generator.run()
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
