use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use linkura_translator::{Command, Config};

#[derive(Parser, Debug)]
#[command(
    name = "linkura-translator",
    version,
    about = "Extract, translate and track localization strings for Link! Like! LoveLive!"
)]
struct Cli {
    /// Translation locale
    #[arg(short = 'l', long = "locale", default_value = "zh-CN", global = true)]
    locale: String,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings", global = true)]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// From raw files to translation todo files
    Gentodo {
        /// Directory containing the raw JSON files
        #[arg(short = 'i', long = "input", default_value = "raw")]
        input: PathBuf,

        /// Directory receiving the translation files
        #[arg(short = 'o', long = "output", default_value = "data")]
        output: PathBuf,
    },
    /// Fill in missing translations of one file with an LLM backend
    Translate {
        /// Translation file to work on
        #[arg(short = 'f', long = "file")]
        file: PathBuf,

        /// Maximum number of items to translate (default: all untranslated)
        #[arg(long = "limit")]
        limit: Option<usize>,

        /// Items per backend request (default from settings)
        #[arg(long = "chunk-size")]
        chunk_size: Option<usize>,

        /// Provider or provider:model (e.g. claude:MODEL_ID, openai:MODEL_ID)
        #[arg(short = 'm', long = "model")]
        model: Option<String>,

        /// API key (overrides environment variables)
        #[arg(short = 'k', long = "key")]
        key: Option<String>,
    },
    /// Update the translation progress badge in the README
    Generate {
        /// Directory containing the translation files
        #[arg(long = "data", default_value = "data")]
        data: PathBuf,

        /// README file holding the progress section
        #[arg(long = "readme", default_value = "README.md")]
        readme: PathBuf,
    },
    /// Convert master-data YAML dumps into diff JSON documents
    Convert {
        /// Directory containing the YAML dumps
        #[arg(short = 'i', long = "input")]
        input: PathBuf,

        /// Directory receiving the JSON documents
        #[arg(short = 'o', long = "output")]
        output: PathBuf,

        /// Rule table replacing the built-in one
        #[arg(long = "rules")]
        rules: Option<PathBuf>,

        /// Only convert these documents
        #[arg(long = "only", num_args = 1..)]
        only: Vec<String>,

        /// Append TEST to every converted text
        #[arg(long = "test-mode")]
        test_mode: bool,
    },
}

impl From<Commands> for Command {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Gentodo { input, output } => Command::Gentodo { input, output },
            Commands::Translate {
                file,
                limit,
                chunk_size,
                model,
                key,
            } => Command::Translate {
                file,
                limit,
                chunk_size,
                model,
                key,
            },
            Commands::Generate { data, readme } => Command::Generate { data, readme },
            Commands::Convert {
                input,
                output,
                rules,
                only,
                test_mode,
            } => Command::Convert {
                input,
                output,
                rules,
                only,
                test_mode,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    linkura_translator::logging::init(cli.verbose)?;

    let config = Config {
        locale: cli.locale,
        settings_path: cli.read_settings,
        command: cli.command.into(),
    };
    let output = linkura_translator::run(config).await?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}
