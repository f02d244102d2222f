use std::fs;
use std::io::{self, IsTerminal, Read};

use anyhow::{Context, Result, anyhow};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "diary-comic-rust",
    version,
    about = "Turn a diary entry into a 4-panel comic with Korean dialogue"
)]
struct Cli {
    /// Diary text (otherwise read from --file or stdin)
    #[arg(short = 't', long = "text")]
    text: Option<String>,

    /// Read the diary from a UTF-8 text file
    #[arg(short = 'f', long = "file", conflicts_with = "text")]
    file: Option<String>,

    /// Name of the main character (default: settings [comic].user_name)
    #[arg(short = 'u', long = "user-name")]
    user_name: Option<String>,

    /// Character style key from settings [characters.<gender>]
    #[arg(short = 'g', long = "gender")]
    gender: Option<String>,

    /// TTF/OTF/TTC font for the dialogue (default: sans-serif)
    #[arg(long = "font")]
    font: Option<String>,

    /// Output PNG path (default: settings [comic].output)
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// Use an existing 2x2 illustration instead of generating one
    #[arg(short = 'i', long = "image")]
    image: Option<String>,

    /// Script model: provider or provider:model (e.g. openai:gpt-4o)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// Translation model: provider or provider:model
    #[arg(long = "translation-model")]
    translation_model: Option<String>,

    /// OpenAI image model (e.g. dall-e-3)
    #[arg(long = "image-model")]
    image_model: Option<String>,

    /// API key (overrides environment variables)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Print the generated script as JSON and exit
    #[arg(long = "dump-script")]
    dump_script: bool,

    /// Append token usage to output
    #[arg(long = "with-using-tokens")]
    with_using_tokens: bool,

    /// Append model names to output
    #[arg(long = "with-using-model")]
    with_using_model: bool,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    diary_comic_rust::logging::init(cli.verbose)?;

    let diary = read_diary(&cli)?;
    let output = diary_comic_rust::run(
        diary_comic_rust::Config {
            user_name: cli.user_name,
            gender: cli.gender,
            font_path: cli.font,
            output: cli.output,
            image_path: cli.image,
            model: cli.model,
            translation_model: cli.translation_model,
            image_model: cli.image_model,
            key: cli.key,
            settings_path: cli.read_settings,
            dump_script: cli.dump_script,
            with_using_tokens: cli.with_using_tokens,
            with_using_model: cli.with_using_model,
        },
        Some(diary),
    )
    .await?;

    println!("{}", output);
    Ok(())
}

fn read_diary(cli: &Cli) -> Result<String> {
    if let Some(text) = &cli.text {
        return Ok(text.clone());
    }
    if let Some(path) = &cli.file {
        return fs::read_to_string(path).with_context(|| format!("failed to read diary: {}", path));
    }
    if io::stdin().is_terminal() {
        return Err(anyhow!(
            "no diary given; pass --text, --file or pipe it on stdin"
        ));
    }
    let mut buffer = Vec::new();
    io::stdin().read_to_end(&mut buffer)?;
    String::from_utf8(buffer).map_err(|_| anyhow!("stdin must be UTF-8 text"))
}
