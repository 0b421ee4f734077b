//! chiproll command-line tool
//!
//! - `roll`: print or export the piano-roll notes of a MIDI file
//! - `render`: render a MIDI file to WAV through the built-in tone synth
//! - `play`: play a MIDI file on the default audio device (`streaming`)
//! - `inspect`: show the iNES header of a ROM image
//! - `config`: print or write the default player configuration

use anyhow::{bail, Context, Result};
use chiproll::backend::ines::InesHeader;
use chiproll::midi::{MidiSequence, ToneSynth};
use chiproll::preprocess::midi_timeline;
use chiproll::roll::keyboard::note_name;
use chiproll::{Player, PlayerConfig};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chiproll", version, about = "NES chiptune and MIDI piano-roll tool")]
struct Cli {
    /// Player configuration (JSON); defaults are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print or export the note timeline of a MIDI file
    Roll {
        /// Standard MIDI file
        input: PathBuf,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = RollFormat::Text)]
        format: RollFormat,
        /// Write to a file instead of stdout (csv and json only)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Render a MIDI file to a 16-bit stereo WAV
    Render {
        /// Standard MIDI file
        input: PathBuf,
        /// Output WAV path
        #[arg(short, long)]
        output: PathBuf,
        /// Maximum length in seconds
        #[arg(short, long, default_value_t = 300.0)]
        seconds: f64,
        /// Peak-normalize the result
        #[arg(long)]
        normalize: bool,
    },
    /// Play a MIDI file on the default audio device
    #[cfg(feature = "streaming")]
    Play {
        /// Standard MIDI file
        input: PathBuf,
    },
    /// Show the iNES header of a ROM image
    Inspect {
        /// ROM image
        rom: PathBuf,
    },
    /// Print the default configuration as JSON
    Config {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum RollFormat {
    Text,
    Csv,
    Json,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PlayerConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PlayerConfig::default(),
    };

    match cli.command {
        Command::Roll {
            input,
            format,
            output,
        } => roll(&input, format, output.as_deref()),
        Command::Render {
            input,
            output,
            seconds,
            normalize,
        } => render(&config, &input, &output, seconds, normalize),
        #[cfg(feature = "streaming")]
        Command::Play { input } => play(&config, &input),
        Command::Inspect { rom } => inspect(&rom),
        Command::Config { output } => {
            let json = config.to_json()?;
            match output {
                Some(path) => std::fs::write(&path, json)
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => println!("{}", json),
            }
            Ok(())
        }
    }
}

fn read_midi(path: &Path) -> Result<MidiSequence> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    MidiSequence::from_smf(&bytes).with_context(|| format!("failed to parse {}", path.display()))
}

fn midi_player(config: &PlayerConfig, path: &Path) -> Result<Player> {
    let sequence = read_midi(path)?;
    let player = Player::builder(config.clone())
        .synth(Box::new(ToneSynth::new(config.sample_rate)))
        .build();
    player.load_midi(sequence)?;
    player.midi_play()?;
    Ok(player)
}

fn roll(input: &Path, format: RollFormat, output: Option<&Path>) -> Result<()> {
    let timeline = midi_timeline(&read_midi(input)?);
    match (format, output) {
        (RollFormat::Text, None) => {
            println!("{:>4} {:>5} {:>5} {:>9} {:>9}", "ch", "note", "vel", "start", "end");
            for note in timeline.notes() {
                println!(
                    "{:>4} {:>5} {:>5.2} {:>9.3} {:>9.3}",
                    note.channel,
                    note_name(note.pitch),
                    note.velocity,
                    note.start_time,
                    note.end_time
                );
            }
            println!("{} notes, {:.2}s", timeline.len(), timeline.duration());
        }
        (RollFormat::Text, Some(_)) => bail!("text output goes to stdout; use csv or json"),
        (RollFormat::Csv, Some(path)) => chiproll::export::write_notes_csv(&timeline, path)?,
        (RollFormat::Json, Some(path)) => chiproll::export::write_notes_json(&timeline, path)?,
        (RollFormat::Csv | RollFormat::Json, None) => {
            bail!("--output is required for csv and json")
        }
    }
    Ok(())
}

fn render(
    config: &PlayerConfig,
    input: &Path,
    output: &Path,
    seconds: f64,
    normalize: bool,
) -> Result<()> {
    let player = midi_player(config, input)?;
    let mut dispatcher = player.dispatcher();
    let export = chiproll::export::ExportConfig::default().normalize(normalize);
    let frames =
        chiproll::export::render_wav_with_config(&mut dispatcher, output, seconds, &export)
            .with_context(|| format!("failed to render {}", output.display()))?;
    println!(
        "Wrote {} ({:.2}s)",
        output.display(),
        frames as f64 / f64::from(config.sample_rate)
    );
    Ok(())
}

#[cfg(feature = "streaming")]
fn play(config: &PlayerConfig, input: &Path) -> Result<()> {
    use chiproll::streaming::{AudioDevice, StreamConfig};
    use std::time::Duration;

    let player = midi_player(config, input)?;
    let device = AudioDevice::new(
        player.dispatcher(),
        StreamConfig::low_latency(config.sample_rate),
    )?;
    let total = player.timeline().read().duration();
    while player.is_playing() {
        player.poll()?;
        let keys = player.keyboard().sounding_count();
        eprint!(
            "\r{:6.1}s / {:6.1}s  {:>3} bpm  {:>2} channels",
            player.playback_time(),
            total,
            player.midi_bpm()?.round(),
            keys
        );
        std::thread::sleep(Duration::from_millis(50));
    }
    eprintln!();
    device.finish();
    Ok(())
}

fn inspect(rom: &Path) -> Result<()> {
    let bytes = std::fs::read(rom).with_context(|| format!("failed to read {}", rom.display()))?;
    let header = InesHeader::parse(&bytes)?;
    println!("Format:      {}", if header.is_nes2() { "NES 2.0" } else { "iNES" });
    println!("Mapper:      {}", header.mapper());
    println!("PRG-ROM:     {} KiB", header.prg_rom_size() / 1024);
    println!("CHR-ROM:     {} KiB", header.chr_rom_size() / 1024);
    println!(
        "Mirroring:   {}",
        if header.vertical_mirroring() { "vertical" } else { "horizontal" }
    );
    println!("Battery:     {}", header.has_battery());
    println!("Trainer:     {}", header.has_trainer());
    println!("Expansion:   {}", if header.has_expansion_audio() { "VRC6" } else { "none" });
    Ok(())
}
