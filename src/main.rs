use clap::{Parser, Subcommand};
use dicformat::image::DicImage;
use dicformat::options::CreateOptions;
use dicformat::tracks::Track;
use dicformat::types::{MediaType, TrackType};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "dicf", about = "DiscImageChef format image tool")]
struct Cli {
    /// Log filter (error, warn, info, debug, trace); overrides RUST_LOG
    #[arg(long, global = true)]
    log: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a raw sector dump into an image
    Convert {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// hdd, flash, floppy, cdrom, dvdrom, bdrom, ...
        #[arg(short, long, default_value = "hdd")]
        media_type: String,
        #[arg(short, long, default_value = "512")]
        sector_size: u32,
        /// JSON file with creation options
        #[arg(long)]
        options: Option<PathBuf>,
        /// Creation option as key=value, repeatable
        #[arg(short = 'O', long = "option", value_name = "KEY=VALUE")]
        option: Vec<String>,
    },
    /// Show image metadata
    Info {
        input: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check every block against its CRC64
    Verify {
        input: PathBuf,
    },
    /// Write the user data of every sector to a raw file
    Extract {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log.as_deref());
    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("dicf: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(filter: Option<&str>) {
    let mut builder = match filter {
        Some(f) => {
            let mut b = env_logger::Builder::new();
            b.parse_filters(f);
            b
        }
        None => env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")),
    };
    builder.init();
}

fn run(command: Commands) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match command {

        // ── Convert ──────────────────────────────────────────────────────────
        Commands::Convert { input, output, media_type, sector_size, options, option } => {
            let media = MediaType::from_name(&media_type)
                .ok_or_else(|| format!("unknown media type '{media_type}'"))?;
            let opts = load_options(options.as_deref(), &option)?;
            convert(&input, &output, media, sector_size, &opts)?;
            println!("Created: {}", output.display());
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, json } => {
            let img = DicImage::open_file(&input)?;
            let info = img.info();
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
                return Ok(ExitCode::SUCCESS);
            }
            println!("── DiscImageChef image ──────────────────────────────────");
            println!("  Path            {}", input.display());
            println!("  Application     {} {}", info.application, info.application_version);
            println!("  Format version  {}", info.image_version);
            println!("  Media type      {:?}", info.media_type);
            println!("  Sectors         {} x {} B", info.sectors, info.sector_size);
            println!("  Block size      {} sectors", info.sectors_per_block);
            println!("  DDT             {}", if info.ddt_in_memory { "compressed" } else { "on disk" });
            println!("  Data blocks     {}", info.data_blocks);
            println!("  Created         {}", info.created);
            println!("  Last written    {}", info.last_written);
            if let Some(g) = info.geometry {
                println!("  Geometry        {}/{}/{}", g.cylinders, g.heads, g.sectors_per_track);
            }
            if let Some(creator) = &info.metadata.creator {
                println!("  Creator         {creator}");
            }
            if let Some(title) = &info.metadata.media_title {
                println!("  Media title     {title}");
            }
            for t in img.tracks() {
                println!(
                    "  Track {:>2}        session {} {:<12} {:>8} - {:<8}",
                    t.sequence, t.session, t.track_type.name(), t.start_sector, t.end_sector
                );
            }
            for tag in &info.media_tags {
                println!("  Media tag       {tag:?}");
            }
            for (name, digest) in &info.checksums {
                println!("  {:<15} {digest}", name.to_uppercase());
            }
        }

        // ── Verify ───────────────────────────────────────────────────────────
        Commands::Verify { input } => {
            let mut img = DicImage::open_file(&input)?;
            match img.verify_media_image()? {
                Some(true) => println!("{}: all blocks verified", input.display()),
                Some(false) => {
                    println!("{}: image is damaged", input.display());
                    return Ok(ExitCode::FAILURE);
                }
                None => println!("{}: image could not be verified", input.display()),
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, output } => {
            let mut img = DicImage::open_file(&input)?;
            let mut out = BufWriter::new(File::create(&output)?);
            for address in 0..img.sectors() {
                out.write_all(&img.read_sector(address)?)?;
            }
            out.flush()?;
            println!("Extracted {} sectors to {}", img.sectors(), output.display());
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn load_options(json: Option<&Path>, pairs: &[String]) -> Result<CreateOptions, Box<dyn std::error::Error>> {
    let mut opts = match json {
        Some(path) => serde_json::from_reader(BufReader::new(File::open(path)?))?,
        None       => CreateOptions::default(),
    };
    let mut map = HashMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("option '{pair}' is not KEY=VALUE"))?;
        map.insert(key.trim().to_string(), value.to_string());
    }
    opts.apply(&map)?;
    Ok(opts)
}

fn convert(
    input:       &Path,
    output:      &Path,
    media:       MediaType,
    sector_size: u32,
    opts:        &CreateOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let length = std::fs::metadata(input)?.len();
    let sectors = length.div_ceil(u64::from(sector_size)).max(1);
    let mut img = DicImage::create_file(output, media, sectors, sector_size, opts)?;
    if media.is_optical() {
        img.set_tracks(vec![Track::new(1, 1, TrackType::Data, 0, sectors - 1, sector_size)])?;
    }

    let mut reader = BufReader::new(File::open(input)?);
    let mut sector = vec![0u8; sector_size as usize];
    for address in 0..sectors {
        sector.fill(0);
        read_full(&mut reader, &mut sector)?;
        img.write_sector(address, &sector)?;
    }
    img.close()?;
    Ok(())
}

/// Fill `buf` as far as the input goes; a short final sector stays zero
/// padded.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(())
}
