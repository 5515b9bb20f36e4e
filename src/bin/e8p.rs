use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use clap::{Parser, Subcommand};

use e8p::io::{read_fvecs, write_fvecs, write_packed_abs, PackedCodes};
use e8p::{quantization_mse, tables, CodebookConfig, E8pCodebook, Matrix};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(name = "e8p", about = "Build, quantize with and decode the E8P lattice codebook")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the codebook tables and report their sizes
    Tables {
        /// Write the packed abs table (256 little-endian u32 words) here
        #[arg(long)]
        packed_abs: Option<PathBuf>,
    },
    /// Quantize the rows of an fvecs matrix and store packed indices
    Quantize {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Multiply inputs by this before quantizing (the codebook default when omitted)
        #[arg(long)]
        scale: Option<f32>,
        /// Only read this many rows
        #[arg(long)]
        max_rows: Option<usize>,
    },
    /// Decode packed indices back to an fvecs matrix
    Decode {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Divide decoded values by this scale
        #[arg(long, default_value_t = 1.0)]
        scale: f32,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("e8p=info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli.command) {
        eprintln!("Error: {err}");
        let mut source = err.source();
        while let Some(inner) = source {
            eprintln!("  caused by: {inner}");
            source = inner.source();
        }
        process::exit(1);
    }
}

fn run(command: Command) -> CliResult<()> {
    match command {
        Command::Tables { packed_abs } => run_tables(packed_abs),
        Command::Quantize {
            input,
            output,
            scale,
            max_rows,
        } => run_quantize(input, output, scale, max_rows),
        Command::Decode {
            input,
            output,
            scale,
        } => run_decode(input, output, scale),
    }
}

fn run_tables(packed_abs: Option<PathBuf>) -> CliResult<()> {
    let start = Instant::now();
    let tables = tables();
    tracing::info!(elapsed = ?start.elapsed(), "codebook tables ready");

    println!("abs grid rows:     {}", tables.abs_grid().len());
    println!(
        "odd abs rows:      {}",
        tables.abs_odd().iter().filter(|&&odd| odd).count()
    );
    println!("full grid rows:    {}", tables.full_grid().len());
    println!("partial grid rows: {}", tables.partial_grid().len());

    if let Some(path) = packed_abs {
        let writer = BufWriter::new(File::create(&path)?);
        write_packed_abs(writer, tables.packed_abs())?;
        println!("Wrote packed abs table to {}", path.display());
    }
    Ok(())
}

fn run_quantize(
    input: PathBuf,
    output: PathBuf,
    scale: Option<f32>,
    max_rows: Option<usize>,
) -> CliResult<()> {
    let codebook = E8pCodebook::new();
    let scale = scale.unwrap_or(codebook.config().opt_scale);

    println!("Loading matrix from {}...", input.display());
    let rows = read_fvecs(&input, max_rows)?;
    let weights = Matrix::from_rows(&rows)?;
    println!("Loaded {} rows of width {}", weights.rows(), weights.cols());

    let start = Instant::now();
    let (quantized, indices) = codebook.quantize_matrix_scaled(&weights, scale)?;
    let packed = e8p::pack_indices(&indices)?;
    tracing::info!(
        rows = weights.rows(),
        cols = weights.cols(),
        scale,
        elapsed = ?start.elapsed(),
        "quantized matrix"
    );

    let mse = quantization_mse(&weights, &quantized)?;
    println!("Quantization MSE: {mse:.6}");

    PackedCodes::new(packed, codebook.packed_abs().clone()).save_to_path(&output)?;
    println!(
        "Saved {} packed words to {}",
        indices.rows() * indices.cols() / CodebookConfig::default().packsz,
        output.display()
    );
    Ok(())
}

fn run_decode(input: PathBuf, output: PathBuf, scale: f32) -> CliResult<()> {
    println!("Loading packed codes from {}...", input.display());
    let codes = PackedCodes::load_from_path(&input)?;
    let decoded = e8p::decode_packed_scaled(&codes.packed, &codes.packed_abs, scale)?;
    tracing::info!(
        rows = decoded.rows(),
        cols = decoded.cols(),
        "decoded packed codes"
    );

    write_fvecs(&output, &decoded.to_rows())?;
    println!(
        "Wrote {} rows of width {} to {}",
        decoded.rows(),
        decoded.cols(),
        output.display()
    );
    Ok(())
}
