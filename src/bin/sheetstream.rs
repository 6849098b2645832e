//! Command-line interface: read, write and convert spreadsheet files

use clap::{Parser, Subcommand};
use sheetstream::sink::SinkFormat;
use sheetstream::{CellValue, EngineError, Pipeline, RowSink, Settings};
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "sheetstream", version, about = "Streaming spreadsheet engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print rows from a spreadsheet file as delimited text
    Read {
        /// Input path (.xlsx, .csv, .tsv, .json)
        path: PathBuf,
        #[arg(long)]
        sheet: Option<String>,
        /// Rectangular range like B2:D10
        #[arg(long)]
        range: Option<String>,
        #[arg(long)]
        limit: Option<u64>,
        #[arg(long)]
        offset: Option<u32>,
        /// Treat the first row as a header
        #[arg(long)]
        has_header: bool,
        /// Print format: csv (default), tsv or jsonl
        #[arg(long)]
        format: Option<String>,
    },
    /// Write stdin lines (comma-delimited) to a file
    Write {
        /// Output path; the extension selects the format unless --format is
        /// given
        path: PathBuf,
        /// Output format override: csv, xlsx or jsonl
        #[arg(long)]
        format: Option<String>,
        /// Treat the first stdin line as a header
        #[arg(long)]
        has_header: bool,
    },
    /// Convert between formats, streaming row by row
    Convert {
        /// Input path
        path: PathBuf,
        /// Output path; the extension selects the format unless --format is
        /// given
        output: PathBuf,
        #[arg(long)]
        sheet: Option<String>,
        #[arg(long)]
        range: Option<String>,
        #[arg(long)]
        limit: Option<u64>,
        #[arg(long)]
        offset: Option<u32>,
        #[arg(long)]
        has_header: bool,
        /// Output format override: csv, xlsx or jsonl
        #[arg(long)]
        format: Option<String>,
    },
}

fn make_sink(path: &PathBuf, format: Option<&str>) -> Result<RowSink, EngineError> {
    match format {
        None => RowSink::create(path, &Settings::default()),
        Some(name) => {
            let format = match name.to_ascii_lowercase().as_str() {
                "csv" | "tsv" | "txt" => SinkFormat::Delimited,
                "xlsx" => SinkFormat::Xlsx,
                "json" | "jsonl" | "ndjson" => SinkFormat::JsonLines,
                other => return Err(EngineError::FormatUnknown(other.to_string())),
            };
            RowSink::create_with_format(path, format, &Settings::default())
        }
    }
}

fn main() -> ExitCode {
    // Usage errors exit 3; help/version are not errors
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code: u8 = if err.use_stderr() { 3 } else { 0 };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("sheetstream: {}", err);
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn build_pipeline(
    path: &PathBuf,
    sheet: Option<String>,
    range: Option<String>,
    limit: Option<u64>,
    offset: Option<u32>,
    has_header: bool,
) -> Result<Pipeline, EngineError> {
    let mut pipeline = Pipeline::open(path)?;
    if let Some(sheet) = sheet {
        pipeline = pipeline.sheet(sheet.as_str());
    }
    if let Some(range) = range {
        pipeline = pipeline.range(&range)?;
    }
    if let Some(limit) = limit {
        pipeline = pipeline.limit(limit);
    }
    if let Some(offset) = offset {
        pipeline = pipeline.offset(offset);
    }
    Ok(pipeline.has_header(has_header))
}

fn run(cli: Cli) -> Result<(), EngineError> {
    match cli.command {
        Command::Read {
            path,
            sheet,
            range,
            limit,
            offset,
            has_header,
            format,
        } => {
            let jsonl = matches!(format.as_deref(), Some("jsonl") | Some("json"));
            let separator = match format.as_deref() {
                Some("tsv") => "\t",
                _ => ",",
            };
            let mut pipeline = build_pipeline(&path, sheet, range, limit, offset, has_header)?;
            let mut printed_header = false;
            while let Some(row) = pipeline.next_row()? {
                if has_header && !printed_header {
                    if let Some(header) = pipeline.header() {
                        println!("{}", header.join(separator));
                    }
                    printed_header = true;
                }
                if jsonl {
                    let values: Vec<String> =
                        row.cells.iter().map(|c| c.as_string()).collect();
                    println!(
                        "{}",
                        serde_json::to_string(&values).unwrap_or_default()
                    );
                } else {
                    println!("{}", row.to_strings().join(separator));
                }
            }
            Ok(())
        }
        Command::Write {
            path,
            format,
            has_header,
        } => {
            let mut sink = make_sink(&path, format.as_deref())?;
            let stdin = std::io::stdin();
            let mut first = true;
            for line in stdin.lock().lines() {
                let line = line?;
                let cells: Vec<CellValue> = line
                    .split(',')
                    .map(|field| CellValue::Str(field.to_string()))
                    .collect();
                if first && has_header {
                    let names: Vec<String> =
                        cells.iter().map(|c| c.as_string()).collect();
                    sink.write_header(names)?;
                } else {
                    sink.write_row(&cells)?;
                }
                first = false;
            }
            sink.finish()
        }
        Command::Convert {
            path,
            output,
            sheet,
            range,
            limit,
            offset,
            has_header,
            format,
        } => {
            let mut pipeline = build_pipeline(&path, sheet, range, limit, offset, has_header)?;
            let mut sink = make_sink(&output, format.as_deref())?;
            let rows = pipeline.write_to(&mut sink)?;
            sink.finish()?;
            eprintln!("wrote {} rows to {}", rows, output.display());
            Ok(())
        }
    }
}
