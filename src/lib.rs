//! # sheetstream
//!
//! A streaming spreadsheet engine: read and write OOXML workbooks (.xlsx),
//! delimited text (.csv/.tsv) and JSON-lines files one row at a time, with
//! memory usage that is bounded and independent of row count.
//!
//! ## Reading
//!
//! ```rust,no_run
//! use sheetstream::Pipeline;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut pipeline = Pipeline::open("large.xlsx")?
//!     .sheet("Sales")
//!     .has_header(true)
//!     .limit(10_000);
//!
//! while let Some(row) = pipeline.next_row()? {
//!     println!("{}: {:?}", row.number, row.to_strings());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Writing
//!
//! ```rust,no_run
//! use sheetstream::{CellValue, RowSink, Settings};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut sink = RowSink::create("out.xlsx", &Settings::default())?;
//! sink.write_header(["name", "age"])?;
//! sink.write_row(&[CellValue::Str("Alice".into()), CellValue::Int(30)])?;
//! sink.finish()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Converting
//!
//! ```rust,no_run
//! use sheetstream::{Pipeline, RowSink, Settings};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut pipeline = Pipeline::open("input.csv")?.has_header(true);
//! let mut sink = RowSink::create("output.xlsx", &Settings::default())?;
//! pipeline.write_to(&mut sink)?;
//! sink.finish()?;
//! # Ok(())
//! # }
//! ```

pub mod csv;
pub mod csv_reader;
pub mod csv_writer;
pub mod error;
pub mod jsonl;
pub mod memory;
pub mod pipeline;
pub mod probe;
pub mod range;
pub mod rich;
pub mod settings;
pub mod shared_strings;
pub mod sink;
pub mod source;
pub mod types;
pub mod xlsx_reader;
pub mod xlsx_writer;

pub use error::{EngineError, Result};
pub use pipeline::Pipeline;
pub use probe::{probe, FileFormat, ProbeReport};
pub use settings::Settings;
pub use sink::RowSink;
pub use source::{RowSource, SheetDescriptor, SheetRef};
pub use types::{CellValue, DateTimeKind, Row};
