//! Rich-workbook surface over the streaming sink
//!
//! The streaming path cannot express styles, merges, formulas, images or
//! protection. This wrapper keeps those method names available for callers
//! migrating from DOM-style writers, but every rich operation fails loudly
//! instead of silently succeeding.

use crate::error::{EngineError, Result};
use crate::sink::RowSink;
use crate::types::CellValue;

/// A [`RowSink`] wrapper exposing the rich-workbook API surface.
///
/// Row and header writes pass through; everything else returns
/// [`EngineError::NotImplementedInStreamingMode`].
pub struct RichWriter {
    sink: RowSink,
}

impl RichWriter {
    /// Wrap a streaming sink
    pub fn new(sink: RowSink) -> Self {
        RichWriter { sink }
    }

    /// Pass-through: write the header row
    pub fn write_header<I, S>(&mut self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.sink.write_header(names)
    }

    /// Pass-through: append a data row
    pub fn write_row(&mut self, cells: &[CellValue]) -> Result<()> {
        self.sink.write_row(cells)
    }

    /// Pass-through: finalize the output
    pub fn finish(&mut self) -> Result<()> {
        self.sink.finish()
    }

    /// Unwrap the underlying sink
    pub fn into_inner(self) -> RowSink {
        self.sink
    }

    pub fn set_cell_style(&mut self, _reference: &str, _style_name: &str) -> Result<()> {
        Err(EngineError::NotImplementedInStreamingMode("set_cell_style"))
    }

    pub fn merge_cells(&mut self, _range: &str) -> Result<()> {
        Err(EngineError::NotImplementedInStreamingMode("merge_cells"))
    }

    pub fn write_formula(&mut self, _reference: &str, _formula: &str) -> Result<()> {
        Err(EngineError::NotImplementedInStreamingMode("write_formula"))
    }

    pub fn insert_image(&mut self, _reference: &str, _bytes: &[u8]) -> Result<()> {
        Err(EngineError::NotImplementedInStreamingMode("insert_image"))
    }

    pub fn add_chart(&mut self, _range: &str) -> Result<()> {
        Err(EngineError::NotImplementedInStreamingMode("add_chart"))
    }

    pub fn add_data_validation(&mut self, _range: &str, _rule: &str) -> Result<()> {
        Err(EngineError::NotImplementedInStreamingMode(
            "add_data_validation",
        ))
    }

    pub fn protect_sheet(&mut self, _password: &str) -> Result<()> {
        Err(EngineError::NotImplementedInStreamingMode("protect_sheet"))
    }

    pub fn set_column_width(&mut self, _column: u32, _width: f64) -> Result<()> {
        Err(EngineError::NotImplementedInStreamingMode("set_column_width"))
    }

    pub fn set_row_height(&mut self, _row: u32, _height: f64) -> Result<()> {
        Err(EngineError::NotImplementedInStreamingMode("set_row_height"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use tempfile::TempDir;

    #[test]
    fn test_rich_surface_is_loud() {
        let dir = TempDir::new().unwrap();
        let sink = RowSink::create(dir.path().join("r.xlsx"), &Settings::default()).unwrap();
        let mut rich = RichWriter::new(sink);

        assert!(matches!(
            rich.merge_cells("A1:B2"),
            Err(EngineError::NotImplementedInStreamingMode("merge_cells"))
        ));
        assert!(rich.set_cell_style("A1", "bold").is_err());
        assert!(rich.protect_sheet("secret").is_err());

        // The streaming surface still works through the wrapper
        rich.write_header(["a"]).unwrap();
        rich.write_row(&[CellValue::Int(1)]).unwrap();
        rich.finish().unwrap();
    }
}
