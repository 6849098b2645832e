//! End-to-end tests: write-then-read roundtrips, windowing and workbook
//! fixtures exercised through the public API

use sheetstream::pipeline::Pipeline;
use sheetstream::settings::Settings;
use sheetstream::sink::RowSink;
use sheetstream::source::RowSource;
use sheetstream::types::{CellValue, DateTimeKind};
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

/// Assemble a workbook package from raw part bodies (fixtures the writer
/// cannot produce: hidden sheets, shared strings, row gaps)
fn build_xlsx(path: &Path, parts: &[(&str, String)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    zip.start_file("[Content_Types].xml", options).unwrap();
    zip.write_all(br#"<?xml version="1.0"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/></Types>"#).unwrap();
    for (name, body) in parts {
        zip.start_file(*name, options).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

fn sheet_xml(rows: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?><worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\"><sheetData>{}</sheetData></worksheet>",
        rows
    )
}

#[test]
fn test_csv_header_typing() {
    // A header plus two data rows reads back as typed records
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("people.csv");
    std::fs::write(&path, "name,age\nAlice,30\nBob,25\n").unwrap();

    let mut pipeline = Pipeline::open(&path).unwrap().has_header(true);
    let records = pipeline.to_records().unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["name"], CellValue::Str("Alice".to_string()));
    assert_eq!(records[0]["age"], CellValue::Int(30));
    assert_eq!(records[1]["name"], CellValue::Str("Bob".to_string()));
    assert_eq!(records[1]["age"], CellValue::Int(25));
}

#[test]
fn test_large_csv_chunked_traversal() {
    // Scaled-down bulk scenario: every row arrives exactly once in order
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bulk.csv");
    {
        let mut file = std::io::BufWriter::new(std::fs::File::create(&path).unwrap());
        for i in 0..50_000 {
            writeln!(file, "{},value-{},{}", i, i, i % 7).unwrap();
        }
    }

    let mut pipeline = Pipeline::open(&path).unwrap();
    let mut counter = 0u64;
    let mut last_first_cell = -1i64;
    let total = pipeline
        .chunk(5_000, |batch, _| {
            for row in batch {
                let value = row.get(0).and_then(|c| c.as_i64()).unwrap();
                assert_eq!(value, last_first_cell + 1);
                last_first_cell = value;
                counter += 1;
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(counter, 50_000);
    assert_eq!(total, 50_000);
}

#[test]
fn test_sheet_listing_order_and_visibility() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("three.xlsx");
    let workbook = r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Sales" sheetId="1" r:id="rId1"/><sheet name="Stats" sheetId="2" r:id="rId2"/><sheet name="Secret" sheetId="3" state="hidden" r:id="rId3"/></sheets></workbook>"#;
    let rels = r#"<Relationships><Relationship Id="rId1" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Target="worksheets/sheet2.xml"/><Relationship Id="rId3" Target="worksheets/sheet3.xml"/></Relationships>"#;
    build_xlsx(
        &path,
        &[
            ("xl/workbook.xml", workbook.to_string()),
            ("xl/_rels/workbook.xml.rels", rels.to_string()),
            ("xl/worksheets/sheet1.xml", sheet_xml("")),
            ("xl/worksheets/sheet2.xml", sheet_xml("")),
            ("xl/worksheets/sheet3.xml", sheet_xml("")),
        ],
    );

    let source = RowSource::open(&path, &Settings::default()).unwrap();
    let sheets = source.sheets();
    assert_eq!(
        sheets
            .iter()
            .map(|s| (s.name.as_str(), s.visible))
            .collect::<Vec<_>>(),
        vec![("Sales", true), ("Stats", true), ("Secret", false)]
    );
}

#[test]
fn test_shared_strings_in_row_order() {
    // 200-entry table referenced at 0, 50 and 199 resolves lazily
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sst.xlsx");
    let mut sst = String::from(r#"<sst count="200" uniqueCount="200">"#);
    for i in 0..200 {
        sst.push_str(&format!("<si><t>entry-{}</t></si>", i));
    }
    sst.push_str("</sst>");

    let workbook = r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets></workbook>"#;
    let rels = r#"<Relationships><Relationship Id="rId1" Target="worksheets/sheet1.xml"/></Relationships>"#;
    let rows = r#"<row r="1"><c r="A1" t="s"><v>0</v></c></row><row r="2"><c r="A2" t="s"><v>50</v></c></row><row r="3"><c r="A3" t="s"><v>199</v></c></row>"#;
    build_xlsx(
        &path,
        &[
            ("xl/workbook.xml", workbook.to_string()),
            ("xl/_rels/workbook.xml.rels", rels.to_string()),
            ("xl/sharedStrings.xml", sst),
            ("xl/worksheets/sheet1.xml", sheet_xml(rows)),
        ],
    );

    let mut pipeline = Pipeline::open(&path).unwrap();
    let rows = pipeline.to_rows().unwrap();
    assert_eq!(
        rows.iter().map(|r| r.cells[0].as_string()).collect::<Vec<_>>(),
        vec!["entry-0", "entry-50", "entry-199"]
    );
}

#[test]
fn test_range_rectangle() {
    // 10x10 sequential integers starting at 1 in A1, across then down
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("grid.xlsx");
    {
        let mut sink = RowSink::create(&path, &Settings::default()).unwrap();
        for row in 0..10i64 {
            let cells: Vec<CellValue> =
                (0..10).map(|col| CellValue::Int(row * 10 + col + 1)).collect();
            sink.write_row(&cells).unwrap();
        }
        sink.finish().unwrap();
    }

    let mut pipeline = Pipeline::open(&path).unwrap().range("B2:D4").unwrap();
    let rows = pipeline.to_rows().unwrap();
    let values: Vec<Vec<i64>> = rows
        .iter()
        .map(|r| r.cells.iter().map(|c| c.as_i64().unwrap()).collect())
        .collect();
    assert_eq!(values, vec![vec![12, 13, 14], vec![22, 23, 24], vec![32, 33, 34]]);
}

#[test]
fn test_header_roundtrip_both_formats() {
    let dir = TempDir::new().unwrap();
    for ext in ["csv", "xlsx"] {
        let path = dir.path().join(format!("hdr.{}", ext));
        {
            let mut sink = RowSink::create(&path, &Settings::default()).unwrap();
            sink.write_header(["a", "b"]).unwrap();
            sink.write_row(&[CellValue::Int(1), CellValue::Int(2)]).unwrap();
            sink.finish().unwrap();
        }

        let mut pipeline = Pipeline::open(&path).unwrap().has_header(true);
        let records = pipeline.to_records().unwrap();
        assert_eq!(records.len(), 1, "{ext}");
        assert_eq!(records[0]["a"], CellValue::Int(1), "{ext}");
        assert_eq!(records[0]["b"], CellValue::Int(2), "{ext}");
    }
}

#[test]
fn test_cursor_to_writer() {
    // A lazy generator stands in for a database cursor; the sink drains it
    // one record at a time
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cursor.csv");
    let mut sink = RowSink::create(&path, &Settings::default()).unwrap();

    let cursor = (0..1000).map(|i| {
        let mut record = indexmap::IndexMap::new();
        record.insert("id".to_string(), CellValue::Int(i));
        record.insert("name".to_string(), CellValue::Str(format!("user-{}", i)));
        record
    });
    let written = sink.write_from(cursor).unwrap();
    sink.finish().unwrap();
    assert_eq!(written, 1000);

    let mut pipeline = Pipeline::open(&path).unwrap().has_header(true);
    assert_eq!(pipeline.count().unwrap(), 1000);
}

fn sample_row() -> Vec<CellValue> {
    vec![
        CellValue::Int(42),
        CellValue::Float(2.5),
        CellValue::Str("plain text".to_string()),
        CellValue::Null,
        CellValue::Bool(true),
    ]
}

#[test]
fn test_roundtrip_delimited() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("round.csv");
    {
        let mut sink = RowSink::create(&path, &Settings::default()).unwrap();
        sink.write_row(&sample_row()).unwrap();
        sink.write_row(&[CellValue::Int(-7), CellValue::Str("x,y".to_string())])
            .unwrap();
        sink.finish().unwrap();
    }

    let mut pipeline = Pipeline::open(&path).unwrap();
    let rows = pipeline.to_rows().unwrap();
    assert_eq!(
        rows[0].cells,
        vec![
            CellValue::Int(42),
            CellValue::Float(2.5),
            CellValue::Str("plain text".to_string()),
            CellValue::Null,
            CellValue::Bool(true),
        ]
    );
    assert_eq!(
        rows[1].cells,
        vec![CellValue::Int(-7), CellValue::Str("x,y".to_string())]
    );
}

#[test]
fn test_roundtrip_xlsx_with_datetime() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("round.xlsx");
    let when = chrono::NaiveDate::from_ymd_opt(2023, 10, 18)
        .unwrap()
        .and_hms_opt(12, 30, 45)
        .unwrap();
    {
        let mut sink = RowSink::create(&path, &Settings::default()).unwrap();
        let mut cells = sample_row();
        cells.push(CellValue::DateTime {
            when,
            kind: DateTimeKind::DateTime,
        });
        sink.write_row(&cells).unwrap();
        sink.finish().unwrap();
    }

    let mut pipeline = Pipeline::open(&path).unwrap();
    let rows = pipeline.to_rows().unwrap();
    assert_eq!(rows[0].cells[0], CellValue::Int(42));
    assert_eq!(rows[0].cells[1], CellValue::Float(2.5));
    assert_eq!(rows[0].cells[2], CellValue::Str("plain text".to_string()));
    assert_eq!(rows[0].cells[3], CellValue::Null);
    assert_eq!(rows[0].cells[4], CellValue::Bool(true));
    // Date-times round-trip to second precision
    assert_eq!(
        rows[0].cells[5],
        CellValue::DateTime {
            when,
            kind: DateTimeKind::DateTime,
        }
    );
}

#[test]
fn test_order_preserved_under_window_and_filters() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("order.csv");
    {
        let mut file = std::fs::File::create(&path).unwrap();
        for i in 1..=100 {
            writeln!(file, "{}", i).unwrap();
        }
    }

    let mut pipeline = Pipeline::open(&path)
        .unwrap()
        .offset(10)
        .limit(50)
        .filter(|row| row.get(0).and_then(|c| c.as_i64()).unwrap_or(0) % 3 == 0);
    let rows = pipeline.to_rows().unwrap();

    let values: Vec<i64> = rows
        .iter()
        .map(|r| r.get(0).unwrap().as_i64().unwrap())
        .collect();
    let mut sorted = values.clone();
    sorted.sort_unstable();
    assert_eq!(values, sorted);
    assert!(values.iter().all(|v| v % 3 == 0 && *v > 10));
    // Filters drop rows without reordering; logical numbers stay source-true
    for (row, value) in rows.iter().zip(&values) {
        assert_eq!(row.number as i64, *value);
    }
}

#[test]
fn test_convert_xlsx_to_csv() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.xlsx");
    let output = dir.path().join("out.csv");
    {
        let mut sink = RowSink::create(&input, &Settings::default()).unwrap();
        sink.write_header(["city", "pop"]).unwrap();
        sink.write_row(&[CellValue::Str("Geneva".to_string()), CellValue::Int(203_856)])
            .unwrap();
        sink.write_row(&[CellValue::Str("Zurich".to_string()), CellValue::Int(421_878)])
            .unwrap();
        sink.finish().unwrap();
    }

    let mut pipeline = Pipeline::open(&input).unwrap().has_header(true);
    let mut sink = RowSink::create(&output, &Settings::default()).unwrap();
    let rows = pipeline.write_to(&mut sink).unwrap();
    sink.finish().unwrap();

    assert_eq!(rows, 2);
    let content = std::fs::read_to_string(&output).unwrap();
    assert_eq!(content, "city,pop\nGeneva,203856\nZurich,421878\n");
}

#[test]
fn test_jsonl_to_xlsx_convert() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("rows.json");
    let output = dir.path().join("rows.xlsx");
    std::fs::write(&input, "[1, \"one\"]\n[2, \"two\"]\n").unwrap();

    let mut pipeline = Pipeline::open(&input).unwrap();
    let mut sink = RowSink::create(&output, &Settings::default()).unwrap();
    assert_eq!(pipeline.write_to(&mut sink).unwrap(), 2);
    sink.finish().unwrap();

    let mut back = Pipeline::open(&output).unwrap();
    let rows = back.to_rows().unwrap();
    assert_eq!(rows[0].cells, vec![CellValue::Int(1), CellValue::Str("one".to_string())]);
    assert_eq!(rows[1].cells, vec![CellValue::Int(2), CellValue::Str("two".to_string())]);
}

#[test]
fn test_row_gaps_preserved_through_pipeline() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gaps.xlsx");
    let workbook = r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets></workbook>"#;
    let rels = r#"<Relationships><Relationship Id="rId1" Target="worksheets/sheet1.xml"/></Relationships>"#;
    let rows = r#"<row r="1"><c r="A1"><v>1</v></c></row><row r="5"><c r="A5"><v>5</v></c></row><row r="9"><c r="A9"><v>9</v></c></row>"#;
    build_xlsx(
        &path,
        &[
            ("xl/workbook.xml", workbook.to_string()),
            ("xl/_rels/workbook.xml.rels", rels.to_string()),
            ("xl/worksheets/sheet1.xml", sheet_xml(rows)),
        ],
    );

    let mut pipeline = Pipeline::open(&path).unwrap();
    let rows = pipeline.to_rows().unwrap();
    assert_eq!(rows.iter().map(|r| r.number).collect::<Vec<_>>(), vec![1, 5, 9]);
}

#[test]
fn test_hidden_sheet_addressable_by_name() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hidden.xlsx");
    let workbook = r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Visible" sheetId="1" r:id="rId1"/><sheet name="Secret" sheetId="2" state="hidden" r:id="rId2"/></sheets></workbook>"#;
    let rels = r#"<Relationships><Relationship Id="rId1" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Target="worksheets/sheet2.xml"/></Relationships>"#;
    build_xlsx(
        &path,
        &[
            ("xl/workbook.xml", workbook.to_string()),
            ("xl/_rels/workbook.xml.rels", rels.to_string()),
            (
                "xl/worksheets/sheet1.xml",
                sheet_xml(r#"<row r="1"><c r="A1"><v>1</v></c></row>"#),
            ),
            (
                "xl/worksheets/sheet2.xml",
                sheet_xml(r#"<row r="1"><c r="A1"><v>99</v></c></row>"#),
            ),
        ],
    );

    // Default selection is the first visible sheet
    let mut pipeline = Pipeline::open(&path).unwrap();
    assert_eq!(pipeline.first().unwrap().unwrap().cells[0], CellValue::Int(1));

    // The hidden sheet is reachable by explicit name
    let mut pipeline = Pipeline::open(&path).unwrap().sheet("Secret");
    assert_eq!(pipeline.first().unwrap().unwrap().cells[0], CellValue::Int(99));
}

#[cfg(target_os = "linux")]
#[test]
fn test_close_releases_file_handles() {
    fn open_fds() -> usize {
        std::fs::read_dir("/proc/self/fd").unwrap().count()
    }

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fds.csv");
    std::fs::write(&path, "a,b\n1,2\n").unwrap();

    let before = open_fds();
    {
        let mut source = RowSource::open(&path, &Settings::default()).unwrap();
        let _ = source.next_row().unwrap();
        source.close();
        assert_eq!(open_fds(), before);
    }
    assert_eq!(open_fds(), before);
}

#[cfg(target_os = "linux")]
#[test]
fn test_xlsx_close_mid_stream_releases_handles() {
    fn open_fds() -> usize {
        std::fs::read_dir("/proc/self/fd").unwrap().count()
    }

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fds.xlsx");
    {
        let mut sink = RowSink::create(&path, &Settings::default()).unwrap();
        for i in 0..5000i64 {
            sink.write_row(&[CellValue::Int(i), CellValue::Str("pad".to_string())])
                .unwrap();
        }
        sink.finish().unwrap();
    }

    let before = open_fds();
    let mut source = RowSource::open(&path, &Settings::default()).unwrap();
    // Pull a few rows, then abandon mid-stream
    for _ in 0..3 {
        source.next_row().unwrap().unwrap();
    }
    source.close();
    assert_eq!(open_fds(), before);
}
