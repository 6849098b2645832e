//! Delimited-text parsing with RFC 4180-like behavior

/// Accumulates one logical record across physical lines.
///
/// A quoted field may contain the record terminator, so a record is only
/// complete once the parser leaves the quoted state at a line end.
#[derive(Debug, Default)]
pub struct RecordBuilder {
    fields: Vec<String>,
    current: String,
    in_quotes: bool,
    fed: bool,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no line has been fed since the last `finish`
    pub fn is_fresh(&self) -> bool {
        !self.fed
    }

    /// Finalize the record and reset the builder for the next one
    pub fn finish(&mut self) -> Vec<String> {
        let mut fields = std::mem::take(&mut self.fields);
        fields.push(std::mem::take(&mut self.current));
        self.in_quotes = false;
        self.fed = false;
        fields
    }
}

/// Parser for delimited text with doubled-quote escaping
pub struct CsvParser {
    delimiter: u8,
    quote_char: u8,
}

impl CsvParser {
    /// Create a new parser with custom delimiter and quote character
    pub fn new(delimiter: u8, quote_char: u8) -> Self {
        Self {
            delimiter,
            quote_char,
        }
    }

    /// Feed one physical line (terminator stripped) into the record.
    ///
    /// Returns `true` when the record is complete, `false` when a quoted
    /// field continues onto the next line.
    pub fn feed_line(&self, line: &str, record: &mut RecordBuilder) -> bool {
        let quote = self.quote_char as char;
        let delimiter = self.delimiter as char;

        if record.fed && record.in_quotes {
            record.current.push('\n');
        }
        record.fed = true;

        let mut chars = line.chars().peekable();
        while let Some(ch) = chars.next() {
            if record.in_quotes {
                if ch == quote {
                    if chars.peek() == Some(&quote) {
                        record.current.push(quote);
                        chars.next();
                    } else {
                        record.in_quotes = false;
                    }
                } else {
                    record.current.push(ch);
                }
            } else if ch == quote {
                record.in_quotes = true;
            } else if ch == delimiter {
                record.fields.push(std::mem::take(&mut record.current));
            } else {
                record.current.push(ch);
            }
        }

        !record.in_quotes
    }

    /// Parse a single self-contained line into fields
    pub fn parse_line(&self, line: &str) -> Vec<String> {
        let mut record = RecordBuilder::new();
        self.feed_line(line, &mut record);
        record.finish()
    }
}
