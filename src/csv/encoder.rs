//! Delimited-text encoding with RFC 4180-like behavior

/// Encoder for writing properly quoted delimited rows
pub struct CsvEncoder {
    delimiter: u8,
    quote_char: u8,
}

impl CsvEncoder {
    /// Create a new encoder with custom delimiter and quote character
    pub fn new(delimiter: u8, quote_char: u8) -> Self {
        Self {
            delimiter,
            quote_char,
        }
    }

    /// Encode an entire row into the buffer (no line terminator)
    pub fn encode_row(&self, fields: &[&str], buffer: &mut Vec<u8>) {
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                buffer.push(self.delimiter);
            }
            self.encode_field(field, buffer);
        }
    }

    /// Encode a single field, quoting only when required
    fn encode_field(&self, field: &str, buffer: &mut Vec<u8>) {
        if self.needs_quoting(field) {
            buffer.push(self.quote_char);
            for byte in field.bytes() {
                if byte == self.quote_char {
                    buffer.push(self.quote_char);
                    buffer.push(self.quote_char);
                } else {
                    buffer.push(byte);
                }
            }
            buffer.push(self.quote_char);
        } else {
            buffer.extend_from_slice(field.as_bytes());
        }
    }

    /// A field needs quoting when it contains the delimiter, the quote
    /// character or a line terminator
    fn needs_quoting(&self, field: &str) -> bool {
        field
            .bytes()
            .any(|b| b == self.delimiter || b == self.quote_char || b == b'\n' || b == b'\r')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(fields: &[&str]) -> String {
        let encoder = CsvEncoder::new(b',', b'"');
        let mut buffer = Vec::new();
        encoder.encode_row(fields, &mut buffer);
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_simple_fields() {
        assert_eq!(encode(&["a", "b", "c"]), "a,b,c");
    }

    #[test]
    fn test_quoted_fields() {
        assert_eq!(encode(&["a,b", "c"]), r#""a,b",c"#);
    }

    #[test]
    fn test_escaped_quotes() {
        assert_eq!(
            encode(&[r#"Say "Hello""#, "world"]),
            r#""Say ""Hello""",world"#
        );
    }

    #[test]
    fn test_newlines() {
        assert_eq!(encode(&["Line 1\nLine 2", "normal"]), "\"Line 1\nLine 2\",normal");
    }

    #[test]
    fn test_empty_fields() {
        assert_eq!(encode(&["a", "", "c"]), "a,,c");
        assert_eq!(encode(&["", "", ""]), ",,");
    }

    #[test]
    fn test_custom_delimiter() {
        let encoder = CsvEncoder::new(b';', b'"');
        let mut buffer = Vec::new();
        encoder.encode_row(&["a", "b;c", "d"], &mut buffer);
        assert_eq!(String::from_utf8(buffer).unwrap(), r#"a;"b;c";d"#);
    }
}
