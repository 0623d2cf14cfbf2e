//! Encoding detection and transcoding for byte inputs.
//!
//! BOM sniffing per XML 1.0 Appendix F, followed by inspection of the XML
//! declaration's `encoding=` label, bridged to `encoding_rs` for the actual
//! conversion. The parser itself only ever sees UTF-8.

/// An error during encoding detection or transcoding.
#[derive(Debug, Clone)]
pub struct EncodingError {
    /// Human-readable description.
    pub message: String,
}

impl EncodingError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for EncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EncodingError {}

/// Decodes raw XML bytes to a UTF-8 string.
///
/// Detection order:
/// 1. BOM (`EF BB BF` UTF-8, `FE FF` UTF-16 BE, `FF FE` UTF-16 LE);
/// 2. UTF-16 sniffing from the `<?` pattern when no BOM is present;
/// 3. the `encoding=` label in the XML declaration;
/// 4. UTF-8 as the default.
pub fn decode_to_utf8(input: &[u8]) -> Result<String, EncodingError> {
    if input.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return decode_with(encoding_rs::UTF_8, &input[3..]);
    }
    if input.starts_with(&[0xFE, 0xFF]) {
        return decode_with(encoding_rs::UTF_16BE, &input[2..]);
    }
    if input.starts_with(&[0xFF, 0xFE]) {
        return decode_with(encoding_rs::UTF_16LE, &input[2..]);
    }
    // "<?" in UTF-16 without a BOM: 003C 003F (BE) or 3C00 3F00 (LE).
    if input.starts_with(&[0x00, 0x3C, 0x00, 0x3F]) {
        return decode_with(encoding_rs::UTF_16BE, input);
    }
    if input.starts_with(&[0x3C, 0x00, 0x3F, 0x00]) {
        return decode_with(encoding_rs::UTF_16LE, input);
    }

    if let Some(label) = declared_encoding(input) {
        let lower = label.to_ascii_lowercase();
        if lower == "utf-8" || lower == "us-ascii" || lower == "ascii" {
            return decode_with(encoding_rs::UTF_8, input);
        }
        let Some(enc) = encoding_rs::Encoding::for_label(label.as_bytes()) else {
            return Err(EncodingError::new(format!(
                "unsupported encoding '{label}'"
            )));
        };
        return decode_with(enc, input);
    }

    decode_with(encoding_rs::UTF_8, input)
}

fn decode_with(
    enc: &'static encoding_rs::Encoding,
    bytes: &[u8],
) -> Result<String, EncodingError> {
    let (text, had_errors) = enc.decode_without_bom_handling(bytes);
    if had_errors {
        return Err(EncodingError::new(format!(
            "input is not valid {}",
            enc.name()
        )));
    }
    Ok(text.into_owned())
}

/// Extracts the `encoding=` label from an XML declaration, assuming an
/// ASCII-compatible byte stream (the UTF-16 cases are handled before this
/// is consulted).
fn declared_encoding(input: &[u8]) -> Option<String> {
    let head = &input[..input.len().min(256)];
    let text = std::str::from_utf8(head).unwrap_or_else(|e| {
        // Inspect only the valid prefix; the declaration is ASCII.
        #[allow(clippy::expect_used)]
        std::str::from_utf8(&head[..e.valid_up_to()]).expect("prefix is valid UTF-8")
    });
    let trimmed = text.trim_start();
    if !trimmed.starts_with("<?xml") {
        return None;
    }
    let decl = &trimmed[..trimmed.find("?>")?];
    let enc_pos = decl.find("encoding")?;
    let after = decl[enc_pos + "encoding".len()..].trim_start();
    let after = after.strip_prefix('=')?.trim_start();
    let quote = after.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let value = &after[1..];
    let end = value.find(quote)?;
    Some(value[..end].to_string())
}
