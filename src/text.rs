//! Text crossing the engine boundary.
//!
//! The engine passes command arguments in the ANSI code page and prints
//! through a printf-style format string. These helpers keep that conversion
//! out of the Windows-only glue.

/// Decodes raw argument bytes. `to_wide` converts through the active code
/// page where one exists; without it the bytes are read as UTF-8, with
/// invalid sequences replaced.
pub fn decode_args<W>(raw: &[u8], to_wide: W) -> String
where
    W: FnOnce(&[u8]) -> Option<Vec<u16>>,
{
    if raw.is_empty() {
        return String::new();
    }

    match to_wide(raw) {
        Some(wide) => String::from_utf16_lossy(&wide),
        None => String::from_utf8_lossy(raw).into_owned(),
    }
}

/// Makes `text` safe to hand to the engine as a format string: cut at the
/// first NUL, `%` doubled.
pub fn format_safe(text: &str) -> String {
    let text = match text.find('\0') {
        Some(end) => &text[..end],
        None => text,
    };
    text.replace('%', "%%")
}

/// NUL-terminated UTF-16 for the wide output functions.
pub fn to_wide_nul(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}
