//! Field extraction for AT information lines.
//!
//! Information lines look like `+CLCC: 1,1,4,0,0,"+15551234567",145`.
//! Fields are comma separated; quoted fields may themselves contain
//! commas (SMS timestamps, USSD text), so splitting is quote-aware.
//!
//! String parameters and SMS text follow the character set selected with
//! `AT+CSCS`.  Under `"UCS2"` every character travels as four hex digits
//! of its UTF-16 code unit, which is how non-ASCII text is carried in
//! text mode.

use core::str::FromStr;

use crate::error::Error;

/// The text after `prefix` (e.g. `"+CSQ:"`), with leading spaces removed.
pub fn payload<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix).map(str::trim_start)
}

/// Split a payload into raw fields.  Quotes are kept; see [`unquote`].
pub fn split(payload: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut in_quote = false;
    let mut start = 0;
    for (i, c) in payload.char_indices() {
        match c {
            '"' => in_quote = !in_quote,
            ',' if !in_quote => {
                fields.push(payload[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if !payload.is_empty() {
        fields.push(payload[start..].trim());
    }
    fields
}

/// Strip one pair of surrounding double quotes, if present.
pub fn unquote(field: &str) -> &str {
    field
        .strip_prefix('"')
        .and_then(|f| f.strip_suffix('"'))
        .unwrap_or(field)
}

/// Whether the field was sent quoted.
pub fn is_quoted(field: &str) -> bool {
    field.len() >= 2 && field.starts_with('"') && field.ends_with('"')
}

/// Field `idx` (0-based), unquoted.
pub fn text(fields: &[&str], idx: usize) -> Result<String, Error> {
    fields
        .get(idx)
        .map(|f| unquote(f).to_owned())
        .ok_or(Error::Parse("missing field"))
}

/// Field `idx` (0-based), parsed as a number.
pub fn number<T: FromStr>(fields: &[&str], idx: usize) -> Result<T, Error> {
    let raw = fields.get(idx).ok_or(Error::Parse("missing field"))?;
    unquote(raw).parse().map_err(|_| Error::Parse("bad number"))
}

/// Upper-case hex encoding of each byte (USSD codes in hex mode).
pub fn to_hex(data: &str) -> String {
    use core::fmt::Write;
    let mut out = String::with_capacity(data.len() * 2);
    for b in data.bytes() {
        let _ = write!(out, "{b:02X}");
    }
    out
}

/// Inverse of [`to_hex`].  `None` for odd length or non-hex digits.
pub fn from_hex(data: &str) -> Option<String> {
    if data.len() % 2 != 0 {
        return None;
    }
    let bytes = data
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let pair = core::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect::<Option<Vec<u8>>>()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Text-mode character set (`AT+CSCS`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Gsm,
    Ucs2,
}

impl Charset {
    /// Cheapest set that carries `text` unchanged.
    pub fn for_text(text: &str) -> Self {
        if is_gsm_text(text) {
            Self::Gsm
        } else {
            Self::Ucs2
        }
    }

    /// The `AT+CSCS` command selecting this set.
    pub fn select_command(self) -> &'static str {
        match self {
            Self::Gsm => "AT+CSCS=\"GSM\"",
            Self::Ucs2 => "AT+CSCS=\"UCS2\"",
        }
    }

    /// Inverse of [`select_command`](Self::select_command).
    pub fn from_command(command: &str) -> Option<Self> {
        match command {
            "AT+CSCS=\"GSM\"" => Some(Self::Gsm),
            "AT+CSCS=\"UCS2\"" => Some(Self::Ucs2),
            _ => None,
        }
    }

    /// SMS data coding scheme for `AT+CSMP` (0 = 7-bit default, 8 = UCS2).
    pub fn coding_scheme(self) -> u8 {
        match self {
            Self::Gsm => 0,
            Self::Ucs2 => 8,
        }
    }

    pub fn encode(self, text: &str) -> String {
        match self {
            Self::Gsm => text.to_owned(),
            Self::Ucs2 => to_ucs2_hex(text),
        }
    }

    /// Text the modem sent under this set.  Fields the modem left plain
    /// come back as they are.
    pub fn decode(self, text: &str) -> String {
        match self {
            Self::Gsm => text.to_owned(),
            Self::Ucs2 => from_ucs2_hex(text).unwrap_or_else(|| text.to_owned()),
        }
    }
}

/// Text that survives the GSM default alphabet in text mode.
pub fn is_gsm_text(text: &str) -> bool {
    text.chars()
        .all(|c| matches!(c, '\n' | '\r' | ' '..='~') && c != '`')
}

/// Four upper-case hex digits per UTF-16 code unit.
pub fn to_ucs2_hex(text: &str) -> String {
    use core::fmt::Write;
    let mut out = String::with_capacity(text.len() * 4);
    for unit in text.encode_utf16() {
        let _ = write!(out, "{unit:04X}");
    }
    out
}

/// Inverse of [`to_ucs2_hex`].  `None` unless the input is whole groups of
/// four hex digits forming valid UTF-16.
pub fn from_ucs2_hex(data: &str) -> Option<String> {
    if data.is_empty() || data.len() % 4 != 0 || !data.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let units = data
        .as_bytes()
        .chunks(4)
        .map(|quad| {
            let quad = core::str::from_utf8(quad).ok()?;
            u16::from_str_radix(quad, 16).ok()
        })
        .collect::<Option<Vec<u16>>>()?;
    char::decode_utf16(units).collect::<Result<String, _>>().ok()
}
