// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Metadata string decoding.
//
// LPR peers predate UTF-8 and routinely send queue names, user names and
// file names in whatever legacy code page the sending host happens to use.
// Valid UTF-8 passes through untouched; anything else is decoded with a
// configurable fallback encoding so the original value is preserved rather
// than silently corrupted.  File *contents* are never decoded.

use encoding_rs::Encoding;

use spoolwerk_core::{LpdError, Result};

/// Decoder applied to non-UTF-8 metadata values.
#[derive(Debug, Clone, Copy)]
pub struct FallbackDecoder {
    encoding: &'static Encoding,
}

impl FallbackDecoder {
    /// Resolve a decoder from an IANA/WHATWG encoding label
    /// (e.g. "windows-1252", "windows-1251", "iso-8859-1").
    pub fn for_label(label: &str) -> Result<Self> {
        let encoding = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| LpdError::Encoding(label.to_owned()))?;
        Ok(Self { encoding })
    }

    /// Decode a metadata value: UTF-8 as-is, otherwise via the fallback
    /// encoding.  Bytes the fallback encoding leaves undefined become
    /// U+FFFD, matching how legacy printers render them.
    pub fn decode(&self, value: &[u8]) -> String {
        match std::str::from_utf8(value) {
            Ok(s) => s.to_owned(),
            Err(_) => self
                .encoding
                .decode_without_bom_handling(value)
                .0
                .into_owned(),
        }
    }
}

impl Default for FallbackDecoder {
    fn default() -> Self {
        Self {
            encoding: encoding_rs::WINDOWS_1252,
        }
    }
}
