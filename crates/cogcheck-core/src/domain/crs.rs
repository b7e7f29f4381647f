//! Coordinate reference systems identified by `AUTHORITY:CODE`.
//!
//! Textual encodings (plain codes, OGC URNs and URLs, WKT with a top-level
//! authority) all normalize to the same identity so two spellings of one CRS
//! compare equal.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Crs {
    authority: String,
    code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized coordinate reference system '{0}'")]
pub struct CrsParseError(pub String);

impl Crs {
    pub fn new(authority: &str, code: &str) -> Option<Self> {
        let authority = authority.trim().trim_matches('"').to_ascii_uppercase();
        let code = code.trim().trim_matches('"');
        if authority.is_empty() || code.is_empty() {
            return None;
        }

        let code = match code.parse::<u32>() {
            Ok(numeric) => numeric.to_string(),
            Err(_) => code.to_ascii_uppercase(),
        };
        Some(Self { authority, code })
    }

    pub fn epsg(code: u32) -> Self {
        Self {
            authority: "EPSG".to_string(),
            code: code.to_string(),
        }
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn epsg_code(&self) -> Option<u32> {
        if self.authority == "EPSG" {
            self.code.parse().ok()
        } else {
            None
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let lowered = text.to_ascii_lowercase();
        if lowered.starts_with("urn:ogc:def:crs:") {
            return parse_ogc_urn(&text["urn:ogc:def:crs:".len()..]);
        }
        if let Some(index) = lowered.find("/def/crs/") {
            return parse_ogc_url(&text[index + "/def/crs/".len()..]);
        }
        if text.contains('[') {
            return parse_wkt_authority(text);
        }

        let (authority, code) = text.split_once(':')?;
        if code.contains(':') {
            return None;
        }
        Self::new(authority, code)
    }
}

impl Display for Crs {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.authority, self.code)
    }
}

impl FromStr for Crs {
    type Err = CrsParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::parse(text).ok_or_else(|| CrsParseError(text.to_string()))
    }
}

impl Serialize for Crs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Crs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// EPSG::4326 or EPSG:9.8.1:4326
fn parse_ogc_urn(rest: &str) -> Option<Crs> {
    let parts = rest.split(':').collect::<Vec<_>>();
    if parts.len() < 2 {
        return None;
    }
    Crs::new(parts[0], parts[parts.len() - 1])
}

// EPSG/0/4326
fn parse_ogc_url(rest: &str) -> Option<Crs> {
    let parts = rest
        .trim_end_matches('/')
        .split('/')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>();
    match parts.as_slice() {
        [authority, _version, code] => Crs::new(authority, code),
        [authority, code] => Crs::new(authority, code),
        _ => None,
    }
}

/// Reads the authority node that belongs to the outermost WKT object
/// (`AUTHORITY["EPSG","4326"]` in WKT1, `ID["EPSG",4326]` in WKT2).
fn parse_wkt_authority(text: &str) -> Option<Crs> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut keyword_start: Option<usize> = None;
    let mut found: Option<(usize, usize)> = None;

    for (index, &byte) in bytes.iter().enumerate() {
        if byte == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if in_quotes {
            continue;
        }

        match byte {
            b'[' | b'(' => {
                if depth == 1 {
                    if let Some(start) = keyword_start {
                        let keyword = text[start..index].trim().to_ascii_uppercase();
                        if keyword == "AUTHORITY" || keyword == "ID" {
                            found = Some((index + 1, 0));
                        }
                    }
                }
                depth += 1;
                keyword_start = None;
            }
            b']' | b')' => {
                if depth == 2 {
                    if let Some((start, 0)) = found {
                        found = Some((start, index));
                    }
                }
                depth = depth.saturating_sub(1);
                keyword_start = None;
            }
            b',' => keyword_start = None,
            _ if byte.is_ascii_alphanumeric() || byte == b'_' => {
                if keyword_start.is_none() {
                    keyword_start = Some(index);
                }
            }
            _ => {}
        }
    }

    let (start, end) = found.filter(|(_, end)| *end > 0)?;
    let mut fields = text[start..end].split(',');
    let authority = fields.next()?;
    let code = fields.next()?;
    Crs::new(authority, code)
}
