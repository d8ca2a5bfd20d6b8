//! Form-field decoding.
//!
//! Turns a raw `application/x-www-form-urlencoded` payload into the ordered
//! field list sent to workers as `form_env`.
//!
//! # Rules
//!
//! - Fields are separated by `&`; name and value by the first `=`.
//! - `+` is a space; `%XX` escapes decode to octets; every octet is read as a
//!   Latin-1 character.
//! - A field whose name ends in `_utf8` has its two-byte UTF-8 sequences for
//!   U+0080..U+00FF folded to the single Latin-1 octet, and loses the marker.
//! - Image-button coordinates: `name.x=v` yields `x=v` then `name=v`;
//!   `name.y=v` yields only `y=v`. Any other `.` in a name is rejected.

use std::borrow::Cow;

use crate::protocol::error::{RelayError, Result};
use crate::protocol::Env;

/// Name suffix asking for UTF-8 folding.
pub const UTF8_MARKER: &str = "_utf8";

/// Decodes a urlencoded payload into ordered `(name, value)` pairs.
///
/// # Example
///
/// ```
/// use cgirelay_common::form::decode_form;
///
/// let fields = decode_form("name=J%F6rg+M&submit.x=12").unwrap();
/// assert_eq!(fields[0], ("name".to_string(), "J\u{f6}rg M".to_string()));
/// assert_eq!(fields[1], ("x".to_string(), "12".to_string()));
/// assert_eq!(fields[2], ("submit".to_string(), "12".to_string()));
/// ```
pub fn decode_form(input: &str) -> Result<Env> {
    let mut fields = Vec::new();

    for pair in input.split('&').filter(|p| !p.is_empty()) {
        let (raw_name, raw_value) = pair.split_once('=').unwrap_or((pair, ""));

        let mut name = decode_component(raw_name);
        let mut value = decode_component(raw_value);

        if name.ends_with(UTF8_MARKER.as_bytes()) {
            name.truncate(name.len() - UTF8_MARKER.len());
            value = fold_utf8_latin1(&value);
        }

        let name = latin1_to_string(&name);
        let value = latin1_to_string(&value);
        push_field(&mut fields, name, value)?;
    }

    Ok(fields)
}

/// Percent-encodes fields into a urlencoded payload.
pub fn encode_form(fields: &[(String, String)]) -> String {
    fields
        .iter()
        .map(|(name, value)| {
            format!(
                "{}={}",
                urlencoding::encode(name),
                urlencoding::encode(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Removes every field called `name`, returning the first value.
pub fn take_field(fields: &mut Env, name: &str) -> Option<String> {
    let mut taken = None;
    fields.retain(|(k, v)| {
        if k == name {
            if taken.is_none() {
                taken = Some(v.clone());
            }
            false
        } else {
            true
        }
    });
    taken
}

/// Returns the first value of field `name`.
pub fn field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

fn push_field(fields: &mut Env, name: String, value: String) -> Result<()> {
    let Some((prefix, coordinate)) = name.rsplit_once('.') else {
        fields.push((name, value));
        return Ok(());
    };

    if prefix.contains('.') {
        return Err(RelayError::InvalidFormField(name));
    }

    match coordinate {
        "x" => {
            fields.push(("x".to_string(), value.clone()));
            fields.push((prefix.to_string(), value));
        }
        // Only the coordinate itself; the button name is pushed once, by `.x`.
        "y" => fields.push(("y".to_string(), value)),
        _ => return Err(RelayError::InvalidFormField(name)),
    }

    Ok(())
}

fn decode_component(raw: &str) -> Vec<u8> {
    let spaced: Cow<str> = if raw.contains('+') {
        Cow::Owned(raw.replace('+', " "))
    } else {
        Cow::Borrowed(raw)
    };
    urlencoding::decode_binary(spaced.as_bytes()).into_owned()
}

/// Folds `0xC2`/`0xC3` two-byte sequences to their Latin-1 octet.
fn fold_utf8_latin1(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let lead = bytes[i];
        if (lead == 0xC2 || lead == 0xC3) && i + 1 < bytes.len() {
            let cont = bytes[i + 1];
            if (0x80..=0xBF).contains(&cont) {
                out.push(((lead & 0x03) << 6) | (cont & 0x3F));
                i += 2;
                continue;
            }
        }
        out.push(lead);
        i += 1;
    }
    out
}

fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
