// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! Pulls the structured payload out of a free-form model response.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

/// Returns the first balanced `{...}` region of `text`.
///
/// Braces inside JSON string literals are not counted. Scanning starts at the
/// first `{`; if that region never closes there is no object.
pub fn find_object_region(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses the first balanced object region as JSON. No repair is attempted.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let region = find_object_region(text)?;
    match serde_json::from_str::<Value>(region) {
        Ok(value @ Value::Object(_)) => Some(value),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "Object-like region failed to parse");
            None
        }
    }
}

/// Interprets a response as the payload type `T`.
///
/// `None` means no usable object was found; callers substitute their stage's
/// fallback.
pub fn parse_payload<T: DeserializeOwned>(text: &str) -> Option<T> {
    let value = extract_json_object(text)?;
    match serde_json::from_value(value) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(
                error = %e,
                payload = std::any::type_name::<T>(),
                "Response object did not match the expected payload shape"
            );
            None
        }
    }
}
