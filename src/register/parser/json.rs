//! JSON `.jmap` dialect.
//!
//! ```json
//! {
//! "addressSpace": { "children": { "name": { "address": {...}, "representation": {...}, "children": {...} } } },
//! "metadata": { "key": "value" },
//! "interruptHandler": { ... }
//! }
//! ```

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{CoreError, Result};
use crate::register::catalogue::RegisterCatalogue;
use crate::register::info::{AccessMode, ChannelInfo, DataType, RegisterInfo};

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(rename = "addressSpace")]
    address_space: Value,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(rename = "interruptHandler", default)]
    interrupt_handler: Value,
}

#[derive(Debug, Deserialize, Default)]
struct AddressBlock {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    channel: Option<u64>,
    #[serde(default)]
    offset: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
struct RepresentationBlock {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    width: Option<u8>,
    #[serde(rename = "fractionalBits", default)]
    fractional_bits: Option<i32>,
    #[serde(rename = "isSigned", default)]
    is_signed: Option<bool>,
}

fn numeric_offset(value: &Value) -> Result<u64> {
    match value {
        Value::Number(n) => n
        .as_u64()
        .ok_or_else(|| CoreError::logic("JSON offset is not a non-negative integer".to_string())),
        Value::String(s) => crate::register::catalogue::parse_number(s)
        .ok_or_else(|| CoreError::logic(format!("JSON offset '{s}' is not a valid integer"))),
        other => Err(CoreError::logic(format!(
                    "JSON offset must be a number or hex string, got {other}"
        ))),
    }
}

fn parse_data_type(kind: &str) -> Result<DataType> {
    match kind {
        "FIXED_POINT" => Ok(DataType::FixedPoint),
        "IEEE754" => Ok(DataType::IEEE754),
        "ASCII" => Ok(DataType::ASCII),
        other => Err(CoreError::logic(format!("unknown representation type '{other}'"))),
    }
}

fn walk(
    node: &Value,
    path: &str,
    catalogue: &mut RegisterCatalogue,
) -> Result<()> {
    let obj = node
    .as_object()
    .ok_or_else(|| CoreError::logic(format!("JSON entry at '{path}' is not an object")))?;

    let address: Option<AddressBlock> = obj
    .get("address")
    .map(|v| serde_json::from_value(v.clone()))
    .transpose()
    .map_err(|e| CoreError::logic(format!("JSON entry '{path}': bad address block: {e}")))?;
    let representation: Option<RepresentationBlock> = obj
    .get("representation")
    .map(|v| serde_json::from_value(v.clone()))
    .transpose()
    .map_err(|e| CoreError::logic(format!("JSON entry '{path}': bad representation block: {e}")))?;
    let triggered_by_interrupt = obj
    .get("triggeredByInterrupt")
    .and_then(Value::as_bool)
    .unwrap_or(false);

    if address.is_some() && triggered_by_interrupt {
        return Err(CoreError::logic(format!(
                    "JSON entry '{path}' declares both an address and triggeredByInterrupt"
        )));
    }

    if let Some(addr) = address {
        let repr = representation.unwrap_or_default();
        let width = repr.width.unwrap_or(32);
        let n_fractional_bits = repr.fractional_bits.unwrap_or(0);
        let signed = repr.is_signed.unwrap_or(true);
        let data_type = match &repr.kind {
            Some(kind) => parse_data_type(kind)?,
            None => DataType::FixedPoint,
        };

        let channel = ChannelInfo {
            bit_offset: 0,
            data_type,
            width,
            n_fractional_bits,
            signed,
            raw_type: width.max(8),
        };
        channel.validate()?;

        let offset = addr
        .offset
        .as_ref()
        .map(numeric_offset)
        .transpose()?
        .unwrap_or(0);
        let bar = match addr.kind.as_deref() {
            Some("DMA") => 13,
            _ => addr.channel.unwrap_or(0),
        };

        let info = RegisterInfo {
            path: path.to_string(),
            n_elements: 1,
            element_pitch_bits: (width.max(8) as u32).div_ceil(8) * 8,
            bar,
            address: offset,
            access: AccessMode::ReadWrite,
            interrupt_id: Vec::new(),
            channels: vec![channel],
            double_buffer: None,
        };
        info.validate()?;
        catalogue.add_register(info)?;
        return Ok(());
    }

    if triggered_by_interrupt {
        let info = RegisterInfo {
            path: path.to_string(),
            n_elements: 1,
            element_pitch_bits: 32,
            bar: 0,
            address: 0,
            access: AccessMode::Interrupt,
            interrupt_id: vec![0],
            channels: vec![ChannelInfo {
                    bit_offset: 0,
                    data_type: DataType::FixedPoint,
                    width: 32,
                    n_fractional_bits: 0,
                    signed: false,
                    raw_type: 32,
            }],
            double_buffer: None,
        };
        info.validate()?;
        catalogue.add_register(info)?;
    }

    if let Some(children) = obj.get("children").and_then(Value::as_object) {
        for (name, child) in children {
            let child_path = format!("{path}/{name}");
            walk(child, &child_path, catalogue)?;
        }
    }

    Ok(())
}

/// Flattens the `interruptHandler` subtree into metadata entries keyed by
/// the JSON-encoded interrupt path.
fn flatten_interrupt_handler(node: &Value, path_so_far: &[String], out: &mut HashMap<String, String>) {
    let Some(obj) = node.as_object() else { return };
    for (key, value) in obj {
        let mut path = path_so_far.to_vec();
        path.push(key.clone());
        if value.is_object() {
            flatten_interrupt_handler(value, &path, out);
        }
        let encoded = serde_json::to_string(&path).unwrap_or_default();
        out.insert(format!("interruptHandler:{encoded}"), value.to_string());
    }
}

pub fn parse(text: &str) -> Result<RegisterCatalogue> {
    let doc: Document = serde_json::from_str(text)
    .map_err(|e| CoreError::logic(format!("invalid JSON map file: {e}")))?;

    let mut catalogue = RegisterCatalogue::new();
    for (key, value) in &doc.metadata {
        catalogue.set_metadata(key, value);
    }

    walk(&doc.address_space, "", &mut catalogue)?;

    let mut interrupt_meta = HashMap::new();
    flatten_interrupt_handler(&doc.interrupt_handler, &[], &mut interrupt_meta);
    for (key, value) in interrupt_meta {
        catalogue.set_metadata(key, value);
    }

    Ok(catalogue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_address_space() {
        let text = r#"
        {
            "addressSpace": {
                "children": {
                    "APP": {
                        "children": {
                            "TEMP": {
                                "address": { "type": "IO", "channel": 0, "offset": "0x100" },
                                "representation": { "type": "FIXED_POINT", "width": 16, "fractionalBits": 4, "isSigned": true }
                            }
                        }
                    }
                }
            },
            "metadata": { "board": "rev3" }
        }
        "#;
        let cat = parse(text).unwrap();
        assert_eq!(cat.metadata().get("board").unwrap(), "rev3");
        let info = cat.get_backend_register("/APP/TEMP").unwrap();
        assert_eq!(info.address, 0x100);
        assert_eq!(info.channels[0].width, 16);
        assert_eq!(info.channels[0].n_fractional_bits, 4);
    }

    #[test]
    fn rejects_address_and_interrupt_together() {
        let text = r#"
        {
            "addressSpace": {
                "children": {
                    "BAD": {
                        "address": { "type": "IO", "channel": 0, "offset": 0 },
                        "triggeredByInterrupt": true
                    }
                }
            }
        }
        "#;
        assert!(parse(text).is_err());
    }

    #[test]
    fn interrupt_leaf_without_address() {
        let text = r#"
        {
            "addressSpace": {
                "children": {
                    "IRQ": { "triggeredByInterrupt": true }
                }
            }
        }
        "#;
        let cat = parse(text).unwrap();
        let info = cat.get_backend_register("/IRQ").unwrap();
        assert_eq!(info.access, AccessMode::Interrupt);
    }
}
