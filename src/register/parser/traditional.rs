//! Traditional, line-oriented `.map` dialect.
//!
//! ```text
//! # comment
//! @METADATA_NAME value
//! path nElems address nBytes bar [width [nFracBits [signed [access [type [interruptId]]]]]]
//! ```

use std::collections::HashMap;

use crate::error::{CoreError, Result};
use crate::register::catalogue::{parse_number, RegisterCatalogue};
use crate::register::info::{AccessMode, ChannelInfo, DataType, RegisterInfo};

const AREA_MULTIPLEXED_PREFIX: &str = "AREA_MULTIPLEXED_SEQUENCE_";
const MEM_MULTIPLEXED_PREFIX: &str = "MEM_MULTIPLEXED_";
const SEQUENCE_PREFIX: &str = "SEQUENCE_";

#[derive(Debug, Clone)]
struct RawLine {
    line_no: usize,
    path: String,
    n_elements: usize,
    address: u64,
    n_bytes: u64,
    bar: u64,
    width: Option<u8>,
    n_fractional_bits: Option<i32>,
    signed: Option<bool>,
    access: Option<AccessMode>,
    data_type: Option<DataType>,
    interrupt_id: Vec<u32>,
}

fn parse_access(token: &str) -> Result<AccessMode> {
    match token {
        "RO" => Ok(AccessMode::ReadOnly),
        "WO" => Ok(AccessMode::WriteOnly),
        "RW" => Ok(AccessMode::ReadWrite),
        "INTERRUPT" => Ok(AccessMode::Interrupt),
        other => Err(CoreError::logic(format!("unknown access mode '{other}'"))),
    }
}

fn parse_data_type(token: &str) -> Result<DataType> {
    match token {
        "FIXED_POINT" => Ok(DataType::FixedPoint),
        "IEEE754" => Ok(DataType::IEEE754),
        "ASCII" => Ok(DataType::ASCII),
        other => Err(CoreError::logic(format!("unknown register type '{other}'"))),
    }
}

fn parse_interrupt_id(token: &str) -> Result<Vec<u32>> {
    let rest = token
    .strip_prefix("INTERRUPT")
    .ok_or_else(|| CoreError::logic(format!("malformed interrupt id token '{token}'")))?;
    rest.split(':')
    .map(|part| {
            part.parse::<u32>()
            .map_err(|_| CoreError::logic(format!("malformed interrupt id token '{token}'")))
    })
    .collect()
}

fn parse_line(line_no: usize, line: &str) -> Result<RawLine> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 5 {
        return Err(CoreError::logic(format!(
                    "line {line_no}: expected at least 5 fields, got {}",
                    tokens.len()
        )));
    }

    let path = tokens[0].to_string();
    let n_elements = tokens[1]
    .parse::<usize>()
    .map_err(|_| CoreError::logic(format!("line {line_no}: bad nElements")))?;
    let address = parse_number(tokens[2])
    .ok_or_else(|| CoreError::logic(format!("line {line_no}: bad address")))?;
    let n_bytes = parse_number(tokens[3])
    .ok_or_else(|| CoreError::logic(format!("line {line_no}: bad nBytes")))?;
    let bar = parse_number(tokens[4])
    .ok_or_else(|| CoreError::logic(format!("line {line_no}: bad bar")))?;

    let width = tokens
    .get(5)
    .map(|t| t.parse::<u8>().map_err(|_| CoreError::logic(format!("line {line_no}: bad width"))))
    .transpose()?;
    let n_fractional_bits = tokens
    .get(6)
    .map(|t| {
            t.parse::<i32>()
            .map_err(|_| CoreError::logic(format!("line {line_no}: bad nFractionalBits")))
    })
    .transpose()?;
    let signed = tokens
    .get(7)
    .map(|t| match *t {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(CoreError::logic(format!("line {line_no}: bad signed flag '{other}'"))),
    })
    .transpose()?;
    let access = tokens.get(8).map(|t| parse_access(t)).transpose()?;
    let data_type = tokens.get(9).map(|t| parse_data_type(t)).transpose()?;
    let interrupt_id = tokens
    .get(10)
    .map(|t| parse_interrupt_id(t))
    .transpose()?
    .unwrap_or_default();

    Ok(RawLine {
            line_no,
            path,
            n_elements,
            address,
            n_bytes,
            bar,
            width,
            n_fractional_bits,
            signed,
            access,
            data_type,
            interrupt_id,
    })
}

fn channel_from(line: &RawLine) -> Result<ChannelInfo> {
    let raw_type_bits = (line.n_bytes.max(1) * 8).min(64) as u8;
    let width = line.width.unwrap_or(raw_type_bits);
    let data_type = line.data_type.unwrap_or(DataType::FixedPoint);
    let channel = ChannelInfo {
        bit_offset: 0,
        data_type,
        width,
        n_fractional_bits: line.n_fractional_bits.unwrap_or(0),
        signed: line.signed.unwrap_or(true),
        raw_type: raw_type_bits,
    };
    channel.validate()?;
    Ok(channel)
}

fn register_from_scalar_line(line: &RawLine) -> Result<RegisterInfo> {
    let channel = channel_from(line)?;
    let access = line.access.unwrap_or(AccessMode::ReadWrite);
    let element_pitch_bits = if line.n_elements > 0 {
        (line.n_bytes * 8 / line.n_elements as u64) as u32
    } else {
        (line.n_bytes * 8) as u32
    };

    let info = RegisterInfo {
        path: line.path.clone(),
        n_elements: line.n_elements,
        element_pitch_bits,
        bar: line.bar,
        address: line.address,
        access,
        interrupt_id: line.interrupt_id.clone(),
        channels: vec![channel],
        double_buffer: None,
    };
    info.validate()?;
    Ok(info)
}

/// Splits `path` into `(parent, name)` on the last `/`.
fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

fn multiplexed_group_name(name: &str) -> Option<&str> {
    name.strip_prefix(AREA_MULTIPLEXED_PREFIX)
    .or_else(|| name.strip_prefix(MEM_MULTIPLEXED_PREFIX))
}

/// Parses `SEQUENCE_<name>_<i>` into `(name, i)`.
fn sequence_name_index(name: &str) -> Option<(&str, usize)> {
    let rest = name.strip_prefix(SEQUENCE_PREFIX)?;
    let (group, idx_str) = rest.rsplit_once('_')?;
    let idx: usize = idx_str.parse().ok()?;
    Some((group, idx))
}

pub fn parse(text: &str) -> Result<RegisterCatalogue> {
    let mut metadata: HashMap<String, String> = HashMap::new();
    let mut header_lines: Vec<RawLine> = Vec::new();
    // group_name -> (parent path, Vec<(index, RawLine)>)
    let mut sequence_lines: HashMap<String, (String, Vec<(usize, RawLine)>)> = HashMap::new();

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(meta) = trimmed.strip_prefix('@') {
            let mut parts = meta.splitn(2, char::is_whitespace);
            let name = parts.next().unwrap_or_default().trim();
            let value = parts.next().unwrap_or_default().trim();
            metadata.insert(name.to_string(), value.to_string());
            continue;
        }

        let parsed = parse_line(line_no, trimmed)?;
        let (parent, name) = split_path(&parsed.path);

        if let Some((group, idx)) = sequence_name_index(name) {
            sequence_lines
            .entry(format!("{parent}/{group}"))
            .or_insert_with(|| (parent.to_string(), Vec::new()))
            .1
            .push((idx, parsed));
            continue;
        }

        header_lines.push(parsed);
    }

    let mut catalogue = RegisterCatalogue::new();
    for (key, value) in metadata {
        catalogue.set_metadata(key, value);
    }

    for line in &header_lines {
        let (_, name) = split_path(&line.path);
        if let Some(group) = multiplexed_group_name(name) {
            let (parent, _) = split_path(&line.path);
            let key = format!("{parent}/{group}");
            let Some((_, mut members)) = sequence_lines.remove(&key) else {
                return Err(CoreError::logic(format!(
                            "multiplexed register {} has no SEQUENCE_{}_<i> members",
                            line.path, group
                )));
            };
            members.sort_by_key(|(i, _)| *i);

            let mut channels = Vec::with_capacity(members.len());
            let mut running_bit_offset = 0u32;
            for (_, member) in &members {
                let mut channel = channel_from(member)?;
                channel.bit_offset = running_bit_offset;
                running_bit_offset += channel.raw_type as u32;
                channels.push(channel);
            }

            let element_pitch_bits = running_bit_offset;
            let info = RegisterInfo {
                path: line.path.clone(),
                n_elements: line.n_elements,
                element_pitch_bits,
                bar: line.bar,
                address: line.address,
                access: line.access.unwrap_or(AccessMode::ReadWrite),
                interrupt_id: line.interrupt_id.clone(),
                channels,
                double_buffer: None,
            };
            info.validate()?;
            catalogue.add_register(info)?;
        } else {
            catalogue.add_register(register_from_scalar_line(line)?)?;
        }
    }

    if let Some((group, _)) = sequence_lines.into_iter().next() {
        return Err(CoreError::logic(format!(
                    "SEQUENCE_ lines for group '{group}' have no matching AREA_MULTIPLEXED_SEQUENCE_/MEM_MULTIPLEXED_ header"
        )));
    }

    Ok(catalogue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalar_register() {
        let text = "# a comment\n@FIRMWARE 1.2.3\n/APP/SCALAR 1 0x1000 4 0 32 0 1 RW FIXED_POINT\n";
        let cat = parse(text).unwrap();
        assert_eq!(cat.metadata().get("FIRMWARE").unwrap(), "1.2.3");
        let info = cat.get_backend_register("/APP/SCALAR").unwrap();
        assert_eq!(info.address, 0x1000);
        assert_eq!(info.channels[0].width, 32);
        assert_eq!(info.channels[0].signed, true);
    }

    #[test]
    fn parses_multiplexed_register() {
        let text = "\
        /APP/AREA_MULTIPLEXED_SEQUENCE_DATA 4 0x2000 32 0\n\
        /APP/SEQUENCE_DATA_0 0 0 4 0 16 0 1\n\
        /APP/SEQUENCE_DATA_1 0 0 4 0 32 0 0\n";
        let cat = parse(text).unwrap();
        let info = cat
        .get_backend_register("/APP/AREA_MULTIPLEXED_SEQUENCE_DATA")
        .unwrap();
        assert_eq!(info.channels.len(), 2);
        assert_eq!(info.channels[0].bit_offset, 0);
        assert_eq!(info.channels[1].bit_offset, 16);
    }

    #[test]
    fn rejects_non_byte_aligned_pitch() {
        let text = "/APP/BAD 3 0x0 10 0 8\n";
        assert!(parse(text).is_err());
    }

    #[test]
    fn rejects_duplicate_paths() {
        let text = "/APP/X 1 0 4 0\n/APP/X 1 0 4 0\n";
        assert!(parse(text).is_err());
    }
}
