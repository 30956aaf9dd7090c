//! Map-file parsing: two dialects selected by filename
//! extension, `.jmap` for JSON, anything else for the traditional
//! line-oriented dialect.

pub mod json;
pub mod traditional;

use std::path::Path;

use crate::error::Result;
use crate::register::catalogue::RegisterCatalogue;

/// Parses `path` with the dialect selected by its extension. Metadata is
/// folded into the returned catalogue (`RegisterCatalogue::metadata`).
pub fn parse_map_file(path: &Path) -> Result<RegisterCatalogue> {
    let is_json = path
    .extension()
    .map(|ext| ext.eq_ignore_ascii_case("jmap"))
    .unwrap_or(false);

    let text = std::fs::read_to_string(path).map_err(|e| {
            crate::error::CoreError::logic(format!("cannot read map file {}: {e}", path.display()))
    })?;

    if is_json {
        json::parse(&text)
    } else {
        traditional::parse(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();

        let map_path = dir.path().join("device.map");
        let mut map_file = std::fs::File::create(&map_path).unwrap();
        writeln!(map_file, "/APP/SCALAR 1 0x1000 4 0 32 0 1 RW FIXED_POINT").unwrap();
        let catalogue = parse_map_file(&map_path).unwrap();
        assert!(catalogue.get_backend_register("/APP/SCALAR").is_some());

        let jmap_path = dir.path().join("device.jmap");
        std::fs::write(
            &jmap_path,
            r#"{
                "addressSpace": {
                    "children": {
                        "SCALAR": {
                            "address": { "type": "IO", "channel": 0, "offset": 4096 },
                            "representation": { "type": "FIXED_POINT", "width": 32 }
                        }
                    }
                }
            }"#,
        )
        .unwrap();
        let catalogue = parse_map_file(&jmap_path).unwrap();
        assert!(catalogue.get_backend_register("/SCALAR").is_some());
    }

    #[test]
    fn reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nonexistent.map");
        assert!(parse_map_file(&missing).is_err());
    }
}
