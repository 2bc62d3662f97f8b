//! The JSON schema the extraction service is asked to satisfy.
//!
//! Strict structured output needs every property listed in `required` and
//! `additionalProperties: false` at every object level, so optional bullet
//! fields are still required here and sent as empty strings.

use crate::error::SubmittalError;
use crate::output::SubmittalType;
use serde_json::{json, Value};
use std::path::Path;

/// Schema for `{"bullets": [Bullet, …]}`.
pub fn default_schema() -> Value {
    let types: Vec<&str> = SubmittalType::ALL.iter().map(|t| t.as_str()).collect();
    json!({
        "type": "object",
        "properties": {
            "bullets": {
                "type": "array",
                "description": "Every submittal requirement in document order, parents before children.",
                "items": {
                    "type": "object",
                    "properties": {
                        "spec_section": {
                            "type": "string",
                            "description": "CSI section number, e.g. \"12 24 13\"."
                        },
                        "section_title": {
                            "type": "string",
                            "description": "Section title, e.g. \"Roller Window Shades\"."
                        },
                        "article_number": {
                            "type": "string",
                            "description": "Article containing the requirement, e.g. \"1.3\"."
                        },
                        "submittal_type": {
                            "type": "string",
                            "enum": types
                        },
                        "submittal_title": {
                            "type": "string",
                            "description": "Heading of the submittal item for level-1 bullets, e.g. \"Product Data\"; empty otherwise."
                        },
                        "text": {
                            "type": "string",
                            "description": "Requirement text, verbatim."
                        },
                        "id": {
                            "type": "string",
                            "description": "Identifier unique within this response."
                        },
                        "level": {
                            "type": "integer",
                            "minimum": 1,
                            "maximum": 4
                        },
                        "parent_id": {
                            "type": "string",
                            "description": "id of the enclosing bullet; empty for level 1."
                        }
                    },
                    "required": [
                        "spec_section",
                        "section_title",
                        "article_number",
                        "submittal_type",
                        "submittal_title",
                        "text",
                        "id",
                        "level",
                        "parent_id"
                    ],
                    "additionalProperties": false
                }
            }
        },
        "required": ["bullets"],
        "additionalProperties": false
    })
}

/// Load a schema override from a JSON file.
pub fn load_schema_file(path: &Path) -> Result<Value, SubmittalError> {
    let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => SubmittalError::FileNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => SubmittalError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => SubmittalError::InvalidConfig(format!("cannot read schema {}: {e}", path.display())),
    })?;
    let value: Value = serde_json::from_str(&text).map_err(|e| {
        SubmittalError::InvalidConfig(format!("schema {} is not valid JSON: {e}", path.display()))
    })?;
    if !value.is_object() {
        return Err(SubmittalError::InvalidConfig(format!(
            "schema {} must be a JSON object",
            path.display()
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_schema_is_strict() {
        let s = default_schema();
        assert_eq!(s["additionalProperties"], false);
        let item = &s["properties"]["bullets"]["items"];
        assert_eq!(item["additionalProperties"], false);
        let props = item["properties"].as_object().unwrap();
        let required = item["required"].as_array().unwrap();
        assert_eq!(props.len(), required.len());
        assert_eq!(item["properties"]["submittal_type"]["enum"][4], "MAINTENANCE_MATERIAL");
    }

    #[test]
    fn schema_file_must_be_object() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "[1, 2]").unwrap();
        assert!(matches!(
            load_schema_file(f.path()),
            Err(SubmittalError::InvalidConfig(_))
        ));
        assert!(matches!(
            load_schema_file(Path::new("/no/such/schema.json")),
            Err(SubmittalError::FileNotFound { .. })
        ));
    }
}
