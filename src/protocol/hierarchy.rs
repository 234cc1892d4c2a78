// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Schema trees of outputs and parameters.
//!
//! The remote process describes its outputs and parameters as a recursive
//! [`Hierarchy`]. The link only needs the flattened form: every reachable
//! dot-separated path mapped to the name of its type.
//!
//! ```text
//! {"type":"Struct","fields":{"a":{"type":"Vec","nested":{"type":"Primary","name":"f32"}}}}
//!                                     ↓ flatten("root")
//! root   → GenericStruct
//! root.a → Vec<f32>
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ParseError;

/// Flattened schema: path → type name.
pub type PathTypes = BTreeMap<String, String>;

const GENERIC_STRUCT: &str = "GenericStruct";

/// One node of a schema tree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum Hierarchy {
    /// A leaf value with a named type.
    Primary {
        /// Type name, e.g. `f32`.
        name: String,
    },
    /// A struct with named fields.
    Struct {
        /// Field name → schema of the field.
        fields: BTreeMap<String, Hierarchy>,
    },
    /// A struct whose fields are not described.
    GenericStruct,
    /// An optional value.
    Option {
        /// Schema of the contained value.
        nested: Box<Hierarchy>,
    },
    /// A sequence of values.
    Vec {
        /// Schema of the elements.
        nested: Box<Hierarchy>,
    },
}

impl Hierarchy {
    /// Flattens the tree below `prefix` into a path → type map.
    ///
    /// A struct at a non-empty prefix also lists itself as `GenericStruct`.
    /// `Option` and `Vec` add no paths of their own; they wrap the type names
    /// of everything below them.
    #[must_use]
    pub fn flatten(&self, prefix: &str) -> PathTypes {
        let mut types = PathTypes::new();
        self.flatten_into(prefix, &mut types);
        types
    }

    fn flatten_into(&self, prefix: &str, types: &mut PathTypes) {
        match self {
            Self::Primary { name } => {
                types.insert(prefix.to_string(), name.clone());
            }
            Self::Struct { fields } => {
                if !prefix.is_empty() {
                    types.insert(prefix.to_string(), GENERIC_STRUCT.to_string());
                }
                for (name, field) in fields {
                    field.flatten_into(&join(prefix, name), types);
                }
            }
            Self::GenericStruct => {
                types.insert(prefix.to_string(), GENERIC_STRUCT.to_string());
            }
            Self::Option { nested } => wrap_nested(nested, prefix, "Option", types),
            Self::Vec { nested } => wrap_nested(nested, prefix, "Vec", types),
        }
    }
}

fn wrap_nested(nested: &Hierarchy, prefix: &str, wrapper: &str, types: &mut PathTypes) {
    for (path, name) in nested.flatten(prefix) {
        types.insert(path, format!("{wrapper}<{name}>"));
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Parses and flattens the hierarchy carried in a response field.
///
/// The field holds an object of top-level names to [`Hierarchy`] nodes and
/// is flattened like a struct at the root, so top-level names become the
/// first path segment.
///
/// # Errors
///
/// Returns `ParseError::MissingField` if the field is absent and
/// `ParseError::Json` if it does not follow the hierarchy grammar.
pub fn parse_path_types(
    payload: &Map<String, Value>,
    field: &'static str,
) -> Result<PathTypes, ParseError> {
    let value = payload.get(field).ok_or(ParseError::MissingField(field))?;
    let fields: BTreeMap<String, Hierarchy> = serde_json::from_value(value.clone())?;
    Ok(Hierarchy::Struct { fields }.flatten(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Hierarchy {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn struct_below_prefix() {
        let hierarchy = parse(json!({
            "type": "Struct",
            "fields": {"a": {"type": "Primary", "name": "f32"}}
        }));
        let types = hierarchy.flatten("root");
        assert_eq!(
            types,
            PathTypes::from([
                ("root".to_string(), "GenericStruct".to_string()),
                ("root.a".to_string(), "f32".to_string()),
            ])
        );
    }

    #[test]
    fn struct_at_root_lists_only_fields() {
        let hierarchy = parse(json!({
            "type": "Struct",
            "fields": {"a": {"type": "Primary", "name": "bool"}}
        }));
        assert_eq!(
            hierarchy.flatten(""),
            PathTypes::from([("a".to_string(), "bool".to_string())])
        );
    }

    #[test]
    fn option_and_vec_wrap_without_new_paths() {
        let hierarchy = parse(json!({
            "type": "Option",
            "nested": {
                "type": "Struct",
                "fields": {
                    "points": {"type": "Vec", "nested": {"type": "Primary", "name": "Point2"}},
                    "extra": {"type": "GenericStruct"}
                }
            }
        }));
        let types = hierarchy.flatten("ball");
        assert_eq!(types.len(), 3);
        assert_eq!(types["ball"], "Option<GenericStruct>");
        assert_eq!(types["ball.points"], "Option<Vec<Point2>>");
        assert_eq!(types["ball.extra"], "Option<GenericStruct>");
    }

    #[test]
    fn generic_struct_leaf() {
        let hierarchy = parse(json!({"type": "GenericStruct"}));
        assert_eq!(
            hierarchy.flatten("x"),
            PathTypes::from([("x".to_string(), "GenericStruct".to_string())])
        );
    }

    #[test]
    fn parse_path_types_from_payload() {
        let payload = json!({
            "output_hierarchy": {
                "control": {
                    "type": "Struct",
                    "fields": {"step": {"type": "Primary", "name": "u32"}}
                }
            }
        });
        let Value::Object(payload) = payload else {
            unreachable!()
        };
        let types = parse_path_types(&payload, "output_hierarchy").unwrap();
        assert_eq!(types["control"], "GenericStruct");
        assert_eq!(types["control.step"], "u32");
    }

    #[test]
    fn parse_path_types_empty_and_missing() {
        let Value::Object(payload) = json!({"output_hierarchy": {}}) else {
            unreachable!()
        };
        let types = parse_path_types(&payload, "output_hierarchy").unwrap();
        assert!(types.is_empty());
        assert!(matches!(
            parse_path_types(&payload, "parameter_hierarchy"),
            Err(ParseError::MissingField("parameter_hierarchy"))
        ));
    }

    #[test]
    fn parse_path_types_rejects_unknown_node() {
        let Value::Object(payload) = json!({"output_hierarchy": {"a": {"type": "Tuple"}}}) else {
            unreachable!()
        };
        assert!(matches!(
            parse_path_types(&payload, "output_hierarchy"),
            Err(ParseError::Json(_))
        ));
    }
}
