use serde_json::{Map, Value};

/// Body of a create/update call. Multipart is used as soon as a file is
/// attached.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Multipart(MultipartForm),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultipartForm {
    pub fields: Vec<(String, String)>,
    pub files: Vec<FilePart>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl RequestBody {
    pub fn from_fields(fields: &Map<String, Value>, files: Vec<FilePart>) -> Self {
        if files.is_empty() {
            return RequestBody::Json(Value::Object(fields.clone()));
        }

        let mut form = MultipartForm {
            fields: Vec::new(),
            files,
        };
        for (name, value) in fields {
            match value {
                Value::Null => {}
                Value::Array(items) => {
                    for item in items {
                        form.fields.push((name.clone(), text_value(item)));
                    }
                }
                other => form.fields.push((name.clone(), text_value(other))),
            }
        }
        RequestBody::Multipart(form)
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self, RequestBody::Multipart(_))
    }
}

fn text_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_without_files() {
        let mut fields = Map::new();
        fields.insert("name".to_string(), json!("Rust 101"));
        let body = RequestBody::from_fields(&fields, Vec::new());
        assert_eq!(body, RequestBody::Json(json!({"name": "Rust 101"})));
    }

    #[test]
    fn multipart_flattens_arrays_and_skips_nulls() {
        let mut fields = Map::new();
        fields.insert("name".to_string(), json!("Rust 101"));
        fields.insert("tagIds".to_string(), json!([1, 2]));
        fields.insert("endDate".to_string(), Value::Null);
        let image = FilePart {
            field: "coverImage".to_string(),
            file_name: "cover.png".to_string(),
            content_type: "image/png".to_string(),
            bytes: vec![0x89, 0x50],
        };

        let RequestBody::Multipart(form) = RequestBody::from_fields(&fields, vec![image]) else {
            panic!("expected multipart body");
        };
        assert!(form.fields.contains(&("name".to_string(), "Rust 101".to_string())));
        assert!(form.fields.contains(&("tagIds".to_string(), "1".to_string())));
        assert!(form.fields.contains(&("tagIds".to_string(), "2".to_string())));
        assert!(!form.fields.iter().any(|(name, _)| name == "endDate"));
        assert_eq!(form.files.len(), 1);
    }
}
