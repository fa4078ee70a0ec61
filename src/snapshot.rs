//! Dehydrate/hydrate serialization (§6.4).

use crate::graph::Record;
use crate::value::StoredValue;
use serde_json_bytes::{ByteString, Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;

/// Current snapshot format tag (§6.4's `version` field).
pub const SNAPSHOT_FORMAT_VERSION: i64 = 1;

/// `{records, version}` (§6.4).
pub struct Snapshot {
    pub records: HashMap<String, Record>,
}

/// Serializes a full set of records into the `{records, version}` JSON
/// shape: links become `{__ref}`, link lists become `{__refs: [...]}`
/// (§6.4).
pub fn dehydrate(records: &HashMap<String, Record>) -> JsonValue {
    let mut records_object = JsonMap::new();
    for (id, record) in records {
        records_object.insert(ByteString::from(id.clone()), dehydrate_record(record));
    }
    let mut root = JsonMap::new();
    root.insert(ByteString::from("records"), JsonValue::Object(records_object));
    root.insert(ByteString::from("version"), JsonValue::Number(SNAPSHOT_FORMAT_VERSION.into()));
    JsonValue::Object(root)
}

fn dehydrate_record(record: &Record) -> JsonValue {
    let mut fields = JsonMap::new();
    for (key, value) in &record.fields {
        fields.insert(ByteString::from(key.clone()), dehydrate_value(value));
    }
    fields.insert(ByteString::from("__version".to_string()), JsonValue::Number((record.version as i64).into()));
    JsonValue::Object(fields)
}

fn dehydrate_value(value: &StoredValue) -> JsonValue {
    match value {
        StoredValue::Scalar(v) => v.clone(),
        StoredValue::Null => JsonValue::Null,
        StoredValue::Link(id) => {
            let mut object = JsonMap::new();
            object.insert(ByteString::from("__ref".to_string()), JsonValue::String(id.clone().into()));
            JsonValue::Object(object)
        }
        StoredValue::LinkList(ids) => {
            let refs: Vec<JsonValue> = ids
                .iter()
                .map(|id| match id {
                    Some(id) => JsonValue::String(id.clone().into()),
                    None => JsonValue::Null,
                })
                .collect();
            let mut object = JsonMap::new();
            object.insert(ByteString::from("__refs".to_string()), JsonValue::Array(refs));
            JsonValue::Object(object)
        }
        StoredValue::ScalarList(items) => JsonValue::Array(items.iter().map(dehydrate_value).collect()),
    }
}

/// Parses a `{records, version}` snapshot back into a record map.
pub fn hydrate(snapshot: &JsonValue) -> Result<HashMap<String, Record>, String> {
    let object = snapshot.as_object().ok_or("snapshot must be a JSON object")?;
    let records_object = object.get("records").and_then(|v| v.as_object()).ok_or("snapshot missing `records`")?;

    let mut out = HashMap::new();
    for (id, value) in records_object.iter() {
        out.insert(id.as_str().to_string(), hydrate_record(value)?);
    }
    Ok(out)
}

fn hydrate_record(value: &JsonValue) -> Result<Record, String> {
    let object = value.as_object().ok_or("record must be an object")?;
    let mut record = Record::new();
    for (key, field_value) in object.iter() {
        let key_str = key.as_str();
        if key_str == "__version" {
            record.version = field_value.as_i64().unwrap_or(0) as u64;
            continue;
        }
        record.fields.insert(key_str.to_string(), hydrate_value(field_value)?);
    }
    Ok(record)
}

fn hydrate_value(value: &JsonValue) -> Result<StoredValue, String> {
    if value.is_null() {
        return Ok(StoredValue::Null);
    }
    if let Some(object) = value.as_object() {
        if let Some(JsonValue::String(id)) = object.get("__ref") {
            return Ok(StoredValue::Link(id.as_str().to_string()));
        }
        if let Some(JsonValue::Array(refs)) = object.get("__refs") {
            let ids = refs
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect();
            return Ok(StoredValue::LinkList(ids));
        }
        return Err("object field is neither {__ref} nor {__refs}".to_string());
    }
    if let Some(array) = value.as_array() {
        return Ok(StoredValue::ScalarList(
            array.iter().map(hydrate_value).collect::<Result<Vec<_>, _>>()?,
        ));
    }
    Ok(StoredValue::Scalar(value.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn dehydrate_then_hydrate_round_trips_links_and_scalars() {
        let mut fields: IndexMap<String, StoredValue> = IndexMap::new();
        fields.insert("name".to_string(), StoredValue::Scalar(JsonValue::String("Ada".into())));
        fields.insert("best_friend".to_string(), StoredValue::Link("User:2".to_string()));
        fields.insert("friends".to_string(), StoredValue::LinkList(vec![Some("User:2".to_string()), None]));
        let record = Record { fields, version: 3 };

        let mut records = HashMap::new();
        records.insert("User:1".to_string(), record);

        let snapshot = dehydrate(&records);
        let restored = hydrate(&snapshot).unwrap();

        let restored_record = restored.get("User:1").unwrap();
        assert_eq!(restored_record.version, 3);
        assert_eq!(restored_record.get("best_friend").unwrap().as_link(), Some("User:2"));
        assert_eq!(restored_record.get("friends").unwrap().as_link_list().unwrap().len(), 2);
    }
}
