//! JSON-Patch (RFC 6902) over rendered descriptor objects
//!
//! Supports `add`, `remove`, `replace`, `move`, `copy` and `test`. A patch is
//! applied atomically: when one operation fails the document is left untouched.

use serde_json::Value;

/// Apply every operation of `operations` to `document`
pub fn apply(document: &mut Value, operations: &[Value]) -> Result<(), String> {
    let mut patched = document.clone();
    for (index, operation) in operations.iter().enumerate() {
        apply_one(&mut patched, operation).map_err(|e| format!("operation {index}: {e}"))?;
    }
    *document = patched;
    Ok(())
}

fn apply_one(document: &mut Value, operation: &Value) -> Result<(), String> {
    let op = field(operation, "op")?;
    let path = field(operation, "path")?;
    match op {
        "add" => add(document, path, value(operation)?.clone()),
        "remove" => remove(document, path).map(drop),
        "replace" => {
            let target = document
                .pointer_mut(path)
                .ok_or_else(|| format!("no value at '{path}'"))?;
            *target = value(operation)?.clone();
            Ok(())
        }
        "move" => {
            let from = field(operation, "from")?;
            if path.starts_with(from) && path[from.len()..].starts_with('/') {
                return Err(format!("cannot move '{from}' into its own child '{path}'"));
            }
            let moved = remove(document, from)?;
            add(document, path, moved)
        }
        "copy" => {
            let from = field(operation, "from")?;
            let copied = document
                .pointer(from)
                .cloned()
                .ok_or_else(|| format!("no value at '{from}'"))?;
            add(document, path, copied)
        }
        "test" => {
            let expected = value(operation)?;
            match document.pointer(path) {
                Some(actual) if actual == expected => Ok(()),
                Some(actual) => Err(format!("test failed at '{path}': found {actual}")),
                None => Err(format!("test failed: no value at '{path}'")),
            }
        }
        other => Err(format!("unknown op '{other}'")),
    }
}

fn field<'v>(operation: &'v Value, name: &str) -> Result<&'v str, String> {
    operation
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing string field '{name}'"))
}

fn value(operation: &Value) -> Result<&Value, String> {
    operation
        .get("value")
        .ok_or_else(|| "missing field 'value'".to_string())
}

/// Split a pointer into its parent pointer and unescaped last token
fn split(path: &str) -> Result<(&str, String), String> {
    let at = path
        .rfind('/')
        .ok_or_else(|| format!("invalid pointer '{path}'"))?;
    let token = path[at + 1..].replace("~1", "/").replace("~0", "~");
    Ok((&path[..at], token))
}

fn index(token: &str, len: usize, allow_end: bool) -> Result<usize, String> {
    let index: usize = token
        .parse()
        .map_err(|_| format!("invalid array index '{token}'"))?;
    let bound = if allow_end { len } else { len.saturating_sub(1) };
    if index > bound || (!allow_end && len == 0) {
        return Err(format!("array index {index} out of bounds"));
    }
    Ok(index)
}

fn add(document: &mut Value, path: &str, new: Value) -> Result<(), String> {
    if path.is_empty() {
        *document = new;
        return Ok(());
    }
    let (parent, token) = split(path)?;
    match document.pointer_mut(parent) {
        Some(Value::Object(map)) => {
            map.insert(token, new);
            Ok(())
        }
        Some(Value::Array(items)) => {
            if token == "-" {
                items.push(new);
            } else {
                let at = index(&token, items.len(), true)?;
                items.insert(at, new);
            }
            Ok(())
        }
        Some(_) => Err(format!("'{parent}' is neither an object nor an array")),
        None => Err(format!("no container at '{parent}'")),
    }
}

fn remove(document: &mut Value, path: &str) -> Result<Value, String> {
    let (parent, token) = split(path)?;
    match document.pointer_mut(parent) {
        Some(Value::Object(map)) => map
            .remove(&token)
            .ok_or_else(|| format!("no value at '{path}'")),
        Some(Value::Array(items)) => {
            let at = index(&token, items.len(), false)?;
            Ok(items.remove(at))
        }
        _ => Err(format!("no value at '{path}'")),
    }
}
