/// Embedded Lua sandbox shared by condition and job executors
///
/// Each evaluation gets a fresh `mlua::Lua` state with the filesystem, process
/// and module-loading globals removed and a few safe time helpers added.
/// Values cross the boundary as JSON.

use anyhow::Result;
use mlua::Lua;
use serde_json::{Map, Value};

/// Globals user data must never shadow when flattened into the state
const RESERVED_GLOBALS: &[&str] = &[
    "string", "math", "table", "utf8", "print", "type", "tostring", "tonumber", "pairs",
    "ipairs", "select", "error", "pcall", "assert", "next", "inputs", "outputs", "variables",
    "execution_count", "date", "time", "now", "_G", "_ENV",
];

/// Globals removed from every state
const BLOCKED_GLOBALS: &[&str] = &[
    "os", "io", "debug", "package", "require", "load", "loadstring", "dofile", "loadfile",
    "collectgarbage", "rawget", "rawset", "setmetatable", "getmetatable", "coroutine",
];

pub struct LuaSandbox {
    lua: Lua,
}

impl LuaSandbox {
    pub fn new() -> Result<Self> {
        let lua = Lua::new();
        let globals = lua.globals();

        for name in BLOCKED_GLOBALS {
            globals
                .set(*name, mlua::Nil)
                .map_err(|e| anyhow::anyhow!("Failed to remove Lua global '{}': {}", name, e))?;
        }

        // Safe time functions (replace os.date, os.time)
        let date = lua
            .create_function(|_, format: String| Ok(chrono::Utc::now().format(&format).to_string()))
            .map_err(|e| anyhow::anyhow!("Failed to create date function: {}", e))?;
        let time = lua
            .create_function(|_, ()| Ok(chrono::Utc::now().timestamp()))
            .map_err(|e| anyhow::anyhow!("Failed to create time function: {}", e))?;
        let now = lua
            .create_function(|_, ()| Ok(chrono::Utc::now().to_rfc3339()))
            .map_err(|e| anyhow::anyhow!("Failed to create now function: {}", e))?;
        globals
            .set("date", date)
            .and_then(|_| globals.set("time", time))
            .and_then(|_| globals.set("now", now))
            .map_err(|e| anyhow::anyhow!("Failed to install Lua helpers: {}", e))?;

        Ok(Self { lua })
    }

    pub fn set_global(&self, name: &str, value: &Value) -> Result<()> {
        let lua_value = json_to_lua(&self.lua, value)
            .map_err(|e| anyhow::anyhow!("Failed to convert '{}' for Lua: {}", name, e))?;
        self.lua
            .globals()
            .set(name, lua_value)
            .map_err(|e| anyhow::anyhow!("Failed to set Lua global '{}': {}", name, e))
    }

    /// Expose every key of `values` as a global, skipping reserved names and
    /// keys that aren't Lua identifiers
    pub fn flatten_into_globals(&self, values: &Map<String, Value>) -> Result<()> {
        for (key, value) in values {
            if is_identifier(key) && !RESERVED_GLOBALS.contains(&key.as_str()) {
                self.set_global(key, value)?;
            }
        }
        Ok(())
    }

    /// Evaluate an expression or a block of statements ending in `return`
    pub fn eval(&self, code: &str) -> Result<Value> {
        let result: mlua::Value = self
            .lua
            .load(code)
            .eval()
            .map_err(|e| anyhow::anyhow!("Lua execution failed: {}", e))?;
        lua_to_json(result)
    }
}

/// Rewrite JavaScript-style operators into their Lua equivalents
pub fn translate_js_operators(expression: &str) -> String {
    expression
        .replace("!==", "~=")
        .replace("===", "==")
        .replace("!=", "~=")
        .replace("&&", " and ")
        .replace("||", " or ")
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn json_to_lua(lua: &Lua, value: &Value) -> mlua::Result<mlua::Value> {
    Ok(match value {
        Value::Null => mlua::Value::Nil,
        Value::Bool(b) => mlua::Value::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => mlua::Value::Integer(i),
            None => mlua::Value::Number(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => mlua::Value::String(lua.create_string(s)?),
        Value::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.set(i + 1, json_to_lua(lua, item)?)?;
            }
            mlua::Value::Table(table)
        }
        Value::Object(map) => {
            let table = lua.create_table()?;
            for (key, item) in map {
                table.set(key.as_str(), json_to_lua(lua, item)?)?;
            }
            mlua::Value::Table(table)
        }
    })
}

/// Convert Lua value to JSON Value
fn lua_to_json(lua_value: mlua::Value) -> Result<Value> {
    match lua_value {
        mlua::Value::Nil => Ok(Value::Null),
        mlua::Value::Boolean(b) => Ok(Value::Bool(b)),
        mlua::Value::Integer(i) => Ok(Value::Number(serde_json::Number::from(i))),
        mlua::Value::Number(f) => Ok(serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        mlua::Value::String(s) => {
            let s_str = s
                .to_str()
                .map_err(|e| anyhow::anyhow!("Invalid UTF-8 in Lua string: {}", e))?;
            Ok(Value::String(s_str.to_string()))
        }
        mlua::Value::Table(table) => {
            // Sequence tables become arrays, everything else an object
            let mut is_array = true;
            let mut max_index = 0;
            let mut count = 0;

            for pair in table.pairs::<mlua::Value, mlua::Value>() {
                let (key, _) = pair.map_err(|e| anyhow::anyhow!("Failed to iterate Lua table: {}", e))?;
                count += 1;
                match key {
                    mlua::Value::Integer(i) if i > 0 => max_index = max_index.max(i as usize),
                    _ => {
                        is_array = false;
                        break;
                    }
                }
            }

            if is_array && count > 0 && count == max_index {
                let mut arr = Vec::with_capacity(max_index);
                for i in 1..=max_index {
                    let val: mlua::Value = table
                        .get(i)
                        .map_err(|e| anyhow::anyhow!("Failed to get Lua table value: {}", e))?;
                    arr.push(lua_to_json(val)?);
                }
                Ok(Value::Array(arr))
            } else {
                let mut obj = Map::new();
                for pair in table.pairs::<mlua::Value, mlua::Value>() {
                    let (key, value) = pair.map_err(|e| anyhow::anyhow!("Failed to iterate Lua table: {}", e))?;
                    let key_str = match key {
                        mlua::Value::String(s) => s
                            .to_str()
                            .map_err(|e| anyhow::anyhow!("Invalid UTF-8 in Lua key: {}", e))?
                            .to_string(),
                        mlua::Value::Integer(i) => i.to_string(),
                        mlua::Value::Number(f) => f.to_string(),
                        _ => continue,
                    };
                    obj.insert(key_str, lua_to_json(value)?);
                }
                Ok(Value::Object(obj))
            }
        }
        // Functions, userdata and threads have no JSON form
        _ => Ok(Value::Null),
    }
}
