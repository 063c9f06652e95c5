//! Host functions exposed to source scripts.
//!
//! Every helper is listed once in [`EXTENSIONS`], a static table of
//! `(namespace, name, binder)` entries versioned by
//! [`EXTENSION_API_VERSION`]. [`install`] walks the table and binds each entry
//! into a fresh interpreter, so adding a helper never touches the runtime.
//!
//! Helpers that can fail return `(nil, message)` instead of raising.

use crate::crypto::{self, CipherMode};
use crate::error::ExtensionResult;
use crate::list::{default_less, distinct_key, sort_by, truthy};
use crate::log::{ExecutionLog, LogLevel};
use crate::{codec, date, hash, html, json, pattern, text};
use mlua::{
    DeserializeOptions, Function, Lua, LuaSerdeExt, Result as LuaResult, SerializeOptions, Table,
    Value,
};
use serde::Serialize;
use std::collections::HashSet;

/// Version of the helper surface. Bumped when a helper is removed or changes
/// its calling convention.
pub const EXTENSION_API_VERSION: u32 = 1;

/// A single registered helper.
pub struct ExtensionFn {
    /// Global table the helper lives in (`codec`, `re`, ...).
    pub namespace: &'static str,
    /// Field name inside the namespace.
    pub name: &'static str,
    /// Creates the Lua function inside a given interpreter.
    pub bind: fn(&Lua) -> LuaResult<Function>,
}

const fn ext(
    namespace: &'static str,
    name: &'static str,
    bind: fn(&Lua) -> LuaResult<Function>,
) -> ExtensionFn {
    ExtensionFn {
        namespace,
        name,
        bind,
    }
}

/// Registration table for every helper.
pub static EXTENSIONS: &[ExtensionFn] = &[
    // codec
    ext("codec", "base64_encode", codec_base64_encode),
    ext("codec", "base64_decode", codec_base64_decode),
    ext("codec", "hex_encode", codec_hex_encode),
    ext("codec", "hex_decode", codec_hex_decode),
    ext("codec", "url_encode", codec_url_encode),
    ext("codec", "url_decode", codec_url_decode),
    ext("codec", "utf8_bytes", codec_utf8_bytes),
    // hash
    ext("hash", "md5", hash_md5),
    ext("hash", "sha1", hash_sha1),
    ext("hash", "sha256", hash_sha256),
    ext("hash", "sha512", hash_sha512),
    ext("hash", "hmac_sha256", hash_hmac_sha256),
    // crypto
    ext("crypto", "aes_encrypt", crypto_aes_encrypt),
    ext("crypto", "aes_decrypt", crypto_aes_decrypt),
    ext("crypto", "des_encrypt", crypto_des_encrypt),
    ext("crypto", "des_decrypt", crypto_des_decrypt),
    ext("crypto", "triple_des_encrypt", crypto_triple_des_encrypt),
    ext("crypto", "triple_des_decrypt", crypto_triple_des_decrypt),
    ext("crypto", "rsa_encrypt", crypto_rsa_encrypt),
    ext("crypto", "rsa_decrypt", crypto_rsa_decrypt),
    // re
    ext("re", "is_match", re_is_match),
    ext("re", "match", re_match),
    ext("re", "match_all", re_match_all),
    ext("re", "replace", re_replace),
    ext("re", "split", re_split),
    // str
    ext("str", "trim", str_trim),
    ext("str", "substring", str_substring),
    ext("str", "substring_after", str_substring_after),
    ext("str", "substring_before", str_substring_before),
    ext("str", "substring_between", str_substring_between),
    ext("str", "split", str_split),
    ext("str", "join", str_join),
    ext("str", "starts_with", str_starts_with),
    ext("str", "ends_with", str_ends_with),
    ext("str", "contains", str_contains),
    ext("str", "lower", str_lower),
    ext("str", "upper", str_upper),
    ext("str", "replace", str_replace),
    // list
    ext("list", "map", list_map),
    ext("list", "filter", list_filter),
    ext("list", "reduce", list_reduce),
    ext("list", "find", list_find),
    ext("list", "sort", list_sort),
    ext("list", "distinct", list_distinct),
    ext("list", "reverse", list_reverse),
    ext("list", "flatten", list_flatten),
    ext("list", "take", list_take),
    ext("list", "len", list_len),
    // json
    ext("json", "parse", json_parse),
    ext("json", "stringify", json_stringify),
    ext("json", "path", json_path),
    // html
    ext("html", "select", html_select),
    ext("html", "select_first", html_select_first),
    ext("html", "text", html_text),
    ext("html", "attr", html_attr),
    ext("html", "to_text", html_to_text),
    ext("html", "resolve", html_resolve),
    // date
    ext("date", "now", date_now),
    ext("date", "parse", date_parse),
    ext("date", "format", date_format),
    ext("date", "parse_rfc3339", date_parse_rfc3339),
    // log
    ext("log", "log", log_info),
    ext("log", "debug", log_debug),
    ext("log", "info", log_info),
    ext("log", "warn", log_warn),
    ext("log", "error", log_error),
];

/// Bind every helper in [`EXTENSIONS`] into `lua`.
///
/// Also sets `json.null` and `lectern.api_version`.
pub fn install(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    for entry in EXTENSIONS {
        let namespace = match globals.raw_get::<Option<Table>>(entry.namespace)? {
            Some(table) => table,
            None => {
                let table = lua.create_table()?;
                globals.raw_set(entry.namespace, table.clone())?;
                table
            }
        };
        namespace.raw_set(entry.name, (entry.bind)(lua)?)?;
    }

    let json: Table = globals.raw_get("json")?;
    json.raw_set("null", lua.null())?;

    let meta = lua.create_table()?;
    meta.raw_set("api_version", EXTENSION_API_VERSION)?;
    globals.raw_set("lectern", meta)?;
    Ok(())
}

// ============================================================================
// Conversion helpers
// ============================================================================

/// Convert a Lua value to JSON. Functions and userdata are dropped.
pub fn to_json(lua: &Lua, value: Value) -> LuaResult<serde_json::Value> {
    lua.from_value_with(value, DeserializeOptions::new().deny_unsupported_types(false))
}

/// Convert JSON to a Lua value. JSON `null` becomes `nil`.
pub fn from_json<T: Serialize + ?Sized>(lua: &Lua, value: &T) -> LuaResult<Value> {
    lua.to_value_with(
        value,
        SerializeOptions::new()
            .serialize_none_to_null(false)
            .serialize_unit_to_null(false),
    )
}

/// Human-readable rendering of a Lua value for log lines and messages.
pub fn describe(lua: &Lua, value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string_lossy(),
        Value::Table(_) => to_json(lua, value.clone())
            .ok()
            .and_then(|json| serde_json::to_string(&json).ok())
            .unwrap_or_else(|| "<table>".to_string()),
        other => format!("<{}>", other.type_name()),
    }
}

fn lua_try<T>(result: ExtensionResult<T>) -> (Option<T>, Option<String>) {
    match result {
        Ok(value) => (Some(value), None),
        Err(err) => (None, Some(err.to_string())),
    }
}

fn bytes_or_err(
    lua: &Lua,
    result: ExtensionResult<Vec<u8>>,
) -> LuaResult<(Option<mlua::String>, Option<String>)> {
    match result {
        Ok(bytes) => Ok((Some(lua.create_string(&bytes)?), None)),
        Err(err) => Ok((None, Some(err.to_string()))),
    }
}

fn value_or_err<T: Serialize>(
    lua: &Lua,
    result: ExtensionResult<T>,
) -> LuaResult<(Value, Option<String>)> {
    match result {
        Ok(value) => Ok((from_json(lua, &value)?, None)),
        Err(err) => Ok((Value::Nil, Some(err.to_string()))),
    }
}

fn sequence(list: Option<Table>) -> LuaResult<Vec<Value>> {
    match list {
        Some(table) => table.sequence_values::<Value>().collect(),
        None => Ok(Vec::new()),
    }
}

// ============================================================================
// codec / hash
// ============================================================================

fn codec_base64_encode(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, data: mlua::String| Ok(codec::base64_encode(&data.as_bytes())))
}

fn codec_base64_decode(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, text: String| bytes_or_err(lua, codec::base64_decode(&text)))
}

fn codec_hex_encode(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, data: mlua::String| Ok(codec::hex_encode(&data.as_bytes())))
}

fn codec_hex_decode(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, text: String| bytes_or_err(lua, codec::hex_decode(&text)))
}

fn codec_url_encode(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, text: String| Ok(codec::url_encode(&text)))
}

fn codec_url_decode(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, text: String| Ok(lua_try(codec::url_decode(&text))))
}

fn codec_utf8_bytes(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, text: String| lua.create_sequence_from(codec::utf8_bytes(&text)))
}

fn hash_md5(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, data: mlua::String| Ok(hash::md5(&data.as_bytes())))
}

fn hash_sha1(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, data: mlua::String| Ok(hash::sha1(&data.as_bytes())))
}

fn hash_sha256(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, data: mlua::String| Ok(hash::sha256(&data.as_bytes())))
}

fn hash_sha512(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, data: mlua::String| Ok(hash::sha512(&data.as_bytes())))
}

fn hash_hmac_sha256(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (key, data): (mlua::String, mlua::String)| {
        Ok(lua_try(hash::hmac_sha256(&key.as_bytes(), &data.as_bytes())))
    })
}

// ============================================================================
// crypto
// ============================================================================

type BlockEncrypt = fn(&[u8], &[u8], Option<&[u8]>, CipherMode) -> ExtensionResult<String>;
type BlockDecrypt = fn(&str, &[u8], Option<&[u8]>, CipherMode) -> ExtensionResult<Vec<u8>>;

type CipherArgs = (
    mlua::String,
    mlua::String,
    Option<mlua::String>,
    Option<String>,
);

fn block_encrypt(lua: &Lua, cipher: BlockEncrypt) -> LuaResult<Function> {
    lua.create_function(move |_, (data, key, iv, mode): CipherArgs| {
        let iv = iv.as_ref().map(|iv| iv.as_bytes());
        let result = CipherMode::parse(mode.as_deref())
            .and_then(|mode| cipher(&data.as_bytes(), &key.as_bytes(), iv.as_deref(), mode));
        Ok(lua_try(result))
    })
}

fn block_decrypt(lua: &Lua, cipher: BlockDecrypt) -> LuaResult<Function> {
    lua.create_function(move |lua, (data, key, iv, mode): CipherArgs| {
        let iv = iv.as_ref().map(|iv| iv.as_bytes());
        let result = CipherMode::parse(mode.as_deref()).and_then(|mode| {
            let text = data.to_str().map_err(|_| {
                crate::ExtensionError::Validation("ciphertext must be base64 text".to_string())
            })?;
            cipher(&text, &key.as_bytes(), iv.as_deref(), mode)
        });
        bytes_or_err(lua, result)
    })
}

fn crypto_aes_encrypt(lua: &Lua) -> LuaResult<Function> {
    block_encrypt(lua, crypto::aes_encrypt)
}

fn crypto_aes_decrypt(lua: &Lua) -> LuaResult<Function> {
    block_decrypt(lua, crypto::aes_decrypt)
}

fn crypto_des_encrypt(lua: &Lua) -> LuaResult<Function> {
    block_encrypt(lua, crypto::des_encrypt)
}

fn crypto_des_decrypt(lua: &Lua) -> LuaResult<Function> {
    block_decrypt(lua, crypto::des_decrypt)
}

fn crypto_triple_des_encrypt(lua: &Lua) -> LuaResult<Function> {
    block_encrypt(lua, crypto::triple_des_encrypt)
}

fn crypto_triple_des_decrypt(lua: &Lua) -> LuaResult<Function> {
    block_decrypt(lua, crypto::triple_des_decrypt)
}

fn crypto_rsa_encrypt(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (data, key): (mlua::String, String)| {
        Ok(lua_try(crypto::rsa_encrypt(&data.as_bytes(), &key)))
    })
}

fn crypto_rsa_decrypt(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (data, key): (String, String)| {
        bytes_or_err(lua, crypto::rsa_decrypt(&data, &key))
    })
}

// ============================================================================
// re / str
// ============================================================================

fn re_is_match(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (text, re): (String, String)| {
        Ok(lua_try(pattern::is_match(&text, &re)))
    })
}

fn re_match(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (text, re): (String, String)| {
        value_or_err(lua, pattern::first_match(&text, &re))
    })
}

fn re_match_all(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (text, re): (String, String)| {
        value_or_err(lua, pattern::match_all(&text, &re))
    })
}

fn re_replace(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(
        |_, (text, re, replacement, all): (String, String, String, Option<bool>)| {
            Ok(lua_try(pattern::replace(
                &text,
                &re,
                &replacement,
                all.unwrap_or(true),
            )))
        },
    )
}

fn re_split(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (text, re): (String, String)| {
        value_or_err(lua, pattern::split(&text, &re))
    })
}

/// Nil and missing string arguments read as `""`.
type Text = Option<String>;

fn text_arg(s: &Text) -> &str {
    s.as_deref().unwrap_or("")
}

fn str_trim(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, s: Text| Ok(text::trim(text_arg(&s))))
}

fn str_substring(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (s, start, end): (Text, Option<i64>, Option<i64>)| {
        Ok(text::substring(text_arg(&s), start.unwrap_or(0), end))
    })
}

fn str_substring_after(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (s, delimiter): (Text, Text)| {
        Ok(text::substring_after(text_arg(&s), text_arg(&delimiter)))
    })
}

fn str_substring_before(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (s, delimiter): (Text, Text)| {
        Ok(text::substring_before(text_arg(&s), text_arg(&delimiter)))
    })
}

fn str_substring_between(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (s, open, close): (Text, Text, Text)| {
        Ok(text::substring_between(
            text_arg(&s),
            text_arg(&open),
            text_arg(&close),
        ))
    })
}

fn str_split(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (s, separator): (Text, Text)| {
        lua.create_sequence_from(text::split(text_arg(&s), text_arg(&separator)))
    })
}

fn str_join(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (parts, separator): (Option<Table>, Text)| {
        let parts: Vec<String> = match parts {
            Some(table) => table.sequence_values::<String>().collect::<LuaResult<_>>()?,
            None => Vec::new(),
        };
        Ok(text::join(&parts, text_arg(&separator)))
    })
}

fn str_starts_with(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (s, prefix): (Text, Text)| {
        Ok(text::starts_with(text_arg(&s), text_arg(&prefix)))
    })
}

fn str_ends_with(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (s, suffix): (Text, Text)| {
        Ok(text::ends_with(text_arg(&s), text_arg(&suffix)))
    })
}

fn str_contains(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (s, needle): (Text, Text)| {
        Ok(text::contains(text_arg(&s), text_arg(&needle)))
    })
}

fn str_lower(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, s: Text| Ok(text::lower(text_arg(&s))))
}

fn str_upper(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, s: Text| Ok(text::upper(text_arg(&s))))
}

fn str_replace(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (s, from, to): (Text, Text, Text)| {
        Ok(text::replace(text_arg(&s), text_arg(&from), text_arg(&to)))
    })
}

// ============================================================================
// list
// ============================================================================

fn list_map(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (list, f): (Option<Table>, Function)| {
        let out = lua.create_table()?;
        for (i, value) in sequence(list)?.into_iter().enumerate() {
            let mapped: Value = f.call((value, i + 1))?;
            out.raw_set(i + 1, mapped)?;
        }
        Ok(out)
    })
}

fn list_filter(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (list, f): (Option<Table>, Function)| {
        let mut kept = Vec::new();
        for (i, value) in sequence(list)?.into_iter().enumerate() {
            let keep: Value = f.call((value.clone(), i + 1))?;
            if truthy(&keep) {
                kept.push(value);
            }
        }
        lua.create_sequence_from(kept)
    })
}

fn list_reduce(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (list, f, init): (Option<Table>, Function, Value)| {
        let mut acc = init;
        for value in sequence(list)? {
            acc = f.call((acc, value))?;
        }
        Ok(acc)
    })
}

fn list_find(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (list, f): (Option<Table>, Function)| {
        for value in sequence(list)? {
            let hit: Value = f.call(value.clone())?;
            if truthy(&hit) {
                return Ok(value);
            }
        }
        Ok(Value::Nil)
    })
}

fn list_sort(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (list, less): (Option<Table>, Option<Function>)| {
        let values = sequence(list)?;
        let sorted = sort_by(values, &mut |a: &Value, b: &Value| -> LuaResult<bool> {
            match &less {
                Some(f) => f.call::<Value>((a.clone(), b.clone())).map(|v| truthy(&v)),
                None => Ok(default_less(a, b)),
            }
        })?;
        lua.create_sequence_from(sorted)
    })
}

fn list_distinct(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, list: Option<Table>| {
        let mut seen = HashSet::new();
        let unique: Vec<Value> = sequence(list)?
            .into_iter()
            .filter(|value| match distinct_key(value) {
                Some(key) => seen.insert(key),
                None => true,
            })
            .collect();
        lua.create_sequence_from(unique)
    })
}

fn list_reverse(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, list: Option<Table>| {
        let mut values = sequence(list)?;
        values.reverse();
        lua.create_sequence_from(values)
    })
}

fn list_flatten(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, list: Option<Table>| {
        let mut flat = Vec::new();
        for value in sequence(list)? {
            match value {
                Value::Table(inner) => flat.extend(sequence(Some(inner))?),
                other => flat.push(other),
            }
        }
        lua.create_sequence_from(flat)
    })
}

fn list_take(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (list, n): (Option<Table>, Option<i64>)| {
        let count = usize::try_from(n.unwrap_or(0)).unwrap_or(0);
        let values: Vec<Value> = sequence(list)?.into_iter().take(count).collect();
        lua.create_sequence_from(values)
    })
}

fn list_len(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, list: Option<Table>| Ok(list.map(|t| t.raw_len()).unwrap_or(0)))
}

// ============================================================================
// json / html / date
// ============================================================================

fn json_parse(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, text: String| value_or_err(lua, json::parse(&text)))
}

fn json_stringify(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (value, pretty): (Value, Option<bool>)| {
        let result = to_json(lua, value)
            .map_err(|e| crate::ExtensionError::Json(e.to_string()))
            .and_then(|json| json::stringify(&json, pretty.unwrap_or(false)));
        Ok(lua_try(result))
    })
}

fn json_path(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (value, query): (Value, String)| {
        let document = match value {
            Value::String(text) => json::parse(&text.to_string_lossy()),
            other => to_json(lua, other).map_err(|e| crate::ExtensionError::Json(e.to_string())),
        };
        value_or_err(lua, document.and_then(|doc| json::path(&doc, &query)))
    })
}

fn html_select(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (markup, css): (String, String)| {
        value_or_err(lua, html::select(&markup, &css))
    })
}

fn html_select_first(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (markup, css): (String, String)| {
        value_or_err(lua, html::select_first(&markup, &css))
    })
}

fn html_text(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (markup, css): (String, Option<String>)| {
        Ok(lua_try(html::text(&markup, css.as_deref())))
    })
}

fn html_attr(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (markup, css, name): (String, String, String)| {
        value_or_err(lua, html::attr(&markup, &css, &name))
    })
}

fn html_to_text(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, markup: String| Ok(html::to_text(&markup)))
}

fn html_resolve(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (base, href): (String, String)| {
        Ok(lua_try(html::resolve(&base, &href)))
    })
}

fn date_now(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, ()| Ok(date::now_millis()))
}

fn date_parse(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (text, format): (String, String)| {
        Ok(lua_try(date::parse(&text, &format)))
    })
}

fn date_format(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (millis, format): (i64, String)| {
        Ok(lua_try(date::format(millis, &format)))
    })
}

fn date_parse_rfc3339(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, text: String| Ok(lua_try(date::parse_rfc3339(&text))))
}

// ============================================================================
// log
// ============================================================================

fn script_log(lua: &Lua, level: LogLevel) -> LuaResult<Function> {
    lua.create_function(move |lua, (message, data): (Value, Option<Value>)| {
        let message = describe(lua, &message);
        let data = data.and_then(|value| to_json(lua, value).ok());
        match lua.app_data_ref::<ExecutionLog>() {
            Some(log) => log.record(level, message, data),
            None => tracing::debug!(level = level.as_str(), "{}", message),
        }
        Ok(())
    })
}

fn log_debug(lua: &Lua) -> LuaResult<Function> {
    script_log(lua, LogLevel::Debug)
}

fn log_info(lua: &Lua) -> LuaResult<Function> {
    script_log(lua, LogLevel::Info)
}

fn log_warn(lua: &Lua) -> LuaResult<Function> {
    script_log(lua, LogLevel::Warn)
}

fn log_error(lua: &Lua) -> LuaResult<Function> {
    script_log(lua, LogLevel::Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lua() -> Lua {
        let lua = Lua::new();
        install(&lua).unwrap();
        lua
    }

    #[test]
    fn test_registration_table_is_unique() {
        let mut seen = HashSet::new();
        for entry in EXTENSIONS {
            assert!(
                seen.insert((entry.namespace, entry.name)),
                "duplicate helper {}.{}",
                entry.namespace,
                entry.name
            );
        }
    }

    #[test]
    fn test_install_exposes_version_and_null() {
        let lua = lua();
        let version: u32 = lua.load("return lectern.api_version").eval().unwrap();
        assert_eq!(version, EXTENSION_API_VERSION);
        let is_null: bool = lua.load("return json.null ~= nil").eval().unwrap();
        assert!(is_null);
    }

    #[test]
    fn test_fallible_helpers_return_nil_and_message() {
        let lua = lua();
        let (value, err): (Value, Option<String>) =
            lua.load(r#"return re.is_match("abc", "(")"#).eval().unwrap();
        assert!(value.is_nil());
        assert!(err.unwrap().starts_with("invalid pattern"));

        let (value, err): (Value, Option<String>) = lua
            .load(r#"return crypto.aes_encrypt("x", "", "0123456789abcdef")"#)
            .eval()
            .unwrap();
        assert!(value.is_nil());
        assert_eq!(err.as_deref(), Some("key must not be empty"));
    }

    #[test]
    fn test_crypto_round_trip_from_script() {
        let lua = lua();
        let plain: String = lua
            .load(
                r#"
                local iv = "0123456789abcdef"
                local sealed = crypto.aes_encrypt("hello", "secret", iv)
                return crypto.aes_decrypt(sealed, "secret", iv)
            "#,
            )
            .eval()
            .unwrap();
        assert_eq!(plain, "hello");
    }

    #[test]
    fn test_list_helpers() {
        let lua = lua();
        let joined: String = lua
            .load(
                r#"
                local xs = list.map({3, 1, 2, 3}, function(v) return v * 10 end)
                xs = list.distinct(xs)
                xs = list.sort(xs, function(a, b) return a > b end)
                local strs = list.map(xs, function(v) return tostring(v) end)
                return str.join(strs, ",")
            "#,
            )
            .eval()
            .unwrap();
        assert_eq!(joined, "30,20,10");

        let total: i64 = lua
            .load("return list.reduce({1, 2, 3}, function(a, v) return a + v end, 0)")
            .eval()
            .unwrap();
        assert_eq!(total, 6);

        let empty: i64 = lua
            .load("return list.len(list.filter(nil, function() return true end))")
            .eval()
            .unwrap();
        assert_eq!(empty, 0);
    }

    #[test]
    fn test_html_and_json_from_script() {
        let lua = lua();
        let href: String = lua
            .load(r#"return html.select('<a href="/x">X</a>', "a")[1].attrs.href"#)
            .eval()
            .unwrap();
        assert_eq!(href, "/x");

        let title: String = lua
            .load(r#"return json.path('{"a":{"b":"deep"}}', "$.a.b")[1]"#)
            .eval()
            .unwrap();
        assert_eq!(title, "deep");
    }

    #[test]
    fn test_log_writes_to_execution_log() {
        let lua = lua();
        let log = ExecutionLog::new("unit", 8);
        lua.set_app_data(log.clone());
        lua.load(r#"log.info("fetched", {count = 2}); log.warn(42)"#)
            .exec()
            .unwrap();

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "fetched");
        assert_eq!(entries[0].data, Some(serde_json::json!({"count": 2})));
        assert_eq!(entries[1].level, LogLevel::Warn);
        assert_eq!(entries[1].message, "42");
    }
}
