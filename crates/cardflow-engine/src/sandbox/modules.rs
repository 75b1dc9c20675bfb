//! Helper modules available to scripts.
//!
//! Every module is registered both as a static module (`hash::sha256(x)`)
//! and with the static module resolver (`import "hash" as h;`).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use rhai::module_resolvers::StaticModuleResolver;
use rhai::{Dynamic, Engine, EvalAltResult, Module, Shared, INT};
use sha2::{Digest, Sha256, Sha512};

use super::convert::{dynamic_to_json, json_to_dynamic};
use crate::encoding::tlv::TlvBuilder;
use crate::encoding::value::{strip_non_hex, to_ascii_hex, to_hex};

type FnResult<T> = Result<T, Box<EvalAltResult>>;

fn decode_hex(s: &str) -> FnResult<Vec<u8>> {
    hex::decode(strip_non_hex(s)).map_err(|e| format!("Invalid hex '{}': {}", s, e).into())
}

fn hash_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("sha256", |s: &str| -> FnResult<String> {
        Ok(hex::encode_upper(Sha256::digest(s.as_bytes())))
    });
    module.set_native_fn("sha256_hex", |s: &str| -> FnResult<String> {
        Ok(hex::encode_upper(Sha256::digest(decode_hex(s)?)))
    });
    module.set_native_fn("sha512", |s: &str| -> FnResult<String> {
        Ok(hex::encode_upper(Sha512::digest(s.as_bytes())))
    });
    module.set_native_fn("sha512_hex", |s: &str| -> FnResult<String> {
        Ok(hex::encode_upper(Sha512::digest(decode_hex(s)?)))
    });
    module
}

fn check_range(n: INT, max: u64, what: &str) -> FnResult<u64> {
    u64::try_from(n)
        .ok()
        .filter(|v| *v <= max)
        .ok_or_else(|| format!("{} out of range: {}", what, n).into())
}

fn pack_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("u8", |n: INT| -> FnResult<String> {
        Ok(format!("{:02X}", check_range(n, 0xFF, "u8")?))
    });
    module.set_native_fn("u16_be", |n: INT| -> FnResult<String> {
        let v = check_range(n, 0xFFFF, "u16")? as u16;
        Ok(hex::encode_upper(v.to_be_bytes()))
    });
    module.set_native_fn("u16_le", |n: INT| -> FnResult<String> {
        let v = check_range(n, 0xFFFF, "u16")? as u16;
        Ok(hex::encode_upper(v.to_le_bytes()))
    });
    module.set_native_fn("u32_be", |n: INT| -> FnResult<String> {
        let v = check_range(n, 0xFFFF_FFFF, "u32")? as u32;
        Ok(hex::encode_upper(v.to_be_bytes()))
    });
    module.set_native_fn("u32_le", |n: INT| -> FnResult<String> {
        let v = check_range(n, 0xFFFF_FFFF, "u32")? as u32;
        Ok(hex::encode_upper(v.to_le_bytes()))
    });
    module.set_native_fn("unpack_be", |s: &str| -> FnResult<INT> {
        let bytes = decode_hex(s)?;
        if bytes.len() > 7 {
            return Err(format!("Too many bytes to unpack: {}", bytes.len()).into());
        }
        Ok(bytes.iter().fold(0, |acc, b| (acc << 8) | INT::from(*b)))
    });
    module.set_native_fn("slice", |s: &str, start: INT, len: INT| -> FnResult<String> {
        let bytes = decode_hex(s)?;
        let start = check_range(start, bytes.len() as u64, "start")? as usize;
        let end = start + check_range(len, (bytes.len() - start) as u64, "length")? as usize;
        Ok(hex::encode_upper(&bytes[start..end]))
    });
    module.set_native_fn("tlv", |tag: &str, value: &str| -> FnResult<String> {
        TlvBuilder::build_single(tag, value, 1).map_err(|e| e.to_string().into())
    });
    module.set_native_fn(
        "tlv",
        |tag: &str, value: &str, length_bytes: INT| -> FnResult<String> {
            let width = check_range(length_bytes, 2, "length_bytes")? as u8;
            TlvBuilder::build_single(tag, value, width).map_err(|e| e.to_string().into())
        },
    );
    module
}

fn base64_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("encode", |s: &str| -> FnResult<String> {
        Ok(STANDARD.encode(s.as_bytes()))
    });
    module.set_native_fn("decode", |s: &str| -> FnResult<String> {
        let bytes = STANDARD
            .decode(s.as_bytes())
            .map_err(|e| format!("Invalid base64: {}", e))?;
        String::from_utf8(bytes).map_err(|e| format!("Decoded base64 is not UTF-8: {}", e).into())
    });
    module.set_native_fn("encode_hex", |s: &str| -> FnResult<String> {
        Ok(STANDARD.encode(decode_hex(s)?))
    });
    module.set_native_fn("decode_hex", |s: &str| -> FnResult<String> {
        let bytes = STANDARD
            .decode(s.as_bytes())
            .map_err(|e| format!("Invalid base64: {}", e))?;
        Ok(hex::encode_upper(bytes))
    });
    module
}

fn json_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("parse", |s: &str| -> FnResult<Dynamic> {
        let value: serde_json::Value =
            serde_json::from_str(s).map_err(|e| format!("Invalid JSON: {}", e))?;
        Ok(json_to_dynamic(&value))
    });
    module.set_native_fn("stringify", |value: Dynamic| -> FnResult<String> {
        serde_json::to_string(&dynamic_to_json(&value)).map_err(|e| e.to_string().into())
    });
    module
}

fn time_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("now", || -> FnResult<INT> { Ok(chrono::Utc::now().timestamp()) });
    module.set_native_fn("now_ms", || -> FnResult<INT> {
        Ok(chrono::Utc::now().timestamp_millis())
    });
    module.set_native_fn("now_rfc3339", || -> FnResult<String> {
        Ok(chrono::Utc::now().to_rfc3339())
    });
    module.set_native_fn("format", |ts: INT, fmt: &str| -> FnResult<String> {
        let time = chrono::DateTime::from_timestamp(ts, 0)
            .ok_or_else(|| format!("Invalid timestamp: {}", ts))?;
        Ok(time.format(fmt).to_string())
    });
    module
}

fn path_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("join", |a: &str, b: &str| -> FnResult<String> {
        Ok(std::path::Path::new(a).join(b).to_string_lossy().into_owned())
    });
    module.set_native_fn("file_name", |p: &str| -> FnResult<String> {
        Ok(std::path::Path::new(p)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default())
    });
    module
}

fn crypto_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("random_hex", |n: INT| -> FnResult<String> {
        let len = check_range(n, 1024, "random length")? as usize;
        let mut bytes = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        Ok(hex::encode_upper(bytes))
    });
    module.set_native_fn("xor", |a: &str, b: &str| -> FnResult<String> {
        let (a, b) = (decode_hex(a)?, decode_hex(b)?);
        if a.len() != b.len() {
            return Err(format!("xor operands differ in length: {} vs {}", a.len(), b.len()).into());
        }
        Ok(hex::encode_upper(
            a.iter().zip(&b).map(|(x, y)| x ^ y).collect::<Vec<u8>>(),
        ))
    });
    module
}

/// All helper modules by name.
pub fn helper_modules() -> Vec<(&'static str, Shared<Module>)> {
    vec![
        ("hash", hash_module().into()),
        ("pack", pack_module().into()),
        ("base64", base64_module().into()),
        ("json", json_module().into()),
        ("time", time_module().into()),
        ("path", path_module().into()),
        ("crypto", crypto_module().into()),
    ]
}

/// Register helper modules and global helper functions on an engine.
///
/// Replaces the default file-based module resolver, so `import` can only
/// reach the helper modules.
pub fn register(engine: &mut Engine) {
    let mut resolver = StaticModuleResolver::new();
    for (name, module) in helper_modules() {
        resolver.insert(name, (*module).clone());
        engine.register_static_module(name, module);
    }
    engine.set_module_resolver(resolver);

    engine.register_fn("hex", |value: Dynamic| to_hex(&dynamic_to_json(&value)));
    engine.register_fn("ascii_hex", |value: Dynamic| {
        to_ascii_hex(&dynamic_to_json(&value))
    });
    engine.register_fn("strip_hex", |s: &str| strip_non_hex(s));
    engine.register_fn("hex_len", |s: &str| (strip_non_hex(s).len() / 2) as INT);
    engine.register_fn("pad_hex", |s: &str, bytes: INT| -> FnResult<String> {
        let width = check_range(bytes, 256, "width")? as usize * 2;
        let digits = strip_non_hex(s);
        Ok(if digits.len() >= width {
            digits[digits.len() - width..].to_string()
        } else {
            format!("{:0>width$}", digits, width = width)
        })
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        let mut engine = Engine::new();
        register(&mut engine);
        engine
    }

    #[test]
    fn test_hash_module() {
        let engine = engine();
        let digest: String = engine.eval(r#"hash::sha256("abc")"#).unwrap();
        assert_eq!(
            digest,
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
        );
        let same: String = engine.eval(r#"hash::sha256_hex("616263")"#).unwrap();
        assert_eq!(same, digest);
    }

    #[test]
    fn test_pack_module() {
        let engine = engine();
        assert_eq!(engine.eval::<String>("pack::u16_be(4096)").unwrap(), "1000");
        assert_eq!(engine.eval::<String>("pack::u16_le(4096)").unwrap(), "0010");
        assert_eq!(engine.eval::<String>("pack::u8(10)").unwrap(), "0A");
        assert!(engine.eval::<String>("pack::u8(256)").is_err());
        assert_eq!(
            engine.eval::<String>(r#"pack::slice("A0000001510000", 1, 3)"#).unwrap(),
            "000001"
        );
        assert_eq!(engine.eval::<INT>(r#"pack::unpack_be("0100")"#).unwrap(), 256);
        assert_eq!(
            engine.eval::<String>(r#"pack::tlv("81", "AABB")"#).unwrap(),
            "8102AABB"
        );
    }

    #[test]
    fn test_import_through_resolver() {
        let engine = engine();
        let encoded: String = engine
            .eval(r#"import "base64" as b; b::encode("hello")"#)
            .unwrap();
        assert_eq!(encoded, "aGVsbG8=");
    }

    #[test]
    fn test_unknown_import_fails() {
        let engine = engine();
        assert!(engine.eval::<()>(r#"import "fs" as fs;"#).is_err());
    }

    #[test]
    fn test_json_module() {
        let engine = engine();
        let out: String = engine
            .eval(r#"let v = json::parse("{\"a\": [1, 2]}"); json::stringify(v.a)"#)
            .unwrap();
        assert_eq!(out, "[1,2]");
    }

    #[test]
    fn test_crypto_module() {
        let engine = engine();
        assert_eq!(
            engine.eval::<String>(r#"crypto::xor("FF00", "0F0F")"#).unwrap(),
            "F00F"
        );
        assert_eq!(engine.eval::<String>("crypto::random_hex(8)").unwrap().len(), 16);
    }

    #[test]
    fn test_global_helpers() {
        let engine = engine();
        assert_eq!(engine.eval::<String>(r#"hex("Hello")"#).unwrap(), "48656C6C6F");
        assert_eq!(engine.eval::<String>(r#"ascii_hex("12")"#).unwrap(), "3132");
        assert_eq!(engine.eval::<INT>(r#"hex_len("AA BB")"#).unwrap(), 2);
        assert_eq!(engine.eval::<String>(r#"pad_hex("1", 2)"#).unwrap(), "0001");
        assert_eq!(engine.eval::<String>(r#"path::join("/tmp", "a.bin")"#).unwrap(), "/tmp/a.bin");
    }
}
