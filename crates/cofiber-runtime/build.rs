//! Build script for cofiber-runtime
//!
//! Generates compile-time configuration defaults:
//! 1. Start with library defaults
//! 2. If COFIBER_CONFIG_RS is set, parse the user's override file
//! 3. Merge user values over defaults (user wins)
//! 4. Write OUT_DIR/cofiber_defaults.rs
//!
//! The override file only needs the values it changes, e.g.
//!
//! ```text
//! pub const FIBER_STACK_SIZE: u32 = 256 * 1024;
//! ```

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

/// Configuration parameter definition
struct ConfigParam {
    name: &'static str,
    rust_type: &'static str,
    default_value: &'static str,
}

/// All configuration parameters with their defaults
const CONFIG_PARAMS: &[ConfigParam] = &[
    ConfigParam {
        name: "FIBER_STACK_SIZE",
        rust_type: "u32",
        default_value: "1024 * 1024", // 1 MiB
    },
    ConfigParam {
        name: "LOG_LEVEL",
        rust_type: "&str",
        default_value: "\"info\"",
    },
];

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let dest_path = Path::new(&out_dir).join("cofiber_defaults.rs");

    let mut config: HashMap<&str, String> = CONFIG_PARAMS
        .iter()
        .map(|p| (p.name, p.default_value.to_string()))
        .collect();

    if let Ok(user_path) = env::var("COFIBER_CONFIG_RS") {
        println!("cargo:rerun-if-changed={}", user_path);

        match fs::read_to_string(&user_path) {
            Ok(content) => {
                parse_and_merge(&content, &mut config);
                println!("cargo:warning=Using custom config: {}", user_path);
            }
            Err(e) => {
                println!(
                    "cargo:warning=Failed to read COFIBER_CONFIG_RS ({}): {}",
                    user_path, e
                );
            }
        }
    }

    println!("cargo:rerun-if-env-changed=COFIBER_CONFIG_RS");
    println!("cargo:rerun-if-changed=build.rs");

    let output = generate_config(&config);
    fs::write(&dest_path, output).expect("Failed to write merged config");
}

/// Parse the user's override file and merge known values into `config`
fn parse_and_merge(content: &str, config: &mut HashMap<&str, String>) {
    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with("//") || !line.starts_with("pub const ") {
            continue;
        }

        if let Some((name, value)) = parse_const_line(line) {
            match CONFIG_PARAMS.iter().find(|p| p.name == name) {
                Some(param) => {
                    config.insert(param.name, value);
                }
                None => println!("cargo:warning=Unknown config parameter: {}", name),
            }
        }
    }
}

/// Parse `pub const NAME: TYPE = VALUE;` into (name, value)
fn parse_const_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("pub const ")?.trim();

    let colon_pos = rest.find(':')?;
    let name = rest[..colon_pos].trim().to_string();

    let eq_pos = rest.find('=')?;
    let semi_pos = rest.rfind(';').unwrap_or(rest.len());
    let value = rest[eq_pos + 1..semi_pos].trim().to_string();

    Some((name, value))
}

fn generate_config(config: &HashMap<&str, String>) -> String {
    let mut output = String::new();

    output.push_str("// Auto-generated by build.rs - do not edit\n");
    output.push_str("// Defaults merged from library values");
    if env::var("COFIBER_CONFIG_RS").is_ok() {
        output.push_str(" and the COFIBER_CONFIG_RS override file");
    }
    output.push_str("\n\n");

    for param in CONFIG_PARAMS {
        let value = &config[param.name];
        output.push_str(&format!(
            "pub const {}: {} = {};\n",
            param.name, param.rust_type, value
        ));
    }

    output
}
