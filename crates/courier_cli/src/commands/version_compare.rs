//! Version compare command implementation.

use courier_engine::Version;
use serde::Serialize;
use std::cmp::Ordering;

/// Comparison result.
#[derive(Debug, Serialize)]
pub struct CompareResult {
    /// First version, normalized.
    pub a: String,
    /// Second version, normalized.
    pub b: String,
    /// `less`, `equal` or `greater`, reading as `a <op> b`.
    pub ordering: &'static str,
}

/// Compares two version strings.
pub fn compare(a: &str, b: &str) -> Result<CompareResult, Box<dyn std::error::Error>> {
    let left = Version::parse(a)?;
    let right = Version::parse(b)?;
    let ordering = match left.cmp(&right) {
        Ordering::Less => "less",
        Ordering::Equal => "equal",
        Ordering::Greater => "greater",
    };
    Ok(CompareResult {
        a: left.to_string(),
        b: right.to_string(),
        ordering,
    })
}

/// Runs the version compare command.
pub fn run(a: &str, b: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = compare(a, b)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => {
            let symbol = match result.ordering {
                "less" => "<",
                "greater" => ">",
                _ => "==",
            };
            println!("{} {} {}", result.a, symbol, result.b);
        }
    }
    Ok(())
}
