use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}
