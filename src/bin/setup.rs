//! kindle-relay setup wizard.
//!
//! Prompts for the bot token, allowlist, SMTP account and Kindle address on
//! the terminal and writes a `config.toml` to the project root
//! (`KINDLE_RELAY_ROOT`, default: current directory).

use anyhow::{Context, Result};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

// ── Config formatting ──────────────────────────────────────────────────────────

struct ConfigParams<'a> {
    tg_token: &'a str,
    user_ids: &'a [u64],
    smtp_host: &'a str,
    smtp_port: u16,
    smtp_username: &'a str,
    smtp_password: &'a str,
    security: &'a str,
    from_address: &'a str,
    recipient: &'a str,
    subject: &'a str,
}

/// Produces a valid config.toml string. Extracted so it can be unit-tested.
fn format_config(p: &ConfigParams<'_>) -> String {
    let ids_str = p
        .user_ids
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    let auth_lines = if p.smtp_username.is_empty() {
        "# username = \"you@example.com\"\n# password = \"app-password\"".to_owned()
    } else {
        format!(
            "username = \"{}\"\npassword = \"{}\"",
            escape(p.smtp_username),
            escape(p.smtp_password)
        )
    };

    let tg_token = escape(p.tg_token);
    let smtp_host = escape(p.smtp_host);
    let smtp_port = p.smtp_port;
    let security = p.security;
    let from_address = escape(p.from_address);
    let recipient = escape(p.recipient);
    let subject = escape(p.subject);

    format!(
        r#"[telegram]
bot_token = "{tg_token}"
allowed_user_ids = [{ids_str}]

[smtp]
host = "{smtp_host}"
port = {smtp_port}
{auth_lines}
# "starttls", "tls" or "none"
security = "{security}"
from_address = "{from_address}"

[delivery]
recipient = "{recipient}"
# "convert" asks Amazon to convert the document; anything else is sent verbatim
subject = "{subject}"
max_file_bytes = 20971520
"#
    )
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Parse a comma- or space-separated list of numeric Telegram user IDs
fn parse_user_ids(input: &str) -> Result<Vec<u64>, String> {
    input
        .split([',', ' '])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|id| {
            id.parse::<u64>()
                .map_err(|_| format!("'{id}' is not a numeric Telegram user ID"))
        })
        .collect()
}

fn parse_security(input: &str) -> Option<&'static str> {
    match input.trim().to_lowercase().as_str() {
        "" | "starttls" => Some("starttls"),
        "tls" => Some("tls"),
        "none" => Some("none"),
        _ => None,
    }
}

fn default_port(security: &str) -> u16 {
    match security {
        "tls" => 465,
        "none" => 25,
        _ => 587,
    }
}

// ── CLI wizard ─────────────────────────────────────────────────────────────────

fn run_cli(project_root: &Path) -> Result<()> {
    println!("=== kindle-relay setup ===\n");

    let read_line = |prompt: &str| -> Result<String> {
        print!("{prompt}");
        io::stdout().flush()?;
        let mut buf = String::new();
        io::stdin().read_line(&mut buf)?;
        Ok(buf.trim().to_owned())
    };

    let or_default = |s: String, default: &str| {
        if s.is_empty() {
            default.to_owned()
        } else {
            s
        }
    };

    let tg_token = read_line("Telegram bot token: ")?;
    let user_ids = loop {
        match parse_user_ids(&read_line("Allowed Telegram user IDs (comma-separated): ")?) {
            Ok(ids) => break ids,
            Err(e) => println!("  {e}"),
        }
    };
    let smtp_host = read_line("SMTP host: ")?;
    let security = loop {
        match parse_security(&read_line("SMTP security (starttls/tls/none) [starttls]: ")?) {
            Some(security) => break security,
            None => println!("  Please answer starttls, tls or none"),
        }
    };
    let port_default = default_port(security).to_string();
    let smtp_port: u16 = loop {
        let answer = or_default(
            read_line(&format!("SMTP port [{port_default}]: "))?,
            &port_default,
        );
        match answer.parse() {
            Ok(port) => break port,
            Err(_) => println!("  '{answer}' is not a valid port"),
        }
    };
    let smtp_username = read_line("SMTP username (empty for no AUTH): ")?;
    let smtp_password = if smtp_username.is_empty() {
        String::new()
    } else {
        read_line("SMTP password: ")?
    };
    let from_address = or_default(read_line("Sender address [SMTP username]: ")?, &smtp_username);
    let recipient = read_line("Kindle email address: ")?;
    let subject = or_default(read_line("Email subject [convert]: ")?, "convert");

    let config = format_config(&ConfigParams {
        tg_token: &tg_token,
        user_ids: &user_ids,
        smtp_host: &smtp_host,
        smtp_port,
        smtp_username: &smtp_username,
        smtp_password: &smtp_password,
        security,
        from_address: &from_address,
        recipient: &recipient,
        subject: &subject,
    });

    let config_path = project_root.join("config.toml");
    std::fs::write(&config_path, &config)
        .with_context(|| format!("Could not write {}", config_path.display()))?;

    println!("\n✓  config.toml saved to {}", config_path.display());
    println!("   Run the bot with:  cargo run --bin kindle-relay");
    println!("   Remember to add the sender address to your Amazon approved list.");
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Resolve project root: prefer KINDLE_RELAY_ROOT env, fall back to cwd.
    let project_root =
        PathBuf::from(std::env::var("KINDLE_RELAY_ROOT").unwrap_or_else(|_| ".".to_string()));
    run_cli(&project_root)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
