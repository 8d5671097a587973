use std::fmt::Display;

use colored::*;
use tracing::info;
use zapper_common::{AuthKind, Config};

use crate::terminal::colors;

pub const TOTAL_WIDTH: usize = 64;

/// Events on this target are printed verbatim, without a level glyph.
pub const PRINT_TARGET: &str = "zapper::print";

const KEY_WIDTH: usize = 12;

pub trait WithDefaultColor {
    fn with_default(self, default_color: Color) -> ColoredString;
}

impl WithDefaultColor for &str {
    fn with_default(self, default_color: Color) -> ColoredString {
        self.color(default_color)
    }
}

impl WithDefaultColor for String {
    fn with_default(self, default_color: Color) -> ColoredString {
        self.color(default_color)
    }
}

impl WithDefaultColor for ColoredString {
    fn with_default(self, _default_color: Color) -> ColoredString {
        self
    }
}

pub fn print(msg: &str) {
    info!(target: PRINT_TARGET, "{msg}");
}

pub fn banner() {
    let text = format!("⟦ ZAPPER v{} ⟧ ", env!("CARGO_PKG_VERSION"));
    let width = console::measure_text_width(&text);
    let sep: ColoredString = "═".repeat(TOTAL_WIDTH.saturating_sub(width) / 2).bright_black();
    print(&format!("{}{}{}", sep, text.bright_green().bold(), sep));
}

pub fn header(msg: &str) {
    let formatted: String = format!("⟦ {} ⟧", msg);
    let msg_len: usize = formatted.chars().count();

    let dash_count: usize = TOTAL_WIDTH.saturating_sub(msg_len);
    let left: usize = dash_count / 2;
    let right: usize = dash_count - left;

    let line: ColoredString = format!(
        "{}{}{}",
        "─".repeat(left),
        formatted.to_uppercase().bright_green(),
        "─".repeat(right)
    )
    .bright_black();

    print(&format!("{}", line));
}

pub fn aligned_line<V>(key: &str, value: V)
where
    V: Display + WithDefaultColor,
{
    let whitespace: String = ".".repeat((KEY_WIDTH + 1).saturating_sub(key.len()));
    let colon: String = format!(
        "{}{}",
        whitespace.color(colors::SEPARATOR),
        ":".color(colors::SEPARATOR)
    );
    let value: ColoredString = value.with_default(colors::TEXT_DEFAULT);
    print_status(format!("{}{} {}", key.color(colors::PRIMARY), colon, value));
}

pub fn print_status<T: AsRef<str>>(msg: T) {
    let prefix: ColoredString = ">".color(colors::SEPARATOR);
    let message: String = format!("{} {}", prefix, msg.as_ref().color(colors::TEXT_DEFAULT));
    print(&message);
}

fn auth_label(kind: AuthKind) -> &'static str {
    match kind {
        AuthKind::None => "none",
        AuthKind::Form => "form",
        AuthKind::Script => "script",
        AuthKind::Header => "header",
    }
}

/// Summary of the scan request, printed before the run starts.
pub fn request(cfg: &Config) {
    aligned_line("Target", cfg.context.target.as_str().color(colors::ACCENT));
    aligned_line("Context", cfg.context.name.as_str());
    if !cfg.context.format.is_empty() {
        aligned_line("Format", cfg.context.format.as_str());
    }
    aligned_line("Auth", auth_label(cfg.auth_kind()));
    aligned_line("Credentials", cfg.credentials().len().to_string());
    let active = if cfg.scan_options.run_active_scan { "yes" } else { "no" };
    aligned_line("Active scan", active);
    aligned_line(
        "Thresholds",
        format!(
            "risk >= {}, confidence >= {}",
            cfg.report_options.min_risk_threshold, cfg.report_options.min_conf_threshold
        ),
    );
}

pub fn end_of_program() {
    print(&format!(
        "{}",
        "═".repeat(TOTAL_WIDTH).color(colors::SEPARATOR)
    ));
}
