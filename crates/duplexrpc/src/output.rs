use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use duplexrpc_host::Envelope;
use serde::Serialize;
use serde_json::Value;

const PREVIEW_CHARS: usize = 72;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ReplyOutput<'a> {
    method: &'a str,
    call_id: u32,
    seq: usize,
    value: &'a Value,
    timestamp: String,
}

/// Prints call replies as they arrive. Table output is buffered until
/// [`ReplyPrinter::finish`].
pub struct ReplyPrinter<'a> {
    method: &'a str,
    call_id: u32,
    format: OutputFormat,
    seq: usize,
    rows: Vec<Vec<String>>,
}

impl<'a> ReplyPrinter<'a> {
    pub fn new(method: &'a str, call_id: u32, format: OutputFormat) -> Self {
        Self {
            method,
            call_id,
            format,
            seq: 0,
            rows: Vec::new(),
        }
    }

    pub fn print(&mut self, value: &Value) {
        match self.format {
            OutputFormat::Json => {
                let out = ReplyOutput {
                    method: self.method,
                    call_id: self.call_id,
                    seq: self.seq,
                    value,
                    timestamp: now_unix_seconds(),
                };
                println!(
                    "{}",
                    serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
                );
            }
            OutputFormat::Table => {
                self.rows.push(vec![
                    self.seq.to_string(),
                    self.method.to_string(),
                    value.to_string(),
                ]);
            }
            OutputFormat::Pretty => {
                let rendered =
                    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
                println!("[{}] {}#{} {}", self.seq, self.method, self.call_id, rendered);
            }
        }
        self.seq += 1;
    }

    pub fn count(&self) -> usize {
        self.seq
    }

    pub fn finish(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["SEQ", "METHOD", "VALUE"]);
        for row in self.rows.drain(..) {
            table.add_row(row);
        }
        println!("{table}");
    }
}

#[derive(Serialize)]
struct EnvelopeOutput<'a> {
    index: usize,
    id: u32,
    parent_id: u32,
    method: &'a str,
    type_name: &'a str,
    size: usize,
    payload: String,
}

pub fn print_envelopes(envelopes: &[Envelope], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for (index, envelope) in envelopes.iter().enumerate() {
                let out = EnvelopeOutput {
                    index,
                    id: envelope.id,
                    parent_id: envelope.parent_id,
                    method: &envelope.method,
                    type_name: &envelope.argument.type_name,
                    size: envelope.argument.bytes.len(),
                    payload: payload_preview(&envelope.argument.bytes),
                };
                println!(
                    "{}",
                    serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["#", "ID", "PARENT", "METHOD", "TYPE", "SIZE", "PAYLOAD"]);
            for (index, envelope) in envelopes.iter().enumerate() {
                table.add_row(vec![
                    index.to_string(),
                    envelope.id.to_string(),
                    envelope.parent_id.to_string(),
                    envelope.method.clone(),
                    envelope.argument.type_name.clone(),
                    envelope.argument.bytes.len().to_string(),
                    payload_preview(&envelope.argument.bytes),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (index, envelope) in envelopes.iter().enumerate() {
                let direction = if envelope.is_callback() {
                    format!("reply to {}", envelope.parent_id)
                } else {
                    format!("call {}", envelope.method)
                };
                println!(
                    "#{index} id={} {direction} type={} size={} payload={}",
                    envelope.id,
                    envelope.argument.type_name,
                    envelope.argument.bytes.len(),
                    payload_preview(&envelope.argument.bytes)
                );
            }
        }
    }
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) if text.chars().count() > PREVIEW_CHARS => {
            let cut: String = text.chars().take(PREVIEW_CHARS).collect();
            format!("{cut}...")
        }
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
